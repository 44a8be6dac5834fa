mod cli;
mod paths;
mod report;
mod run;

use anyhow::Result;
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();

    let paths = AppPaths::discover()?;
    let config = run::resolve_config(&cli, &paths)?;
    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    run::run(cli, config)
}
