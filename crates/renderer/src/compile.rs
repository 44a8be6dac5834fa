use std::borrow::Cow;

use crate::types::CapabilityError;

/// Host-supplied shading function for the tone-map pass.
///
/// The WGSL must define
///
/// ```wgsl
/// fn tone_map(color: vec4<f32>, exposure: f32, range: vec2<f32>, white_point: f32) -> vec4<f32>
/// ```
///
/// and nothing bound at `@group(0)`; the renderer wraps it with its own
/// bindings and entry points.
pub trait ToneMapShader {
    /// Name used in logs, pipeline labels and compile errors.
    fn label(&self) -> &str;

    fn wgsl(&self) -> Cow<'_, str>;
}

/// Extended Reinhard with a white point.
///
/// The smoothed exposure is read as scene brightness: it is turned into an
/// exposure compensation of `-log2(exposure)` stops, limited to `range`, before
/// the curve is applied per channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReinhardToneMap;

impl ToneMapShader for ReinhardToneMap {
    fn label(&self) -> &str {
        "reinhard"
    }

    fn wgsl(&self) -> Cow<'_, str> {
        Cow::Borrowed(REINHARD_WGSL)
    }
}

/// Tone-map source held in memory, e.g. read from a file by the host.
#[derive(Debug, Clone)]
pub struct WgslToneMap {
    label: String,
    source: String,
}

impl WgslToneMap {
    /// `source` must define `tone_map`; it is validated when the feature
    /// initialises, not here.
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
        }
    }
}

impl ToneMapShader for WgslToneMap {
    fn label(&self) -> &str {
        &self.label
    }

    fn wgsl(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.source)
    }
}

/// Wraps and validates the host's tone-map function, then compiles it.
pub(crate) fn compile_tone_map_shader(
    device: &wgpu::Device,
    shader: &dyn ToneMapShader,
) -> Result<wgpu::ShaderModule, CapabilityError> {
    let wrapped = wrap_tone_map_source(&shader.wgsl());
    validate_wgsl(shader.label(), &wrapped)?;
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(shader.label()),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(wrapped)),
    }))
}

pub(crate) fn compile_blit_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("exposure blit"),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(blit_source())),
    })
}

pub(crate) fn compile_reduce_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("luminance reduce"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(REDUCE_WGSL)),
    })
}

/// Parses and validates a WGSL module with naga so a bad host shader is
/// reported as an error instead of a device validation panic.
pub(crate) fn validate_wgsl(label: &str, source: &str) -> Result<(), CapabilityError> {
    let module =
        naga::front::wgsl::parse_str(source).map_err(|err| CapabilityError::ShaderInvalid {
            label: label.to_owned(),
            message: err.emit_to_string(source),
        })?;
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|err| CapabilityError::ShaderInvalid {
            label: label.to_owned(),
            message: err.emit_to_string(source),
        })?;
    Ok(())
}

/// Produces a complete WGSL module from a host `tone_map` function.
///
/// Global directives (`enable`, `requires`, `diagnostic`) must precede every
/// declaration, so they are hoisted above [`TONE_MAP_PRELUDE`]; the rest of the
/// host source follows the prelude unchanged and [`TONE_MAP_ENTRY`] closes it.
fn wrap_tone_map_source(source: &str) -> String {
    let mut directives = String::new();
    let mut body = String::new();
    for line in source.lines() {
        let trimmed = line.trim_start();
        let is_directive = trimmed.starts_with("enable ")
            || trimmed.starts_with("requires ")
            || trimmed.starts_with("diagnostic(")
            || trimmed.starts_with("diagnostic (");
        let target = if is_directive {
            &mut directives
        } else {
            &mut body
        };
        target.push_str(line);
        target.push('\n');
    }

    format!("{directives}{FULLSCREEN_VERTEX}{TONE_MAP_PRELUDE}\n{body}\n{TONE_MAP_ENTRY}")
}

fn blit_source() -> String {
    format!("{FULLSCREEN_VERTEX}{BLIT_FRAGMENT}")
}

/// Full-screen triangle; covers the target without a vertex buffer.
const FULLSCREEN_VERTEX: &str = r"@vertex
fn autoexpose_vs(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -3.0),
        vec2<f32>(3.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );
    return vec4<f32>(positions[index], 0.0, 1.0);
}
";

/// Bindings for the tone-map pass. The uniform layout must match
/// `ToneMapUniforms` in `gpu/uniforms.rs`.
const TONE_MAP_PRELUDE: &str = r"
struct AutoExposureParams {
    exposure: f32,
    white_point: f32,
    range: vec2<f32>,
}

@group(0) @binding(0) var autoexpose_source: texture_2d<f32>;
@group(0) @binding(1) var<uniform> autoexpose_params: AutoExposureParams;
";

const TONE_MAP_ENTRY: &str = r"@fragment
fn autoexpose_fs(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let color = textureLoad(autoexpose_source, vec2<i32>(position.xy), 0);
    return tone_map(
        color,
        autoexpose_params.exposure,
        autoexpose_params.range,
        autoexpose_params.white_point,
    );
}
";

const BLIT_FRAGMENT: &str = r"
@group(0) @binding(0) var autoexpose_source: texture_2d<f32>;

@fragment
fn autoexpose_fs(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(autoexpose_source, vec2<i32>(position.xy), 0);
}
";

const REINHARD_WGSL: &str = r"
fn tone_map(color: vec4<f32>, exposure: f32, range: vec2<f32>, white_point: f32) -> vec4<f32> {
    let stops = clamp(-log2(max(exposure, 1.0e-4)), range.x, range.y);
    let exposed = max(color.rgb, vec3<f32>(0.0)) * exp2(stops);
    let white_sq = max(white_point * white_point, 1.0e-4);
    let mapped = exposed * (vec3<f32>(1.0) + exposed / white_sq) / (vec3<f32>(1.0) + exposed);
    return vec4<f32>(mapped, color.a);
}
";

/// Row reduction: one workgroup per 32 rows, one invocation per row, writing an
/// interleaved `(luminance sum, pixel count)` pair per group. The group size
/// must match `GROUP_SIZE` in `gpu/reduce.rs`.
const REDUCE_WGSL: &str = r"
struct ReduceParams {
    dims: vec2<u32>,
    _padding: vec2<u32>,
}

@group(0) @binding(0) var source_frame: texture_2d<f32>;
@group(0) @binding(1) var<uniform> params: ReduceParams;
@group(0) @binding(2) var<storage, read_write> partials: array<f32>;

const GROUP_SIZE: u32 = 32u;
const REC709: vec3<f32> = vec3<f32>(0.2126, 0.7152, 0.0722);

var<workgroup> row_sums: array<f32, 32>;
var<workgroup> row_counts: array<f32, 32>;

@compute @workgroup_size(32, 1, 1)
fn reduce_rows(
    @builtin(workgroup_id) group: vec3<u32>,
    @builtin(local_invocation_index) lane: u32,
) {
    let row = group.x * GROUP_SIZE + lane;
    var sum = 0.0;
    var count = 0.0;
    if (row < params.dims.y) {
        for (var x = 0u; x < params.dims.x; x = x + 1u) {
            let color = textureLoad(source_frame, vec2<i32>(i32(x), i32(row)), 0);
            sum = sum + dot(max(color.rgb, vec3<f32>(0.0)), REC709);
        }
        count = f32(params.dims.x);
    }
    row_sums[lane] = sum;
    row_counts[lane] = count;
    workgroupBarrier();

    for (var stride = GROUP_SIZE / 2u; stride > 0u; stride = stride / 2u) {
        if (lane < stride) {
            row_sums[lane] = row_sums[lane] + row_sums[lane + stride];
            row_counts[lane] = row_counts[lane] + row_counts[lane + stride];
        }
        workgroupBarrier();
    }

    if (lane == 0u) {
        partials[group.x * 2u] = row_sums[0];
        partials[group.x * 2u + 1u] = row_counts[0];
    }
}
";
