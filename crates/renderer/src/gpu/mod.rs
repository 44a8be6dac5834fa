//! wgpu side of the exposure cycle.
//!
//! - `context` builds a headless instance/adapter/device for hosts without one.
//! - `reduce` owns the row-reduction compute pipeline and its output buffer,
//!   resized whenever the frame size changes.
//! - `readback` rotates a small ring of mappable staging buffers; map callbacks
//!   only post to a channel that the frame loop drains.
//! - `tonemap` wraps the host's `tone_map` function into a render pipeline per
//!   target format and performs the two-stage blit.
//! - `uniforms` holds the `Pod` mirrors of the WGSL uniform blocks.
//! - `frame_io` uploads images into frames and reads frames back for export.

mod context;
mod frame_io;
pub(crate) mod readback;
pub(crate) mod reduce;
pub(crate) mod tonemap;
pub(crate) mod uniforms;

pub use context::GpuContext;
pub use frame_io::{create_frame_texture, read_frame_rgba8, upload_image, FRAME_FORMAT};
