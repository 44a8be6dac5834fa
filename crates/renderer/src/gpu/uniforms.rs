use bytemuck::{Pod, Zeroable};

use metering::FramePlan;

/// Tone-map pass parameters. Layout mirrors `AutoExposureParams` in the
/// wrapped WGSL: two scalars followed by an 8-byte aligned `vec2`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct ToneMapUniforms {
    pub exposure: f32,
    pub white_point: f32,
    pub range: [f32; 2],
}

impl ToneMapUniforms {
    pub fn from_plan(plan: &FramePlan) -> Self {
        Self {
            exposure: plan.exposure,
            white_point: plan.white_point,
            range: plan.exposure_range,
        }
    }
}

/// Reduction pass parameters, padded to a 16-byte uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct ReduceUniforms {
    pub dims: [u32; 2],
    pub padding: [u32; 2],
}

impl ReduceUniforms {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            dims: [width, height],
            padding: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_are_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<ToneMapUniforms>(), 16);
        assert_eq!(std::mem::size_of::<ReduceUniforms>(), 16);
        assert_eq!(std::mem::offset_of!(ToneMapUniforms, range), 8);
    }

    #[test]
    fn tone_map_uniforms_follow_plan() {
        let plan = FramePlan {
            dispatch_reduction: false,
            exposure: 1.25,
            exposure_range: [-2.5, 0.6],
            white_point: 3.0,
        };
        let uniforms = ToneMapUniforms::from_plan(&plan);
        assert_eq!(uniforms.exposure, 1.25);
        assert_eq!(uniforms.range, [-2.5, 0.6]);
        assert_eq!(uniforms.white_point, 3.0);
    }
}
