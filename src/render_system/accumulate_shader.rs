use std::sync::Arc;

use image::{Rgba, RgbaImage};
use nalgebra::Vector3;

use crate::{
    error::{Error, Result},
    render_system::{
        compute::{AtomicBuffer, AtomicF32Buffer},
        photon_rendering::PipelineContext,
    },
};

const GAMMA: f32 = 2.2;

// exposure, clamp and gamma encode one linear radiance value
pub fn encode(radiance: &Vector3<f32>, exposure: f32) -> [u8; 4] {
    let channel = |c: f32| {
        let c = (c * exposure).clamp(0.0, 1.0);
        // NaN clamps to NaN, which casts to 0
        (c.powf(1.0 / GAMMA) * 255.0).round() as u8
    };
    [
        channel(radiance[0]),
        channel(radiance[1]),
        channel(radiance[2]),
        255,
    ]
}

// averages each scale x scale block of radiance into one output pixel
#[tracing::instrument(skip_all)]
pub fn composite(
    ctx: &PipelineContext,
    radiance: &AtomicF32Buffer,
    output: &AtomicBuffer,
) -> Result<RgbaImage> {
    let config = ctx.config;
    let [width, height] = [config.width, config.height];
    let scale = config.scale;
    let src_width = width * scale;
    if output.len() < (width * height) as usize {
        return Err(Error::Pipeline("output surface is too small".into()));
    }

    let exposure = config.exposure;
    let radiance = radiance.clone();
    let out = output.clone();
    ctx.engine.dispatch(
        "composite",
        width * height,
        Arc::new(move |bid| {
            let x = bid % width;
            let y = bid / width;
            let mut sum = Vector3::zeros();
            for sy in 0..scale {
                for sx in 0..scale {
                    let src = ((y * scale + sy) * src_width + (x * scale + sx)) as usize;
                    sum += Vector3::new(
                        radiance.load(3 * src),
                        radiance.load(3 * src + 1),
                        radiance.load(3 * src + 2),
                    );
                }
            }
            let average = sum / (scale * scale) as f32;
            out.store(bid as usize, u32::from_le_bytes(encode(&average, exposure)));
        }),
    );
    ctx.engine.barrier()?;

    Ok(RgbaImage::from_fn(width, height, |x, y| {
        Rgba(output.load((y * width + x) as usize).to_le_bytes())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_gamma() {
        assert_eq!(encode(&Vector3::zeros(), 1.0), [0, 0, 0, 255]);
        assert_eq!(encode(&Vector3::new(1.0, 5.0, -1.0), 1.0), [255, 255, 0, 255]);
        // 0.5 ^ (1 / 2.2) = 0.7297
        assert_eq!(encode(&Vector3::new(0.25, 0.0, 0.0), 2.0)[0], 186);
        assert_eq!(encode(&Vector3::new(f32::NAN, 0.0, 0.0), 1.0)[0], 0);
    }
}
