use std::sync::Arc;

use nalgebra::{Point3, Vector3};

use crate::{
    error::{Error, Result},
    render_system::{compute::WriteOnceBuffer, photon_rendering::PipelineContext},
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GBufferSample {
    pub position: Point3<f32>,
    // faces the camera
    pub normal: Vector3<f32>,
    pub albedo: Vector3<f32>,
}

// None where the primary ray escaped the scene
pub type GBuffer = WriteOnceBuffer<Option<GBufferSample>>;

#[tracing::instrument(skip_all)]
pub fn raygen(ctx: &PipelineContext, gbuffer: &GBuffer) -> Result<()> {
    let extent = ctx.config.render_extent();
    let pixels = extent[0] * extent[1];
    if gbuffer.len() < pixels as usize {
        return Err(Error::Pipeline(format!(
            "g-buffer holds {} samples, target has {pixels} pixels",
            gbuffer.len()
        )));
    }

    let albedos: Arc<[Vector3<f32>]> = ctx.scene.materials().iter().map(|m| m.albedo).collect();
    let tracer = ctx.tracer.clone();
    let camera = ctx.camera;
    let out = gbuffer.clone();

    ctx.engine.dispatch(
        "raygen",
        pixels,
        Arc::new(move |bid| {
            let x = bid % extent[0];
            let y = bid / extent[0];
            let ray = camera.primary_ray(x, y, extent);
            let sample = tracer.trace(&ray).map(|hit| GBufferSample {
                position: hit.position,
                normal: hit.normal,
                albedo: albedos[hit.material as usize],
            });
            out.write(bid as usize, sample);
        }),
    );
    ctx.engine.barrier()?;

    if gbuffer.conflicts() > 0 {
        return Err(Error::Pipeline(format!(
            "{} conflicting g-buffer writes",
            gbuffer.conflicts()
        )));
    }
    Ok(())
}
