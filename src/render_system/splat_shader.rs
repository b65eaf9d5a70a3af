use std::sync::Arc;

use nalgebra::Vector3;

use crate::{
    error::Result,
    render_system::{
        compute::AtomicF32Buffer,
        gather_shader::{filtered_flux, radiance_estimate},
        photon_map::PhotonMap,
        photon_rendering::PipelineContext,
        raygen_shader::GBuffer,
    },
};

#[tracing::instrument(skip_all, fields(photons = map.total_photons()))]
pub fn splat(
    ctx: &PipelineContext,
    map: Arc<PhotonMap>,
    gbuffer: &GBuffer,
    flux: &AtomicF32Buffer,
) -> Result<()> {
    let extent = ctx.config.render_extent();
    let window = ctx.config.splat_window as i64;
    let radius = ctx.config.splat_radius;
    let camera = ctx.camera;
    let gbuffer = gbuffer.clone();
    let out = flux.clone();
    let invocations = map.total_photons() as u32;

    ctx.engine.dispatch(
        "splat",
        invocations,
        Arc::new(move |i| {
            let photon = &map.photons()[i as usize];
            let Some([px, py]) = camera.project(&photon.position, extent) else {
                return;
            };
            for dy in -window..=window {
                for dx in -window..=window {
                    let x = px as i64 + dx;
                    let y = py as i64 + dy;
                    if x < 0 || y < 0 || x >= extent[0] as i64 || y >= extent[1] as i64 {
                        continue;
                    }
                    let bid = (y * extent[0] as i64 + x) as usize;
                    let Some(Some(sample)) = gbuffer.get(bid) else {
                        continue;
                    };
                    if let Some(f) = filtered_flux(photon, sample, radius) {
                        for channel in 0..3 {
                            out.add(3 * bid + channel, f[channel]);
                        }
                    }
                }
            }
        }),
    );
    ctx.engine.barrier()
}

// one invocation per pixel, accumulated flux to radiance
#[tracing::instrument(skip_all)]
pub fn resolve(
    ctx: &PipelineContext,
    gbuffer: &GBuffer,
    flux: &AtomicF32Buffer,
    radiance: &AtomicF32Buffer,
) -> Result<()> {
    let radius = ctx.config.splat_radius;
    let gbuffer = gbuffer.clone();
    let flux = flux.clone();
    let out = radiance.clone();

    ctx.engine.dispatch(
        "splat_resolve",
        (radiance.len() / 3) as u32,
        Arc::new(move |bid| {
            let bid = bid as usize;
            let Some(Some(sample)) = gbuffer.get(bid) else {
                return;
            };
            let f = Vector3::new(
                flux.load(3 * bid),
                flux.load(3 * bid + 1),
                flux.load(3 * bid + 2),
            );
            let l = radiance_estimate(&sample.albedo, &f, radius);
            for channel in 0..3 {
                out.store(3 * bid + channel, l[channel]);
            }
        }),
    );
    ctx.engine.barrier()
}
