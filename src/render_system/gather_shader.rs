//! Pixel-major gather and the density estimator shared with the splat pass.

use std::{f32::consts::PI, sync::Arc};

use nalgebra::Vector3;

use crate::{
    error::Result,
    render_system::{
        compute::AtomicF32Buffer,
        photon::Photon,
        photon_map::PhotonMap,
        photon_rendering::PipelineContext,
        raygen_shader::{GBuffer, GBufferSample},
    },
};

// cone filter constant, k >= 1
pub const CONE_FILTER_K: f32 = 1.1;

pub fn cone_weight(distance: f32, radius: f32) -> f32 {
    1.0 - distance / (CONE_FILTER_K * radius)
}

/// Converts filtered flux arriving within `radius` of a diffuse surface
/// point into reflected radiance.
pub fn radiance_estimate(albedo: &Vector3<f32>, flux: &Vector3<f32>, radius: f32) -> Vector3<f32> {
    let normalization = (1.0 - 2.0 / (3.0 * CONE_FILTER_K)) * PI * radius * radius;
    albedo.component_mul(flux) / (PI * normalization)
}

// cone filtered flux if the photon lands within `radius` on the visible side
pub fn filtered_flux(photon: &Photon, sample: &GBufferSample, radius: f32) -> Option<Vector3<f32>> {
    let distance = (photon.position - sample.position).norm();
    if distance > radius || photon.direction.dot(&sample.normal) >= 0.0 {
        return None;
    }
    Some(photon.power * cone_weight(distance, radius))
}

pub fn gather_radiance(
    map: &PhotonMap,
    sample: &GBufferSample,
    cell_radius: u32,
    radius: f32,
) -> Vector3<f32> {
    let Some(center) = map.grid().cell_3d(&sample.position) else {
        return Vector3::zeros();
    };
    let mut flux = Vector3::zeros();
    for cell in map.grid().neighbors(center, cell_radius) {
        for photon in map.cell_photons(cell) {
            if let Some(f) = filtered_flux(photon, sample, radius) {
                flux += f;
            }
        }
    }
    radiance_estimate(&sample.albedo, &flux, radius)
}

#[tracing::instrument(skip_all, fields(photons = map.total_photons()))]
pub fn gather(
    ctx: &PipelineContext,
    map: Arc<PhotonMap>,
    gbuffer: &GBuffer,
    radiance: &AtomicF32Buffer,
) -> Result<()> {
    let cell_radius = ctx.config.gather_cell_radius;
    let radius = ctx.config.gather_radius;
    let gbuffer = gbuffer.clone();
    let out = radiance.clone();

    ctx.engine.dispatch(
        "gather",
        (radiance.len() / 3) as u32,
        Arc::new(move |bid| {
            let bid = bid as usize;
            let Some(Some(sample)) = gbuffer.get(bid) else {
                return;
            };
            let l = gather_radiance(&map, sample, cell_radius, radius);
            for channel in 0..3 {
                out.store(3 * bid + channel, l[channel]);
            }
        }),
    );
    ctx.engine.barrier()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_system::{
        compute::InlineEngine, grid::UniformGrid, photon_map::PhotonMapBuilder,
    };
    use nalgebra::Point3;

    fn sample() -> GBufferSample {
        GBufferSample {
            position: Point3::new(0.5, 0.0, 0.5),
            normal: Vector3::new(0.0, 1.0, 0.0),
            albedo: Vector3::new(0.5, 0.5, 0.5),
        }
    }

    fn photon(position: Point3<f32>, direction: Vector3<f32>) -> Photon {
        Photon::new(position, direction, Vector3::new(1.0, 1.0, 1.0), 0)
    }

    fn map(photons: Vec<Photon>) -> PhotonMap {
        let grid = UniformGrid::new(Point3::new(-2.0, -2.0, -2.0), 1.0, [4, 4, 4]);
        PhotonMapBuilder::new(grid)
            .build(&InlineEngine::new(), photons, 0)
            .unwrap()
    }

    #[test]
    fn no_photons_gives_zero() {
        let l = gather_radiance(&map(vec![]), &sample(), 1, 0.5);
        assert_eq!(l, Vector3::zeros());
        assert!(l.iter().all(|c| !c.is_nan()));
    }

    #[test]
    fn single_photon_at_the_sample() {
        let down = Vector3::new(0.0, -1.0, 0.0);
        let l = gather_radiance(&map(vec![photon(Point3::new(0.5, 0.0, 0.5), down)]), &sample(), 1, 0.5);
        let expected = radiance_estimate(&sample().albedo, &Vector3::new(1.0, 1.0, 1.0), 0.5);
        assert!((l - expected).norm() < 1e-6);
        assert!(l.x > 0.0);
    }

    #[test]
    fn ignores_far_and_backfacing_photons() {
        let down = Vector3::new(0.0, -1.0, 0.0);
        let photons = vec![
            // outside the radius, in a neighbouring cell
            photon(Point3::new(1.2, 0.0, 0.5), down),
            // arrives from below the surface
            photon(Point3::new(0.5, 0.0, 0.6), -down),
        ];
        assert_eq!(gather_radiance(&map(photons), &sample(), 1, 0.5), Vector3::zeros());
    }

    #[test]
    fn photons_in_neighbouring_cells_count() {
        let down = Vector3::new(0.0, -1.0, 0.0);
        // sample sits in cell x=2, photon in cell x=1
        let photons = vec![photon(Point3::new(-0.1, 0.0, 0.5), down)];
        let near = gather_radiance(&map(photons.clone()), &sample(), 1, 0.7);
        assert!(near.x > 0.0);
        let only_own_cell = gather_radiance(&map(photons), &sample(), 0, 0.7);
        assert_eq!(only_own_cell, Vector3::zeros());
    }

    #[test]
    fn cone_filter_weights() {
        assert_eq!(cone_weight(0.0, 1.0), 1.0);
        assert!((cone_weight(1.0, 1.0) - (1.0 - 1.0 / 1.1)).abs() < 1e-6);
    }
}
