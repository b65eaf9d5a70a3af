use std::{f32::consts::PI, sync::Arc};

use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    error::Result,
    render_system::{
        grid::UniformGrid,
        photon::{Photon, PhotonBuffer},
        photon_rendering::PipelineContext,
        raytracing::Ray,
        scene::Light,
    },
    utils,
};

// offset applied along the normal when a path leaves a surface
const SURFACE_EPSILON: f32 = 1e-3;

// largest remainder rounding keeps the total exactly `budget`
pub fn distribute_budget(lights: &[Light], budget: u32) -> Vec<u32> {
    let powers = lights.iter().map(|l| l.power().max(0.0) as f64).collect::<Vec<_>>();
    let total: f64 = powers.iter().sum();
    if lights.is_empty() || total <= 0.0 {
        return vec![0; lights.len()];
    }

    let shares = powers
        .iter()
        .map(|p| budget as f64 * p / total)
        .collect::<Vec<_>>();
    let mut paths = shares.iter().map(|s| s.floor() as u32).collect::<Vec<_>>();
    let assigned: u32 = paths.iter().sum();

    let mut by_remainder = (0..lights.len()).collect::<Vec<_>>();
    by_remainder.sort_by(|&a, &b| {
        let ra = shares[a] - shares[a].floor();
        let rb = shares[b] - shares[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &light in by_remainder.iter().take(budget.saturating_sub(assigned) as usize) {
        paths[light] += 1;
    }
    paths
}

// largest number of paths whose photons are guaranteed to fit in `capacity`
pub fn clamp_paths(budget: u32, capacity: u32, max_depth: u32) -> u32 {
    budget.min(capacity / max_depth.max(1))
}

// returns (tangent, bitangent) perpendicular to the unit vector `n`
fn orthonormal_basis(n: &Vector3<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let a = if n.x.abs() > 0.9 {
        Vector3::new(0.0, 1.0, 0.0)
    } else {
        Vector3::new(1.0, 0.0, 0.0)
    };
    let t = a.cross(n).normalize();
    let b = n.cross(&t);
    (t, b)
}

fn to_world(local: Vector3<f32>, n: &Vector3<f32>) -> Vector3<f32> {
    let (t, b) = orthonormal_basis(n);
    (t * local.x + b * local.y + n * local.z).normalize()
}

fn uniform_sphere(rng: &mut impl Rng) -> Vector3<f32> {
    let z = 1.0 - 2.0 * rng.random::<f32>();
    let r = (1.0 - z * z).max(0.0).sqrt();
    let phi = 2.0 * PI * rng.random::<f32>();
    Vector3::new(r * phi.cos(), r * phi.sin(), z)
}

fn uniform_cone(axis: &Vector3<f32>, cos_max: f32, rng: &mut impl Rng) -> Vector3<f32> {
    let cos_theta = 1.0 - rng.random::<f32>() * (1.0 - cos_max);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * rng.random::<f32>();
    to_world(
        Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta),
        axis,
    )
}

pub fn cosine_hemisphere(normal: &Vector3<f32>, rng: &mut impl Rng) -> Vector3<f32> {
    let u1 = rng.random::<f32>();
    let r = u1.sqrt();
    let phi = 2.0 * PI * rng.random::<f32>();
    to_world(
        Vector3::new(r * phi.cos(), r * phi.sin(), (1.0 - u1).max(0.0).sqrt()),
        normal,
    )
}

pub fn sample_emission(light: &Light, rng: &mut impl Rng) -> Ray {
    match light {
        Light::Point { position, .. } => Ray::new(*position, uniform_sphere(rng)),
        Light::Spot {
            position,
            direction,
            angle,
            ..
        } => Ray::new(
            *position,
            uniform_cone(direction, utils::deg2rad(*angle).cos(), rng),
        ),
        Light::Area { position, u, v, .. } => {
            let origin: Point3<f32> =
                position + u * rng.random::<f32>() + v * rng.random::<f32>();
            let normal = u.cross(v).normalize();
            Ray::new(origin, cosine_hemisphere(&normal, rng))
        }
    }
}

#[tracing::instrument(skip_all, fields(budget = ctx.config.photon_budget))]
pub fn generate_photons(ctx: &PipelineContext, grid: UniformGrid) -> Result<Vec<Photon>> {
    let config = ctx.config;
    let lights: Arc<[Light]> = ctx.scene.lights().into();
    let albedos: Arc<[Vector3<f32>]> = ctx.scene.materials().iter().map(|m| m.albedo).collect();

    let total_paths = clamp_paths(config.photon_budget, config.photon_capacity, config.max_depth);
    if total_paths < config.photon_budget {
        tracing::warn!(
            budget = config.photon_budget,
            paths = total_paths,
            capacity = config.photon_capacity,
            "photon budget clamped to buffer capacity"
        );
    }

    let paths = distribute_budget(&lights, total_paths);
    // first path index of each light
    let starts: Arc<[u32]> = paths
        .iter()
        .scan(0, |acc, &n| {
            let start = *acc;
            *acc += n;
            Some(start)
        })
        .collect();
    let powers: Arc<[Vector3<f32>]> = lights
        .iter()
        .zip(&paths)
        .map(|(light, &n)| light.power_rgb() / n.max(1) as f32)
        .collect();
    let emitted: u32 = paths.iter().sum();

    let buffer = PhotonBuffer::with_capacity(config.photon_capacity as usize);
    let kernel_buffer = buffer.clone();
    let tracer = ctx.tracer.clone();
    let max_depth = config.max_depth;
    let seed = config.seed;

    ctx.engine.dispatch(
        "photon_trace",
        emitted,
        Arc::new(move |path| {
            let light_idx = starts.partition_point(|&s| s <= path) - 1;
            let mut rng = StdRng::seed_from_u64(utils::invocation_seed(seed, path));
            let mut ray = sample_emission(&lights[light_idx], &mut rng);
            let mut power = powers[light_idx];

            for depth in 0..max_depth {
                let Some(hit) = tracer.trace(&ray) else {
                    break;
                };
                if grid.cell_of(&hit.position).is_some() {
                    kernel_buffer.push(Photon::new(hit.position, ray.direction, power, depth));
                }

                // russian roulette on the surface reflectance
                let albedo = albedos[hit.material as usize];
                let survive = albedo.max();
                if survive <= 0.0 || rng.random::<f32>() >= survive {
                    break;
                }
                power = power.component_mul(&albedo) / survive;
                ray = Ray::new(
                    hit.position + hit.normal * SURFACE_EPSILON,
                    cosine_hemisphere(&hit.normal, &mut rng),
                );
            }
        }),
    );
    ctx.engine.barrier()?;

    let photons = buffer.to_vec()?;
    tracing::debug!(paths = emitted, photons = photons.len(), "photons traced");
    Ok(photons)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(intensity: f32) -> Light {
        Light::Point {
            position: Point3::origin(),
            color: Vector3::new(1.0, 1.0, 1.0),
            intensity,
        }
    }

    #[test]
    fn budget_split_is_exact() {
        let lights = vec![point(1.0), point(1.0), point(1.0)];
        let paths = distribute_budget(&lights, 100);
        assert_eq!(paths.iter().sum::<u32>(), 100);
        assert_eq!(paths, vec![34, 33, 33]);

        let lights = vec![point(3.0), point(1.0)];
        assert_eq!(distribute_budget(&lights, 9), vec![7, 2]);
        assert_eq!(distribute_budget(&[point(0.0)], 10), vec![0]);
    }

    #[test]
    fn capacity_clamp() {
        assert_eq!(clamp_paths(1000, 100, 2), 50);
        assert_eq!(clamp_paths(10, 100, 2), 10);
        assert_eq!(clamp_paths(10, 100, 0), 10);
    }

    #[test]
    fn spot_samples_stay_in_cone() {
        let axis = Vector3::new(0.0, -1.0, 0.0);
        let light = Light::Spot {
            position: Point3::origin(),
            direction: axis,
            angle: 30.0,
            color: Vector3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let cos_max = utils::deg2rad(30.0).cos();
        for _ in 0..1000 {
            let ray = sample_emission(&light, &mut rng);
            assert!(ray.direction.dot(&axis) >= cos_max - 1e-5);
        }
    }

    #[test]
    fn area_samples_leave_the_front_face() {
        let light = Light::Area {
            position: Point3::new(-0.5, 2.0, -0.5),
            u: Vector3::new(1.0, 0.0, 0.0),
            v: Vector3::new(0.0, 0.0, 1.0),
            color: Vector3::new(1.0, 1.0, 1.0),
            intensity: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..1000 {
            let ray = sample_emission(&light, &mut rng);
            assert!(ray.direction.y <= 0.0);
            assert!((ray.origin.y - 2.0).abs() < 1e-6);
            assert!(ray.origin.x >= -0.5 && ray.origin.x <= 0.5);
        }
    }

    fn trace_floor(scene_half_extent: f32) -> (UniformGrid, Vec<Photon>) {
        use crate::{
            config::PhotonMapConfig,
            render_system::{
                compute::InlineEngine,
                raytracing::{BvhRayTracer, RayTracingEngine},
                scene::{Scene, SceneProvider},
            },
        };

        // a 6x6 floor under a point light, wider than the small grid
        let scene = Scene::from_json_str(
            r#"{
                "camera": { "eye": [0, 2, 4], "look_at": [0, 0, 0] },
                "materials": [{ "name": "grey", "base_color": [0.5, 0.5, 0.5] }],
                "primitives": [
                    { "type": "plane", "material": "grey", "position": [0, -0.5, 0], "scale": [6, 1, 6] }
                ],
                "lights": [{ "type": "point", "position": [0, 0.5, 0], "color": [1, 1, 1], "intensity": 10 }]
            }"#,
        )
        .unwrap();
        let tracer: Arc<dyn RayTracingEngine> =
            Arc::new(BvhRayTracer::new(scene.triangles().to_vec()));
        let config = PhotonMapConfig {
            photon_budget: 2000,
            photon_capacity: 2000,
            max_depth: 1,
            scene_half_extent,
            cell_size: 0.5,
            ..Default::default()
        };
        let grid = UniformGrid::from_config(&config);
        let ctx = PipelineContext {
            config: &config,
            engine: &InlineEngine::new(),
            scene: &scene,
            tracer,
            camera: scene.camera(),
            generation: 0,
        };
        (grid, generate_photons(&ctx, grid).unwrap())
    }

    #[test]
    fn hits_outside_the_grid_are_not_recorded() {
        let (small_grid, clipped) = trace_floor(1.0);
        assert!(!clipped.is_empty());
        assert!(clipped.iter().all(|p| small_grid.cell_of(&p.position).is_some()));
        assert!(clipped.iter().all(|p| p.position.x.abs() <= 1.0 && p.position.z.abs() <= 1.0));

        let (_, full) = trace_floor(4.0);
        assert!(full.len() > clipped.len());
    }

    #[test]
    fn cosine_samples_are_unit_and_above_surface() {
        let mut rng = StdRng::seed_from_u64(1);
        let n = Vector3::new(0.3, 0.4, -0.5).normalize();
        for _ in 0..1000 {
            let d = cosine_hemisphere(&n, &mut rng);
            assert!((d.norm() - 1.0).abs() < 1e-4);
            assert!(d.dot(&n) >= -1e-6);
        }
    }
}
