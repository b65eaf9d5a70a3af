use std::path::Path;

use nalgebra::{Point3, Rotation3, Vector3};
use serde::Deserialize;

use crate::{
    camera::{Camera, CameraSnapshot, LookAtCamera},
    error::{Error, Result},
    render_system::{bvh::aabb::Aabb, vertex::Triangle},
    utils,
};

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    // diffuse reflectance, every channel in [0, 1]
    pub albedo: Vector3<f32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Light {
    Point {
        position: Point3<f32>,
        color: Vector3<f32>,
        intensity: f32,
    },
    Spot {
        position: Point3<f32>,
        direction: Vector3<f32>,
        // half angle, degrees
        angle: f32,
        color: Vector3<f32>,
        intensity: f32,
    },
    // parallelogram spanned by u and v, emitting on the u x v side
    Area {
        position: Point3<f32>,
        u: Vector3<f32>,
        v: Vector3<f32>,
        color: Vector3<f32>,
        intensity: f32,
    },
}

impl Light {
    pub fn power_rgb(&self) -> Vector3<f32> {
        match self {
            Light::Point {
                color, intensity, ..
            }
            | Light::Spot {
                color, intensity, ..
            } => color * *intensity,
            Light::Area {
                u,
                v,
                color,
                intensity,
                ..
            } => color * *intensity * u.cross(v).norm(),
        }
    }

    // used to share the photon budget between lights
    pub fn power(&self) -> f32 {
        utils::luminance(&self.power_rgb())
    }
}

pub trait SceneProvider: Send + Sync {
    fn bounds(&self) -> Aabb;
    fn lights(&self) -> &[Light];
    fn camera(&self) -> CameraSnapshot;
    fn triangles(&self) -> &[Triangle];
    fn materials(&self) -> &[Material];
}

#[derive(Clone, Debug)]
pub struct Scene {
    camera: CameraSnapshot,
    materials: Vec<Material>,
    triangles: Vec<Triangle>,
    lights: Vec<Light>,
    bounds: Aabb,
}

impl Scene {
    pub fn new(
        camera: CameraSnapshot,
        materials: Vec<Material>,
        triangles: Vec<Triangle>,
        lights: Vec<Light>,
    ) -> Result<Scene> {
        if lights.is_empty() {
            return Err(Error::scene("scene has no lights"));
        }
        if let Some(material) = materials
            .iter()
            .find(|m| m.albedo.iter().any(|&c| !(0.0..=1.0).contains(&c)))
        {
            return Err(Error::scene(format!(
                "material '{}' has a base color outside [0, 1]",
                material.name
            )));
        }
        if let Some(tri) = triangles
            .iter()
            .find(|t| t.material as usize >= materials.len())
        {
            return Err(Error::scene(format!(
                "triangle references missing material {}",
                tri.material
            )));
        }
        for light in &lights {
            if !(light.power() >= 0.0) {
                return Err(Error::scene(format!("light {light:?} has negative power")));
            }
            if let Light::Spot { angle, .. } = light {
                if !(*angle > 0.0 && *angle <= 90.0) {
                    return Err(Error::scene(format!(
                        "spot light angle {angle} is not in (0, 90]"
                    )));
                }
            }
        }

        let points = triangles.iter().flat_map(Triangle::points).collect::<Vec<_>>();
        let bounds = Aabb::from_points(&points);
        Ok(Scene {
            camera,
            materials,
            triangles,
            lights,
            bounds,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Scene> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "failed to read scene");
        })?;
        Self::from_json_str(&json)
    }

    pub fn from_json_str(json: &str) -> Result<Scene> {
        let scene = serde_json::from_str::<SceneFile>(json)
            .map_err(Error::from)
            .and_then(SceneFile::into_scene);
        match scene {
            Ok(scene) => {
                tracing::info!(
                    triangles = scene.triangles.len(),
                    lights = scene.lights.len(),
                    materials = scene.materials.len(),
                    "loaded scene"
                );
                Ok(scene)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to parse scene");
                Err(e)
            }
        }
    }
}

impl SceneProvider for Scene {
    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn lights(&self) -> &[Light] {
        &self.lights
    }

    fn camera(&self) -> CameraSnapshot {
        self.camera
    }

    fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    fn materials(&self) -> &[Material] {
        &self.materials
    }
}

fn default_up() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}

fn default_fov() -> f32 {
    45.0
}

fn default_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CameraDesc {
    eye: [f32; 3],
    look_at: [f32; 3],
    #[serde(default = "default_up")]
    up: [f32; 3],
    #[serde(default = "default_fov")]
    fov: f32,
}

#[derive(Deserialize)]
struct MaterialDesc {
    name: String,
    base_color: [f32; 3],
}

#[derive(Deserialize)]
struct Placement {
    #[serde(default)]
    position: [f32; 3],
    // euler angles in degrees
    #[serde(default)]
    rotation: [f32; 3],
    #[serde(default = "default_scale")]
    scale: [f32; 3],
}

impl Placement {
    fn apply(&self, p: Point3<f32>) -> Point3<f32> {
        let rotation = Rotation3::from_euler_angles(
            utils::deg2rad(self.rotation[0]),
            utils::deg2rad(self.rotation[1]),
            utils::deg2rad(self.rotation[2]),
        );
        let scaled = p.coords.component_mul(&Vector3::from(self.scale));
        Point3::from(rotation * scaled + Vector3::from(self.position))
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PrimitiveDesc {
    // unit cube centred on the origin
    Cube {
        material: String,
        #[serde(flatten)]
        placement: Placement,
    },
    // unit square in the xz plane centred on the origin, facing +y
    Plane {
        material: String,
        #[serde(flatten)]
        placement: Placement,
    },
    Mesh {
        material: String,
        vertices: Vec<[f32; 3]>,
        indices: Vec<[u32; 3]>,
        #[serde(flatten)]
        placement: Placement,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LightDesc {
    Point {
        position: [f32; 3],
        color: [f32; 3],
        intensity: f32,
    },
    Spot {
        position: [f32; 3],
        direction: [f32; 3],
        angle: f32,
        color: [f32; 3],
        intensity: f32,
    },
    Area {
        position: [f32; 3],
        u: [f32; 3],
        v: [f32; 3],
        color: [f32; 3],
        intensity: f32,
    },
}

impl From<LightDesc> for Light {
    fn from(desc: LightDesc) -> Light {
        match desc {
            LightDesc::Point {
                position,
                color,
                intensity,
            } => Light::Point {
                position: position.into(),
                color: color.into(),
                intensity,
            },
            LightDesc::Spot {
                position,
                direction,
                angle,
                color,
                intensity,
            } => Light::Spot {
                position: position.into(),
                direction: Vector3::from(direction).normalize(),
                angle,
                color: color.into(),
                intensity,
            },
            LightDesc::Area {
                position,
                u,
                v,
                color,
                intensity,
            } => Light::Area {
                position: position.into(),
                u: u.into(),
                v: v.into(),
                color: color.into(),
                intensity,
            },
        }
    }
}

#[derive(Deserialize)]
struct SceneFile {
    camera: CameraDesc,
    materials: Vec<MaterialDesc>,
    primitives: Vec<PrimitiveDesc>,
    lights: Vec<LightDesc>,
}

impl SceneFile {
    fn into_scene(self) -> Result<Scene> {
        let materials = self
            .materials
            .into_iter()
            .map(|m| Material {
                name: m.name,
                albedo: m.base_color.into(),
            })
            .collect::<Vec<_>>();
        let material_id = |name: &str| -> Result<u32> {
            materials
                .iter()
                .position(|m| m.name == name)
                .map(|i| i as u32)
                .ok_or_else(|| Error::scene(format!("unknown material '{name}'")))
        };

        let mut triangles = vec![];
        for primitive in &self.primitives {
            match primitive {
                PrimitiveDesc::Cube {
                    material,
                    placement,
                } => {
                    let vertexes = utils::unitcube(material_id(material)?);
                    triangles.extend(transform(&Triangle::from_vertexes(&vertexes), placement));
                }
                PrimitiveDesc::Plane {
                    material,
                    placement,
                } => {
                    let vertexes = utils::quad(
                        Point3::new(-0.5, 0.0, -0.5),
                        Vector3::new(0.0, 0.0, 1.0),
                        Vector3::new(1.0, 0.0, 0.0),
                        material_id(material)?,
                    );
                    triangles.extend(transform(&Triangle::from_vertexes(&vertexes), placement));
                }
                PrimitiveDesc::Mesh {
                    material,
                    vertices,
                    indices,
                    placement,
                } => {
                    let material = material_id(material)?;
                    let mut mesh = Vec::with_capacity(indices.len());
                    for &[a, b, c] in indices {
                        let vertex = |i: u32| {
                            vertices.get(i as usize).copied().ok_or_else(|| {
                                Error::scene(format!(
                                    "mesh index {i} out of range for {} vertices",
                                    vertices.len()
                                ))
                            })
                        };
                        mesh.push(Triangle::new(
                            vertex(a)?.into(),
                            vertex(b)?.into(),
                            vertex(c)?.into(),
                            material,
                        ));
                    }
                    triangles.extend(transform(&mesh, placement));
                }
            }
        }

        let camera = LookAtCamera::new(
            self.camera.eye.into(),
            self.camera.look_at.into(),
            self.camera.up.into(),
            self.camera.fov,
        );
        let lights = self.lights.into_iter().map(Light::from).collect();
        Scene::new(camera.snapshot(), materials, triangles, lights)
    }
}

fn transform<'a>(
    triangles: &'a [Triangle],
    placement: &'a Placement,
) -> impl Iterator<Item = Triangle> + 'a {
    triangles.iter().map(move |t| {
        Triangle::new(
            placement.apply(t.v0),
            placement.apply(t.v1),
            placement.apply(t.v2),
            t.material,
        )
    })
}
