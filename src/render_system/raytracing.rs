use nalgebra::{Point3, Vector3};

use crate::render_system::{
    bvh::{BvhNode, build::build_bvh},
    vertex::Triangle,
};

// hits closer than this are treated as self intersections
const T_MIN: f32 = 1e-4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Ray {
        Ray { origin, direction }
    }

    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hit {
    pub position: Point3<f32>,
    // flipped to face the incoming ray
    pub normal: Vector3<f32>,
    pub material: u32,
    pub distance: f32,
}

pub trait RayTracingEngine: Send + Sync {
    /// Closest intersection along the ray, if any.
    fn trace(&self, ray: &Ray) -> Option<Hit>;
}

pub struct BvhRayTracer {
    triangles: Vec<Triangle>,
    nodes: Vec<BvhNode>,
}

impl BvhRayTracer {
    pub fn new(triangles: Vec<Triangle>) -> BvhRayTracer {
        let nodes = build_bvh(&triangles);
        BvhRayTracer { triangles, nodes }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

// Möller-Trumbore, returns the distance along the ray
fn intersect_triangle(ray: &Ray, tri: &Triangle) -> Option<f32> {
    let e1 = tri.v1 - tri.v0;
    let e2 = tri.v2 - tri.v0;
    let p = ray.direction.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < 1e-8 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - tri.v0;
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(&e1);
    let v = ray.direction.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(&q) * inv_det;
    (t > T_MIN).then_some(t)
}

impl RayTracingEngine for BvhRayTracer {
    fn trace(&self, ray: &Ray) -> Option<Hit> {
        if self.nodes.is_empty() {
            return None;
        }
        let inv_dir = ray.direction.map(|d| 1.0 / d);

        let mut closest: Option<(f32, u32)> = None;
        let mut stack = vec![0u32];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            let t_max = closest.map_or(f32::MAX, |(t, _)| t);
            if node.aabb().intersect_ray(&ray.origin, &inv_dir, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let prim_idx = node.right_node_idx_or_prim_idx;
                if let Some(t) = intersect_triangle(ray, &self.triangles[prim_idx as usize]) {
                    if t < t_max {
                        closest = Some((t, prim_idx));
                    }
                }
            } else {
                stack.push(node.left_node_idx);
                stack.push(node.right_node_idx_or_prim_idx);
            }
        }

        closest.map(|(t, prim_idx)| {
            let tri = &self.triangles[prim_idx as usize];
            let mut normal = tri.geometric_normal();
            if normal.dot(&ray.direction) > 0.0 {
                normal = -normal;
            }
            Hit {
                position: ray.at(t),
                normal,
                material: tri.material,
                distance: t,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    fn tracer() -> BvhRayTracer {
        let mut vertexes = utils::cuboid(Point3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 2.0, 2.0), 1);
        vertexes.extend(utils::cuboid(
            Point3::new(0.0, 0.0, 5.0),
            Vector3::new(2.0, 2.0, 2.0),
            2,
        ));
        BvhRayTracer::new(Triangle::from_vertexes(&vertexes))
    }

    #[test]
    fn closest_hit_wins() {
        let tracer = tracer();
        let hit = tracer
            .trace(&Ray::new(Point3::new(0.2, 0.3, 10.0), Vector3::new(0.0, 0.0, -1.0)))
            .unwrap();
        assert_eq!(hit.material, 2);
        assert!((hit.distance - 4.0).abs() < 1e-4);
        assert!((hit.normal - Vector3::new(0.0, 0.0, 1.0)).norm() < 1e-5);
    }

    #[test]
    fn normal_faces_the_ray() {
        let tracer = tracer();
        // from inside the first box towards -x
        let hit = tracer
            .trace(&Ray::new(Point3::new(0.0, 0.1, 0.2), Vector3::new(-1.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(hit.material, 1);
        assert!((hit.position.x + 1.0).abs() < 1e-4);
        assert!(hit.normal.dot(&Vector3::new(-1.0, 0.0, 0.0)) < 0.0);
    }

    #[test]
    fn misses() {
        let tracer = tracer();
        assert!(tracer
            .trace(&Ray::new(Point3::new(5.0, 5.0, 5.0), Vector3::new(0.0, 1.0, 0.0)))
            .is_none());
        assert!(BvhRayTracer::new(vec![])
            .trace(&Ray::new(Point3::origin(), Vector3::new(1.0, 0.0, 0.0)))
            .is_none());
    }
}
