use nalgebra::{Point2, Point3, Vector3};

use crate::render_system::vertex::Vertex3D;

// two triangles spanning the parallelogram at `origin` with edges `u` and `v`.
// winding gives the face normal `u x v`
pub fn quad(origin: Point3<f32>, u: Vector3<f32>, v: Vector3<f32>, material: u32) -> Vec<Vertex3D> {
    let p00 = origin;
    let p10 = origin + u;
    let p01 = origin + v;
    let p11 = origin + u + v;
    vec![
        Vertex3D::new(p00.into(), material),
        Vertex3D::new(p10.into(), material),
        Vertex3D::new(p11.into(), material),
        Vertex3D::new(p00.into(), material),
        Vertex3D::new(p11.into(), material),
        Vertex3D::new(p01.into(), material),
    ]
}

pub fn cuboid(loc: Point3<f32>, dims: Vector3<f32>, material: u32) -> Vec<Vertex3D> {
    let fx = loc[0] - 0.5 * dims[0];
    let fy = loc[1] - 0.5 * dims[1];
    let fz = loc[2] - 0.5 * dims[2];

    let v000 = Point3::new(fx, fy, fz);
    let v100 = Point3::new(fx + dims[0], fy, fz);
    let v010 = Point3::new(fx, fy + dims[1], fz);
    let v001 = Point3::new(fx, fy, fz + dims[2]);

    let x = Vector3::new(dims[0], 0.0, 0.0);
    let y = Vector3::new(0.0, dims[1], 0.0);
    let z = Vector3::new(0.0, 0.0, dims[2]);

    let mut vertexes = vec![];
    // left face
    vertexes.extend(quad(v000, z, y, material));
    // right face
    vertexes.extend(quad(v100, y, z, material));
    // lower face
    vertexes.extend(quad(v000, x, z, material));
    // upper face
    vertexes.extend(quad(v010, z, x, material));
    // back face
    vertexes.extend(quad(v000, y, x, material));
    // front face
    vertexes.extend(quad(v001, x, y, material));
    vertexes
}

pub fn unitcube(material: u32) -> Vec<Vertex3D> {
    cuboid(Point3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 1.0), material)
}

// maps a pixel coordinate to [-1, 1] on both axes
pub fn screen_to_uv(e: Point2<f32>, extent: [u32; 2]) -> Point2<f32> {
    let x = e[0] / extent[0] as f32;
    let y = e[1] / extent[1] as f32;
    Point2::new(2.0 * x - 1.0, 2.0 * y - 1.0)
}

pub fn uv_to_screen(uv: Point2<f32>, extent: [u32; 2]) -> Point2<f32> {
    Point2::new(
        (uv[0] + 1.0) * 0.5 * extent[0] as f32,
        (uv[1] + 1.0) * 0.5 * extent[1] as f32,
    )
}

// Rec. 709 luma
pub fn luminance(color: &Vector3<f32>) -> f32 {
    0.2126 * color[0] + 0.7152 * color[1] + 0.0722 * color[2]
}

pub fn deg2rad(degrees: f32) -> f32 {
    degrees * std::f32::consts::PI / 180.0
}

pub fn murmur3_combine(seed: u32, mut k: u32) -> u32 {
    k = k.wrapping_mul(0xcc9e2d51);
    k = k.rotate_left(15);
    k = k.wrapping_mul(0x1b873593);

    let mut h = seed ^ k;
    h = h.rotate_left(13);
    h.wrapping_mul(5).wrapping_add(0xe6546b64)
}

pub fn murmur3_finalize(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

// 64 bit seed for the RNG of one invocation
pub fn invocation_seed(seed: u64, idx: u32) -> u64 {
    let lo = murmur3_finalize(murmur3_combine(
        murmur3_combine(seed as u32, (seed >> 32) as u32),
        idx,
    ));
    let hi = murmur3_finalize(murmur3_combine(lo, idx ^ 0x9e3779b9));
    ((hi as u64) << 32) | lo as u64
}

pub fn next_power_of_two(n: u32) -> u32 {
    n.max(1).next_power_of_two()
}

// ceil(log2(n)), with ilog2ceil(1) == 0
pub fn ilog2ceil(n: u32) -> u32 {
    next_power_of_two(n).trailing_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuboid_faces_point_outward() {
        let vertexes = unitcube(0);
        assert_eq!(vertexes.len(), 36);
        for tri in vertexes.chunks(3) {
            let a = Point3::from(tri[0].position);
            let b = Point3::from(tri[1].position);
            let c = Point3::from(tri[2].position);
            let normal = (b - a).cross(&(c - a));
            let centroid = (a.coords + b.coords + c.coords) / 3.0;
            assert!(normal.dot(&centroid) > 0.0);
        }
    }

    #[test]
    fn uv_round_trip() {
        let extent = [640, 480];
        let p = Point2::new(123.5, 77.5);
        let back = uv_to_screen(screen_to_uv(p, extent), extent);
        assert!((back - p).norm() < 1e-3);
    }

    #[test]
    fn log2_ceil() {
        assert_eq!(ilog2ceil(1), 0);
        assert_eq!(ilog2ceil(2), 1);
        assert_eq!(ilog2ceil(5), 3);
        assert_eq!(ilog2ceil(64), 6);
        assert_eq!(next_power_of_two(0), 1);
    }

    #[test]
    fn invocation_seeds_differ() {
        assert_ne!(invocation_seed(0, 0), invocation_seed(0, 1));
        assert_ne!(invocation_seed(0, 7), invocation_seed(1, 7));
        assert_eq!(invocation_seed(42, 7), invocation_seed(42, 7));
    }
}
