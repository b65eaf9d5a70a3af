use nalgebra::{Point3, Vector3};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex3D {
    pub position: [f32; 3],
    // index into the scene's material table
    pub t: u32,
}

impl Vertex3D {
    pub fn new(position: [f32; 3], t: u32) -> Vertex3D {
        Vertex3D { position, t }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub v0: Point3<f32>,
    pub v1: Point3<f32>,
    pub v2: Point3<f32>,
    pub material: u32,
}

impl Triangle {
    pub fn new(v0: Point3<f32>, v1: Point3<f32>, v2: Point3<f32>, material: u32) -> Triangle {
        Triangle {
            v0,
            v1,
            v2,
            material,
        }
    }

    // groups a flat triangle list into triangles, taking the material of the first vertex
    pub fn from_vertexes(vertexes: &[Vertex3D]) -> Vec<Triangle> {
        vertexes
            .chunks_exact(3)
            .map(|c| {
                Triangle::new(
                    c[0].position.into(),
                    c[1].position.into(),
                    c[2].position.into(),
                    c[0].t,
                )
            })
            .collect()
    }

    pub fn geometric_normal(&self) -> Vector3<f32> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0)).normalize()
    }

    pub fn centroid(&self) -> Point3<f32> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    pub fn points(&self) -> [Point3<f32>; 3] {
        [self.v0, self.v1, self.v2]
    }
}
