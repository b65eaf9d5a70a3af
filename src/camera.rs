use nalgebra::{Point2, Point3, Vector3};

use crate::{render_system::raytracing::Ray, utils};

// vectors giving the current perception of the camera
#[derive(Clone, Debug)]
struct DirVecs {
    front: Vector3<f32>,
    right: Vector3<f32>,
    up: Vector3<f32>,
}

impl DirVecs {
    fn new(worldup: Vector3<f32>, pitch: f32, yaw: f32) -> DirVecs {
        let front = Vector3::new(
            yaw.cos() * pitch.cos(),
            pitch.sin(),
            yaw.sin() * pitch.cos(),
        )
        .normalize();
        DirVecs::from_front(worldup, front)
    }

    fn from_front(worldup: Vector3<f32>, front: Vector3<f32>) -> DirVecs {
        let front = front.normalize();
        let right = front.cross(&worldup).normalize();
        let up = right.cross(&front).normalize();
        DirVecs { front, right, up }
    }
}

// two equal snapshots produce the same primary rays
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSnapshot {
    pub eye: Point3<f32>,
    pub front: Vector3<f32>,
    pub right: Vector3<f32>,
    pub up: Vector3<f32>,
    // vertical, radians
    pub fov: f32,
}

impl CameraSnapshot {
    fn tan_half_fov(&self) -> f32 {
        (self.fov * 0.5).tan()
    }

    // y grows downwards
    pub fn primary_ray(&self, x: u32, y: u32, extent: [u32; 2]) -> Ray {
        let uv = utils::screen_to_uv(Point2::new(x as f32 + 0.5, y as f32 + 0.5), extent);
        let aspect = extent[0] as f32 / extent[1] as f32;
        let t = self.tan_half_fov();
        let direction =
            (uv.x * aspect * t * self.right - uv.y * t * self.up + self.front).normalize();
        Ray::new(self.eye, direction)
    }

    // None behind the camera or outside the target
    pub fn project(&self, point: &Point3<f32>, extent: [u32; 2]) -> Option<[u32; 2]> {
        let d = point - self.eye;
        let z = d.dot(&self.front);
        if z <= 0.0 {
            return None;
        }
        let aspect = extent[0] as f32 / extent[1] as f32;
        let t = self.tan_half_fov();
        let uv = Point2::new(
            d.dot(&self.right) / (z * t * aspect),
            -d.dot(&self.up) / (z * t),
        );
        let screen = utils::uv_to_screen(uv, extent);
        if screen.x < 0.0
            || screen.y < 0.0
            || screen.x >= extent[0] as f32
            || screen.y >= extent[1] as f32
        {
            return None;
        }
        Some([screen.x as u32, screen.y as u32])
    }
}

pub trait Camera {
    fn eye_front_right_up(&self) -> (Point3<f32>, Vector3<f32>, Vector3<f32>, Vector3<f32>);
    fn fov(&self) -> f32;

    fn snapshot(&self) -> CameraSnapshot {
        let (eye, front, right, up) = self.eye_front_right_up();
        CameraSnapshot {
            eye,
            front,
            right,
            up,
            fov: self.fov(),
        }
    }
}

// fixed camera looking from `eye` towards a target
#[derive(Clone, Debug)]
pub struct LookAtCamera {
    eye: Point3<f32>,
    vecs: DirVecs,
    fov: f32,
}

impl LookAtCamera {
    pub fn new(
        eye: Point3<f32>,
        look_at: Point3<f32>,
        worldup: Vector3<f32>,
        fov_degrees: f32,
    ) -> LookAtCamera {
        LookAtCamera {
            eye,
            vecs: DirVecs::from_front(worldup, look_at - eye),
            fov: utils::deg2rad(fov_degrees),
        }
    }
}

impl Camera for LookAtCamera {
    fn eye_front_right_up(&self) -> (Point3<f32>, Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        (self.eye, self.vecs.front, self.vecs.right, self.vecs.up)
    }

    fn fov(&self) -> f32 {
        self.fov
    }
}

// orbits around the root point at a fixed offset
#[derive(Clone, Debug)]
pub struct SphericalCamera {
    // position of the camera's root point
    root_pos: Point3<f32>,
    worldup: Vector3<f32>,
    // distance from the root position
    offset: f32,
    pitch: f32,
    yaw: f32,
    fov: f32,
}

impl SphericalCamera {
    pub fn new(root_pos: Point3<f32>, offset: f32, fov_degrees: f32) -> SphericalCamera {
        SphericalCamera {
            root_pos,
            worldup: Vector3::new(0.0, 1.0, 0.0),
            offset,
            pitch: 0.0,
            yaw: 0.0,
            fov: utils::deg2rad(fov_degrees),
        }
    }

    pub fn looking_at(eye: Point3<f32>, look_at: Point3<f32>, fov_degrees: f32) -> SphericalCamera {
        let d = look_at - eye;
        let mut camera = SphericalCamera::new(look_at, d.norm(), fov_degrees);
        let front = d.normalize();
        camera.pitch = front.y.clamp(-1.0, 1.0).asin();
        camera.yaw = front.z.atan2(front.x);
        camera.clamp_pitch();
        camera
    }

    fn clamp_pitch(&mut self) {
        self.pitch = self.pitch.clamp(-utils::deg2rad(89.0), utils::deg2rad(89.0));
    }

    pub fn orbit(&mut self, dyaw: f32, dpitch: f32) {
        self.yaw += dyaw;
        self.pitch += dpitch;
        self.clamp_pitch();
    }
}

impl Camera for SphericalCamera {
    // returns eye, front, right, up
    fn eye_front_right_up(&self) -> (Point3<f32>, Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        let vecs = DirVecs::new(self.worldup, self.pitch, self.yaw);
        let eye = self.root_pos - self.offset * vecs.front;
        (eye, vecs.front, vecs.right, vecs.up)
    }

    fn fov(&self) -> f32 {
        self.fov
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraSnapshot {
        LookAtCamera::new(
            Point3::new(0.0, 1.0, 5.0),
            Point3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            60.0,
        )
        .snapshot()
    }

    #[test]
    fn basis_is_right_handed() {
        let camera = camera();
        assert!((camera.front - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-6);
        assert!((camera.right - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-6);
        assert!((camera.up - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-6);
    }

    #[test]
    fn top_left_pixel_looks_up_and_left() {
        let ray = camera().primary_ray(0, 0, [64, 48]);
        assert!(ray.direction.x < 0.0);
        assert!(ray.direction.y > 0.0);
        assert!((ray.direction.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn project_inverts_primary_ray() {
        let camera = camera();
        let extent = [64, 48];
        for (x, y) in [(0, 0), (10, 20), (63, 47), (32, 24)] {
            let ray = camera.primary_ray(x, y, extent);
            assert_eq!(camera.project(&ray.at(3.0), extent), Some([x, y]));
        }
        assert_eq!(camera.project(&Point3::new(0.0, 1.0, 10.0), extent), None);
        assert_eq!(camera.project(&Point3::new(100.0, 1.0, 0.0), extent), None);
    }

    #[test]
    fn spherical_camera_matches_look_at() {
        let eye = Point3::new(0.0, 1.0, 5.0);
        let target = Point3::new(0.0, 1.0, 0.0);
        let orbit = SphericalCamera::looking_at(eye, target, 60.0).snapshot();
        let fixed = camera();
        assert!((orbit.eye - fixed.eye).norm() < 1e-5);
        assert!((orbit.front - fixed.front).norm() < 1e-5);
        assert!((orbit.right - fixed.right).norm() < 1e-5);
    }

    #[test]
    fn orbit_keeps_distance_and_clamps_pitch() {
        let target = Point3::new(1.0, 2.0, 3.0);
        let mut camera = SphericalCamera::new(target, 4.0, 45.0);
        camera.orbit(0.7, 10.0);
        let snapshot = camera.snapshot();
        assert!(((snapshot.eye - target).norm() - 4.0).abs() < 1e-4);
        assert!(snapshot.front.y <= utils::deg2rad(89.0).sin() + 1e-6);
    }
}
