use nalgebra::{Point3, Vector3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Aabb {
    Empty,
    NonEmpty { min: Point3<f32>, max: Point3<f32> },
}

impl Aabb {
    pub fn from_points(points: &[Point3<f32>]) -> Aabb {
        if points.is_empty() {
            Aabb::Empty
        } else {
            let mut min = points[0];
            let mut max = points[0];
            for point in points {
                min = min.inf(point);
                max = max.sup(point);
            }
            Aabb::NonEmpty { min, max }
        }
    }

    pub fn union(a: &Aabb, b: &Aabb) -> Aabb {
        match (a, b) {
            (Aabb::Empty, _) => *b,
            (_, Aabb::Empty) => *a,
            (
                Aabb::NonEmpty {
                    min: amin,
                    max: amax,
                },
                Aabb::NonEmpty {
                    min: bmin,
                    max: bmax,
                },
            ) => Aabb::NonEmpty {
                min: amin.inf(bmin),
                max: amax.sup(bmax),
            },
        }
    }

    pub fn area(&self) -> f32 {
        match self {
            Aabb::Empty => 0.0,
            Aabb::NonEmpty { min, max } => {
                let diff = max - min;
                2.0 * (diff.x * diff.y + diff.x * diff.z + diff.y * diff.z)
            }
        }
    }

    pub fn min(&self) -> Point3<f32> {
        match self {
            Aabb::Empty => Point3::origin(),
            Aabb::NonEmpty { min, .. } => *min,
        }
    }

    pub fn max(&self) -> Point3<f32> {
        match self {
            Aabb::Empty => Point3::origin(),
            Aabb::NonEmpty { max, .. } => *max,
        }
    }

    // slab test, entry distance if the ray overlaps the box in [0, t_max]
    pub fn intersect_ray(
        &self,
        origin: &Point3<f32>,
        inv_dir: &Vector3<f32>,
        t_max: f32,
    ) -> Option<f32> {
        let Aabb::NonEmpty { min, max } = self else {
            return None;
        };
        let mut t_near = 0.0f32;
        let mut t_far = t_max;
        for axis in 0..3 {
            // ray parallel to the slab
            if inv_dir[axis].is_infinite() {
                if origin[axis] < min[axis] || origin[axis] > max[axis] {
                    return None;
                }
                continue;
            }
            let t0 = (min[axis] - origin[axis]) * inv_dir[axis];
            let t1 = (max[axis] - origin[axis]) * inv_dir[axis];
            t_near = t_near.max(t0.min(t1));
            t_far = t_far.min(t0.max(t1));
            if t_near > t_far {
                return None;
            }
        }
        Some(t_near)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_with_empty() {
        let a = Aabb::from_points(&[Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 2.0, 3.0)]);
        assert_eq!(Aabb::union(&a, &Aabb::Empty), a);
        assert_eq!(a.area(), 2.0 * (2.0 + 3.0 + 6.0));
        assert_eq!(Aabb::from_points(&[]), Aabb::Empty);
    }

    #[test]
    fn ray_slab_test() {
        let a = Aabb::from_points(&[Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0)]);
        let origin = Point3::new(0.0, 0.0, -5.0);
        let dir = Vector3::new(0.0, 0.0, 1.0);
        let inv = dir.map(|d| 1.0 / d);
        assert_eq!(a.intersect_ray(&origin, &inv, f32::MAX), Some(4.0));
        assert_eq!(a.intersect_ray(&origin, &inv, 3.0), None);

        let away = Vector3::new(0.0, 0.0, -1.0).map(|d| 1.0 / d);
        assert_eq!(a.intersect_ray(&origin, &away, f32::MAX), None);
    }
}
