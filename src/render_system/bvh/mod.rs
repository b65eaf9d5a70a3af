use nalgebra::Point3;

use self::aabb::Aabb;

pub mod aabb;
pub mod build;

#[derive(Debug, Clone, PartialEq)]
pub struct BvhNode {
    // if this is u32::MAX, then this is a leaf node
    pub left_node_idx: u32,
    // if left_node_idx is u32::MAX, this is the index of the triangle in the scene
    // otherwise, it is the index of the right node
    pub right_node_idx_or_prim_idx: u32,
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl BvhNode {
    pub fn is_leaf(&self) -> bool {
        self.left_node_idx == u32::MAX
    }

    pub fn aabb(&self) -> Aabb {
        Aabb::NonEmpty {
            min: self.min,
            max: self.max,
        }
    }
}

impl Default for BvhNode {
    fn default() -> BvhNode {
        BvhNode {
            left_node_idx: u32::MAX,
            right_node_idx_or_prim_idx: u32::MAX,
            min: Point3::origin(),
            max: Point3::origin(),
        }
    }
}
