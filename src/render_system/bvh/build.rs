use nalgebra::{Point3, vector};

use crate::render_system::{
    bvh::{BvhNode, aabb::Aabb},
    vertex::Triangle,
};

#[derive(Clone, Debug)]
struct BuildBvhLeaf {
    first_prim_idx_idx: usize,
    prim_count: usize,
}

#[derive(Clone, Debug)]
struct BuildBvhInternalNode {
    left_child_idx: usize,
    right_child_idx: usize,
}

#[derive(Clone, Debug)]
enum BuildBvhNodeKind {
    Leaf(BuildBvhLeaf),
    InternalNode(BuildBvhInternalNode),
}

#[derive(Clone, Debug)]
struct BuildBvhNode {
    aabb: Aabb,
    kind: BuildBvhNodeKind,
}

fn leaf_bounds(leaf: &BuildBvhLeaf, prim_idxs: &[usize], prim_aabbs: &[Aabb]) -> Aabb {
    let mut bound = Aabb::Empty;
    for &prim_idx in &prim_idxs[leaf.first_prim_idx_idx..(leaf.first_prim_idx_idx + leaf.prim_count)]
    {
        bound = Aabb::union(&bound, &prim_aabbs[prim_idx]);
    }
    bound
}

fn find_best_plane(
    leaf: &BuildBvhLeaf,
    prim_idxs: &[usize],
    prim_centroids: &[Point3<f32>],
    prim_aabbs: &[Aabb],
    cost_function: &impl Fn(&Aabb, &Aabb, usize, usize) -> f32,
) -> (usize, f32) {
    const BINS: usize = 32;

    let leaf_prims = &prim_idxs[leaf.first_prim_idx_idx..(leaf.first_prim_idx_idx + leaf.prim_count)];

    let mut best_cost = f32::MAX;
    let mut best_dimension = 0;
    let mut best_split_pos = 0.0;

    for dimension in 0..3 {
        // find the bounds over the centroids of all the primitives
        let mut bounds_min = f32::MAX;
        let mut bounds_max = f32::MIN;
        for &prim_idx in leaf_prims {
            let centroid = &prim_centroids[prim_idx];
            bounds_min = bounds_min.min(centroid[dimension]);
            bounds_max = bounds_max.max(centroid[dimension]);
        }

        // all centroids coincide on this axis, no plane separates them
        if bounds_max <= bounds_min {
            continue;
        }

        // the bounding box of each bin
        let mut bin_bounds = [Aabb::Empty; BINS];
        // the number of primitives in each bin
        let mut bin_primcount = [0; BINS];

        // assign each triangle to a bin
        let scale = BINS as f32 / (bounds_max - bounds_min);
        for &prim_idx in leaf_prims {
            let prim_centroid = &prim_centroids[prim_idx];
            let bin_idx = usize::min(
                BINS - 1,
                ((prim_centroid[dimension] - bounds_min) * scale) as usize,
            );
            bin_primcount[bin_idx] += 1;
            bin_bounds[bin_idx] = Aabb::union(&bin_bounds[bin_idx], &prim_aabbs[prim_idx]);
        }

        // there are BINS - 1 possible splits
        // 1 plane between every two bins
        let mut plane_aabb_to_left = [Aabb::Empty; BINS - 1];
        let mut plane_aabb_to_right = [Aabb::Empty; BINS - 1];
        let mut plane_primcount_to_left = [0; BINS - 1];
        let mut plane_primcount_to_right = [0; BINS - 1];

        let mut aabb_to_left = Aabb::Empty;
        let mut aabb_to_right = Aabb::Empty;
        let mut primcount_to_left = 0;
        let mut primcount_to_right = 0;

        for plane in 0..(BINS - 1) {
            primcount_to_left += bin_primcount[plane];
            plane_primcount_to_left[plane] = primcount_to_left;
            aabb_to_left = Aabb::union(&aabb_to_left, &bin_bounds[plane]);
            plane_aabb_to_left[plane] = aabb_to_left;

            primcount_to_right += bin_primcount[BINS - 1 - plane];
            plane_primcount_to_right[BINS - 2 - plane] = primcount_to_right;
            aabb_to_right = Aabb::union(&aabb_to_right, &bin_bounds[BINS - 1 - plane]);
            plane_aabb_to_right[BINS - 2 - plane] = aabb_to_right;
        }

        let scale = (bounds_max - bounds_min) / BINS as f32;

        for plane in 0..(BINS - 1) {
            let cost = cost_function(
                &plane_aabb_to_left[plane],
                &plane_aabb_to_right[plane],
                plane_primcount_to_left[plane],
                plane_primcount_to_right[plane],
            );
            if cost < best_cost {
                best_cost = cost;
                best_dimension = dimension;
                best_split_pos = bounds_min + (plane as f32 + 1.0) * scale;
            }
        }
    }
    (best_dimension, best_split_pos)
}

fn subdivide(
    node_idx: usize,
    prim_idxs: &mut [usize],
    prim_aabbs: &[Aabb],
    prim_centroids: &[Point3<f32>],
    nodes: &mut Vec<BuildBvhNode>,
    cost_function: &impl Fn(&Aabb, &Aabb, usize, usize) -> f32,
) {
    let BuildBvhNodeKind::Leaf(leaf) = nodes[node_idx].kind.clone() else {
        return;
    };
    if leaf.prim_count < 2 {
        return;
    }

    let left_count = if leaf.prim_count == 2 {
        1
    } else {
        // get best plane to split along
        let (dimension, split_pos) =
            find_best_plane(&leaf, prim_idxs, prim_centroids, prim_aabbs, cost_function);

        // partition the primitives in place by modifying prim_idxs
        let (left, right) = partition::partition(
            &mut prim_idxs[leaf.first_prim_idx_idx..(leaf.first_prim_idx_idx + leaf.prim_count)],
            |&prim_idx| prim_centroids[prim_idx][dimension] < split_pos,
        );

        // if one of the subdivisions is empty then we fall back to splitting down the middle
        if left.is_empty() || right.is_empty() {
            tracing::trace!(prim_count = leaf.prim_count, "falling back to median split");
            leaf.prim_count / 2
        } else {
            left.len()
        }
    };

    let left_leaf = BuildBvhLeaf {
        first_prim_idx_idx: leaf.first_prim_idx_idx,
        prim_count: left_count,
    };
    let right_leaf = BuildBvhLeaf {
        first_prim_idx_idx: leaf.first_prim_idx_idx + left_count,
        prim_count: leaf.prim_count - left_count,
    };

    // insert children
    let left_child_idx = insert_leaf_node(left_leaf, nodes, prim_idxs, prim_aabbs);
    let right_child_idx = insert_leaf_node(right_leaf, nodes, prim_idxs, prim_aabbs);

    // recurse
    subdivide(
        left_child_idx,
        prim_idxs,
        prim_aabbs,
        prim_centroids,
        nodes,
        cost_function,
    );
    subdivide(
        right_child_idx,
        prim_idxs,
        prim_aabbs,
        prim_centroids,
        nodes,
        cost_function,
    );

    nodes[node_idx].kind = BuildBvhNodeKind::InternalNode(BuildBvhInternalNode {
        left_child_idx,
        right_child_idx,
    });
}

fn insert_leaf_node(
    leaf: BuildBvhLeaf,
    nodes: &mut Vec<BuildBvhNode>,
    prim_idxs: &[usize],
    prim_aabbs: &[Aabb],
) -> usize {
    let node_idx = nodes.len();
    nodes.push(BuildBvhNode {
        aabb: leaf_bounds(&leaf, prim_idxs, prim_aabbs),
        kind: BuildBvhNodeKind::Leaf(leaf),
    });
    node_idx
}

// root is node 0 and every node appears before its children
#[tracing::instrument(skip_all, fields(tri_count = triangles.len()))]
pub fn build_bvh(triangles: &[Triangle]) -> Vec<BvhNode> {
    let n_prims = triangles.len();
    if n_prims == 0 {
        return vec![];
    }

    let mut prim_idxs = (0..n_prims).collect::<Vec<_>>();

    let prim_aabbs = triangles
        .iter()
        .map(|tri| Aabb::from_points(&tri.points()))
        .collect::<Vec<_>>();

    let prim_centroids = triangles.iter().map(Triangle::centroid).collect::<Vec<_>>();

    let mut nodes = vec![];

    // create root node
    let root_node_idx = insert_leaf_node(
        BuildBvhLeaf {
            first_prim_idx_idx: 0,
            prim_count: n_prims,
        },
        &mut nodes,
        &prim_idxs,
        &prim_aabbs,
    );

    // surface area metric
    fn cost_function(aabb1: &Aabb, aabb2: &Aabb, count1: usize, count2: usize) -> f32 {
        aabb1.area() * count1 as f32 + aabb2.area() * count2 as f32
    }

    subdivide(
        root_node_idx,
        &mut prim_idxs,
        &prim_aabbs,
        &prim_centroids,
        &mut nodes,
        &cost_function,
    );

    // flat triangles have zero thickness on one axis
    let padding = vector![0.0001, 0.0001, 0.0001];

    let opt_bvh = nodes
        .into_iter()
        .map(|node| match node.kind {
            BuildBvhNodeKind::Leaf(ref leaf) => {
                let prim_idx = prim_idxs[leaf.first_prim_idx_idx];
                BvhNode {
                    left_node_idx: u32::MAX,
                    right_node_idx_or_prim_idx: prim_idx as u32,
                    min: node.aabb.min() - padding,
                    max: node.aabb.max() + padding,
                }
            }
            BuildBvhNodeKind::InternalNode(ref internal_node) => BvhNode {
                left_node_idx: internal_node.left_child_idx as u32,
                right_node_idx_or_prim_idx: internal_node.right_child_idx as u32,
                min: node.aabb.min() - padding,
                max: node.aabb.max() + padding,
            },
        })
        .collect::<Vec<_>>();

    tracing::debug!(node_count = opt_bvh.len(), "built bvh");
    opt_bvh
}
