//! BVH construction: one binary tree per entity, built once at scene load
//! per SPEC_FULL.md §4.2. Split heuristic is a surface-area-weighted
//! midpoint on the box's longest axis — a cheap approximation of full SAH
//! binning that still avoids the pathological splits a plain median would
//! produce on clustered geometry.

use super::aabb::Aabb;
use super::triangle::Triangle;

pub const LEAF_CAPACITY: usize = 4;

#[derive(Debug, Clone)]
pub enum BvhNode {
    Leaf {
        bbox: Aabb,
        /// Indices into the [`Bvh`]'s triangle list.
        primitives: Vec<u32>,
    },
    Internal {
        bbox: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    pub fn bbox(&self) -> Aabb {
        match self {
            BvhNode::Leaf { bbox, .. } => *bbox,
            BvhNode::Internal { bbox, .. } => *bbox,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bvh {
    pub triangles: Vec<Triangle>,
    pub root: Option<BvhNode>,
}

impl Bvh {
    pub fn build(triangles: Vec<Triangle>) -> Self {
        if triangles.is_empty() {
            return Bvh {
                triangles,
                root: None,
            };
        }
        let indices: Vec<u32> = (0..triangles.len() as u32).collect();
        let root = build_node(&triangles, indices);
        Bvh {
            triangles,
            root: Some(root),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

fn bounds_of(triangles: &[Triangle], indices: &[u32]) -> Aabb {
    indices
        .iter()
        .fold(Aabb::EMPTY, |acc, &i| acc.union(triangles[i as usize].aabb()))
}

fn centroid_bounds_of(triangles: &[Triangle], indices: &[u32]) -> Aabb {
    let mut b = Aabb::EMPTY;
    for &i in indices {
        b = b.grow(triangles[i as usize].centroid());
    }
    b
}

fn build_node(triangles: &[Triangle], mut indices: Vec<u32>) -> BvhNode {
    let bbox = bounds_of(triangles, &indices);

    if indices.len() <= LEAF_CAPACITY {
        return BvhNode::Leaf {
            bbox,
            primitives: indices,
        };
    }

    let centroid_bounds = centroid_bounds_of(triangles, &indices);
    let axis = centroid_bounds.longest_axis();
    let axis_extent = centroid_bounds.extent().component(axis);

    if axis_extent <= f32::EPSILON {
        // All centroids coincide on this axis: an SAH split can't separate
        // them, so fall back to an even count split to guarantee progress.
        let mid = indices.len() / 2;
        indices.select_nth_unstable_by(mid, |&a, &b| {
            let ca = triangles[a as usize].centroid().component(axis);
            let cb = triangles[b as usize].centroid().component(axis);
            ca.partial_cmp(&cb).unwrap()
        });
        let right = indices.split_off(mid);
        return BvhNode::Internal {
            bbox,
            left: Box::new(build_node(triangles, indices)),
            right: Box::new(build_node(triangles, right)),
        };
    }

    indices.sort_by(|&a, &b| {
        let ca = triangles[a as usize].centroid().component(axis);
        let cb = triangles[b as usize].centroid().component(axis);
        ca.partial_cmp(&cb).unwrap()
    });

    const BUCKETS: usize = 12;
    let min = centroid_bounds.min.component(axis);
    let bucket_of = |t: &Triangle| -> usize {
        let rel = (t.centroid().component(axis) - min) / axis_extent;
        ((rel * BUCKETS as f32) as usize).min(BUCKETS - 1)
    };

    let mut bucket_count = [0usize; BUCKETS];
    let mut bucket_bounds = [Aabb::EMPTY; BUCKETS];
    for &i in &indices {
        let tri = &triangles[i as usize];
        let b = bucket_of(tri);
        bucket_count[b] += 1;
        bucket_bounds[b] = bucket_bounds[b].union(tri.aabb());
    }

    let mut best_split = None;
    let mut best_cost = f32::INFINITY;
    for split in 1..BUCKETS {
        let left_boxes = &bucket_bounds[..split];
        let left_counts = &bucket_count[..split];
        let right_boxes = &bucket_bounds[split..];
        let right_counts = &bucket_count[split..];

        let left_n: usize = left_counts.iter().sum();
        let right_n: usize = right_counts.iter().sum();
        if left_n == 0 || right_n == 0 {
            continue;
        }
        let left_area = left_boxes.iter().fold(Aabb::EMPTY, |a, b| a.union(*b)).surface_area();
        let right_area = right_boxes.iter().fold(Aabb::EMPTY, |a, b| a.union(*b)).surface_area();
        let cost = left_area * left_n as f32 + right_area * right_n as f32;
        if cost < best_cost {
            best_cost = cost;
            best_split = Some(split);
        }
    }

    let split_bucket = best_split.unwrap_or(BUCKETS / 2);
    let split_pos = indices
        .iter()
        .position(|&i| bucket_of(&triangles[i as usize]) >= split_bucket)
        .unwrap_or(indices.len() / 2)
        .max(1)
        .min(indices.len() - 1);

    let right = indices.split_off(split_pos);
    BvhNode::Internal {
        bbox,
        left: Box::new(build_node(triangles, indices)),
        right: Box::new(build_node(triangles, right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ray::Vec3;

    fn tri_at(x: f32) -> Triangle {
        Triangle {
            v0: Vec3::new(x, 0.0, 0.0),
            v1: Vec3::new(x + 1.0, 0.0, 0.0),
            v2: Vec3::new(x, 1.0, 0.0),
            uv0: (0.0, 0.0),
            uv1: (1.0, 0.0),
            uv2: (0.0, 1.0),
            material_id: 0,
        }
    }

    #[test]
    fn empty_triangle_list_builds_empty_bvh() {
        let bvh = Bvh::build(Vec::new());
        assert!(bvh.is_empty());
    }

    #[test]
    fn small_triangle_list_builds_single_leaf() {
        let tris: Vec<Triangle> = (0..3).map(|i| tri_at(i as f32)).collect();
        let bvh = Bvh::build(tris);
        match bvh.root.unwrap() {
            BvhNode::Leaf { primitives, .. } => assert_eq!(primitives.len(), 3),
            BvhNode::Internal { .. } => panic!("expected a single leaf below capacity"),
        }
    }

    #[test]
    fn large_triangle_list_splits_into_an_internal_node() {
        let tris: Vec<Triangle> = (0..40).map(|i| tri_at(i as f32 * 3.0)).collect();
        let bvh = Bvh::build(tris);
        assert!(matches!(bvh.root.unwrap(), BvhNode::Internal { .. }));
    }

    #[test]
    fn tree_covers_every_primitive_exactly_once() {
        let tris: Vec<Triangle> = (0..40).map(|i| tri_at(i as f32 * 3.0)).collect();
        let bvh = Bvh::build(tris);

        fn collect(node: &BvhNode, out: &mut Vec<u32>) {
            match node {
                BvhNode::Leaf { primitives, .. } => out.extend(primitives.iter().copied()),
                BvhNode::Internal { left, right, .. } => {
                    collect(left, out);
                    collect(right, out);
                }
            }
        }
        let mut seen = Vec::new();
        collect(bvh.root.as_ref().unwrap(), &mut seen);
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<u32>>());
    }
}
