//! Sparse 3D voxel storage keyed by `(x, y, z)`, in octree-local coordinates
//! (the caller is responsible for translating by the scene's origin so that
//! indices are non-negative).
//!
//! Two storage variants are selectable at scene-load time: [`packed`] (array
//! of ints, cheap for uniform regions but capped in how many ids/branches it
//! can address) and [`node`] (per-leaf allocation, unbounded). Both implement
//! the same point-query/mutation contract; [`Octree`] is a thin enum over the
//! two so callers don't need to care which one a scene ended up with.

pub mod finalize;
pub mod node;
pub mod packed;
pub mod serialize;
pub mod trace;

use crate::error::RenderError;
use crate::material::ANY_TYPE;
pub use node::NodeOctree;
pub use packed::PackedOctree;
pub use trace::OctreeHit;

#[derive(Debug, Clone)]
pub enum Octree {
    Packed(PackedOctree),
    Node(NodeOctree),
}

impl Octree {
    pub fn empty_packed(depth: u32) -> Self {
        Octree::Packed(PackedOctree::new(depth))
    }

    pub fn empty_node(depth: u32) -> Self {
        Octree::Node(NodeOctree::new(depth))
    }

    pub fn depth(&self) -> u32 {
        match self {
            Octree::Packed(t) => t.depth(),
            Octree::Node(t) => t.depth(),
        }
    }

    pub fn side(&self) -> i32 {
        match self {
            Octree::Packed(t) => t.side(),
            Octree::Node(t) => t.side(),
        }
    }

    pub fn is_packed(&self) -> bool {
        matches!(self, Octree::Packed(_))
    }

    pub fn set(&mut self, ty: u32, x: i32, y: i32, z: i32) -> Result<(), RenderError> {
        match self {
            Octree::Packed(t) => t.set(ty, x, y, z),
            Octree::Node(t) => t.set(ty, x, y, z),
        }
    }

    pub fn get(&self, x: i32, y: i32, z: i32) -> u32 {
        self.get_with_size(x, y, z).0
    }

    /// Returns `(value, cell_size)`: the value at `(x,y,z)` plus the side
    /// length of the uniform region containing it, so ray traversal can skip
    /// directly to the region's exit point.
    pub fn get_with_size(&self, x: i32, y: i32, z: i32) -> (u32, i32) {
        match self {
            Octree::Packed(t) => t.get_with_size(x, y, z),
            Octree::Node(t) => t.get_with_size(x, y, z),
        }
    }

    /// Marks the start of a finalization batch (see [`finalize`]). The
    /// packed/node representations have no interior mutable caches, so this
    /// is documentation of intent rather than state; kept as an explicit
    /// call so callers match the contract of §4.1/§4.4 (no concurrent
    /// readers during finalization).
    pub fn start_finalization(&mut self) {}

    pub fn end_finalization(&mut self) {}
}

/// Builds an [`Octree`] from a list of `(type, x, y, z)` voxel writes,
/// preferring the packed variant and transparently falling back to the node
/// variant if the packed id/branch space is exhausted partway through.
pub fn build_from_voxels(depth: u32, voxels: &[(u32, i32, i32, i32)]) -> Octree {
    let mut packed = PackedOctree::new(depth);
    for &(ty, x, y, z) in voxels {
        if packed.set(ty, x, y, z).is_err() {
            let mut node = NodeOctree::new(depth);
            for &(ty, x, y, z) in voxels {
                // A node tree has no id/branch cap, so replay cannot fail.
                node.set(ty, x, y, z).expect("node octree replay is infallible");
            }
            return Octree::Node(node);
        }
    }
    Octree::Packed(packed)
}

/// Picks an octree depth for a world bounding box, per SPEC_FULL.md §4.1.
pub fn depth_for_extent(dx: u32, dy: u32, dz: u32) -> Result<u32, RenderError> {
    let max_extent = dx.max(dy).max(dz).max(1);
    let depth = (32 - (max_extent - 1).leading_zeros()).max(1);
    const MAX_DEPTH: u32 = 24;
    if depth > MAX_DEPTH {
        return Err(RenderError::OctreeTooDeep {
            depth,
            max: MAX_DEPTH,
        });
    }
    Ok(depth)
}

pub(crate) fn is_any_type(value: u32) -> bool {
    value == ANY_TYPE
}
