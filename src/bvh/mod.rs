//! Bounding-volume hierarchy over triangle-mesh entities (SPEC_FULL.md §4.2):
//! one [`Bvh`] per entity, built once when the entity is attached to the
//! scene and treated as immutable for the lifetime of a render pass, mirroring
//! the [`crate::octree`] pair's read-mostly contract.

pub mod aabb;
pub mod build;
pub mod query;
pub mod triangle;

pub use aabb::Aabb;
pub use build::{Bvh, BvhNode, LEAF_CAPACITY};
pub use query::closest_hit;
pub use triangle::Triangle;
