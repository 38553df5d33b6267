//! Typed, matchable error cases named by the render-core's error taxonomy.
//!
//! Everything that a caller might need to pattern-match on (capacity limits,
//! format mismatches) lives here as a [`RenderError`] variant. Boundary
//! failures that only ever need to be logged or propagated (file I/O, JSON
//! parsing, image codecs) stay as `anyhow::Error` with `.context(..)` attached
//! at the call site, rather than being wrapped in new variants.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The packed octree variant exhausted its internal palette-id space.
    /// The caller should retry scene load with the node variant.
    #[error("octree exceeded the packed variant's id space ({count} ids)")]
    OctreeTooBig { count: u32 },

    /// A world bounding box requires more octree depth than is supported.
    #[error("octree depth {depth} exceeds the supported maximum ({max})")]
    OctreeTooDeep { depth: u32, max: u32 },

    /// A render dump's declared dimensions don't match the scene being loaded into.
    #[error(
        "dump dimensions {found_w}x{found_h} do not match scene dimensions {expected_w}x{expected_h}"
    )]
    DumpDimensionMismatch {
        expected_w: u32,
        expected_h: u32,
        found_w: u32,
        found_h: u32,
    },

    /// Neither the versioned magic nor a valid gzip stream was found.
    #[error("unrecognized render dump format")]
    DumpFormatUnrecognized,

    /// The versioned dump header named a version this build doesn't understand.
    #[error("unsupported dump format version: {0}")]
    UnsupportedDumpVersion(u32),

    /// The scene description named an `sdfVersion` this build doesn't understand.
    #[error("unsupported scene description format version: {0}")]
    UnsupportedSdfVersion(u32),

    /// A state-machine transition was requested that isn't legal from the current state.
    #[error("illegal render-state transition: {from:?} -> {attempted:?}")]
    IllegalTransition {
        from: crate::scene::RenderState,
        attempted: crate::scene::RenderState,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
