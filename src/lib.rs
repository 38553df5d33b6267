//! Offline path-tracing renderer core for a voxel-world visualization system.
//!
//! The crate is organized by concern, leaf-first:
//! - [`error`]: the typed error taxonomy plus the `anyhow` boundary convention.
//! - [`material`]: the block palette and material property sheet.
//! - [`octree`]: the sparse voxel octree (packed + node variants) and its
//!   finalization pass.
//! - [`bvh`]: the bounding-volume hierarchy over triangle entities.
//! - [`camera`] / [`sun`] / [`sky`] / [`fog`]: scene-level shading inputs.
//! - [`ray`]: ray/hit types shared by both tracers.
//! - [`tracer`]: the preview shader and the path-tracing integrator.
//! - [`sample_buffer`]: the per-pixel radiance accumulator and preview framebuffer.
//! - [`scene`]: the aggregate scene container and render-state machine.
//! - [`manager`]: the worker pool / render scheduler.
//! - [`dump`]: the render-dump persistence format (versioned + legacy).
//! - [`postprocess`]: tonemap operators and alpha computation.
//! - [`image_io`]: PNG / TIFF-32 / PFM image writers.
//! - [`config`]: scene description (SDF) loading and render configuration.

pub mod bvh;
pub mod camera;
pub mod config;
pub mod dump;
pub mod error;
pub mod fog;
pub mod image_io;
pub mod manager;
pub mod material;
pub mod octree;
pub mod postprocess;
pub mod ray;
pub mod sample_buffer;
pub mod scene;
pub mod sky;
pub mod sun;
pub mod tracer;

pub use error::{RenderError, Result};
