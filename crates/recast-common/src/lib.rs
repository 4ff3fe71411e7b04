//! Shared pieces of the build pipeline and the runtime
//!
//! Holds the error type used by every build stage, 2D/3D geometry helpers,
//! small integer math and the triangle soup loader.

mod geometry;
mod math;
mod mesh;

pub use geometry::*;
pub use math::*;
pub use mesh::*;

/// World-space position
pub type Vec3 = glam::Vec3;

/// Build, cache and facade failures
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Input triangles or indices are unusable
    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    /// Settings or tile grid rejected before or during a build
    #[error("navigation mesh generation failed: {0}")]
    NavMeshGeneration(String),

    /// A pipeline stage hit an internal limit
    #[error("recast error: {0}")]
    Recast(String),

    /// A runtime status surfaced through a build call
    #[error("detour error: {0}")]
    Detour(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
