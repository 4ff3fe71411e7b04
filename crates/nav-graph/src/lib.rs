//! Navigation graphs for agent types
//!
//! Ties the build pipeline, the navigation mesh and the tile cache together:
//! a [`NavGraph`] is built from [`NavMeshSettings`] and [`InputGeometry`],
//! rebuilt tile by tile through [`TileSelection`]s, carved by obstacles and
//! queried through [`NavGraph::query`]. A [`NavWorld`] holds one graph per
//! agent type.

mod geometry;
mod graph;
mod id;
mod report;
mod settings;
mod world;


pub use detour_tilecache::{ObstacleRef, ObstacleShape};
pub use geometry::InputGeometry;
pub use graph::{NavGraph, TileSelection, MAX_GRAPH_TILES};
pub use id::{GraphId, IdGenerator};
pub use report::{TileChange, TileUpdate, UpdateReport};
pub use settings::{BuildMode, NavMeshSettings, PartitionMode};
pub use world::NavWorld;
