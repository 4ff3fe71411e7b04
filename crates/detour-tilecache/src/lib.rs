//! Dynamic obstacle management and tile caching for navigation meshes
//!
//! Each tile of a navigation mesh is kept as a compressed layer of walkable
//! spans. Temporary obstacles (cylinders, boxes and rotated boxes) are carved
//! into the layers of the tiles they touch, and only those tiles are rebuilt.
//!
//! - [`TileCache`]: tile and obstacle store, request queue and incremental update
//! - [`TileCacheBuilder`]: geometry to layer, layer plus obstacles to tile data
//! - [`TileCacheLayer`]: the compressed layer format

pub mod tile_cache;
pub mod tile_cache_builder;
pub mod tile_cache_data;

#[cfg(test)]
mod tile_cache_tests;

pub use tile_cache::{
    CompressedTile, CompressedTileRef, Obstacle, ObstacleRef, ObstacleShape, ObstacleState, TileCache,
    TileCacheParams, TileRebuild, MAX_REQUESTS, MAX_UPDATE,
};
pub use tile_cache_builder::TileCacheBuilder;
pub use tile_cache_data::{
    LayerSpan, TileCacheLayer, TileCacheLayerHeader, DT_TILECACHE_MAGIC, DT_TILECACHE_VERSION, LAYER_HEADER_SIZE,
};
