//! What a mutating graph call changed

use crate::GraphId;

/// Kind of change applied to a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileChange {
    Created,
    Rebuilt,
    Removed,
}

/// Before/after polygon counts of one tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileUpdate {
    pub tx: i32,
    pub ty: i32,
    pub layer: i32,
    pub change: TileChange,
    /// Zero when the tile did not exist
    pub polys_before: usize,
    /// Zero when the tile is gone or came out empty
    pub polys_after: usize,
}

/// Tiles touched by one call, in the order they were processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub graph: GraphId,
    pub tiles: Vec<TileUpdate>,
}

impl UpdateReport {
    pub fn new(graph: GraphId) -> Self {
        Self { graph, tiles: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Tiles whose polygon count differs before and after
    pub fn changed(&self) -> impl Iterator<Item = &TileUpdate> {
        self.tiles.iter().filter(|t| t.polys_before != t.polys_after)
    }

    pub fn polys_before(&self) -> usize {
        self.tiles.iter().map(|t| t.polys_before).sum()
    }

    pub fn polys_after(&self) -> usize {
        self.tiles.iter().map(|t| t.polys_after).sum()
    }
}
