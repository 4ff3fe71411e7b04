//! Detour component for navigation mesh pathfinding
//!
//! Detour stores a navigation mesh as a set of tiles holding convex
//! polygons, links the polygons into a graph (also across tile borders and
//! through off-mesh connections) and answers queries against it: nearest
//! polygon, A* paths, straight path funnelling, raycasts, surface moves and
//! random point sampling.

mod binary_format;
pub mod nav_mesh;
pub mod nav_mesh_builder;
pub mod nav_mesh_query;
pub mod node_pool;
pub mod path_corridor;
pub mod poly_query;
mod query_filter;
mod status;

#[cfg(test)]
mod test_mesh_helpers;

#[cfg(test)]
mod pathfinding_tests;
#[cfg(test)]
mod serialization_tests;

use glam::Vec3;

pub use binary_format::{
    load_nav_mesh_set, save_nav_mesh_set, DT_NAVMESH_MAGIC, DT_NAVMESH_SET_MAGIC, DT_NAVMESH_SET_VERSION,
    DT_NAVMESH_VERSION,
};
pub use nav_mesh::{BVNode, Link, MeshTile, NavMesh, OffMeshConnection, Poly, PolyDetail, TileData, TileHeader};
pub use nav_mesh_builder::{create_nav_mesh_data, NavMeshCreateParams, OffMeshConnectionDef};
pub use nav_mesh_query::{NavMeshQuery, NearestPoly, PathResult, RaycastHit, StraightPath, StraightPathPoint};
pub use node_pool::{Node, NodeFlags, NodeIndex, NodePool, NodeQueue, DT_MAX_STATES_PER_NODE};
pub use path_corridor::{
    fixup_corridor, fixup_shortcuts, merge_corridor_end_moved, merge_corridor_start_moved,
    merge_corridor_start_shortcut, PathCorridor,
};
pub use poly_query::{CollectPolys, FindNearestPoly, PolyQuery};
pub use query_filter::QueryFilter;
pub use status::{Result, Status};

/// Maximum number of vertices per navigation polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Number of area ids a query filter can weigh
pub const DT_MAX_AREAS: usize = 64;

/// Neighbour flag marking a polygon edge as a tile border portal
pub const DT_EXT_LINK: u16 = 0x8000;

/// End of a link list
pub const DT_NULL_LINK: u32 = u32::MAX;

/// Off-mesh connection can be traversed in both directions
pub const DT_OFFMESH_CON_BIDIR: u8 = 1;

/// Detail triangle edge lies on the polygon boundary
pub const DT_DETAIL_EDGE_BOUNDARY: u8 = 0x01;

/// Maximum number of tiles an obstacle or query may touch
pub const DT_MAX_TOUCHED_TILES: usize = 8;

/// Heuristic scale used by A*
pub const H_SCALE: f32 = 0.999;

const DT_SALT_BITS: u32 = 6;
const DT_TILE_BITS: u32 = 10;
const DT_POLY_BITS: u32 = 16;

/// Reference to a polygon, encoding salt, tile index and polygon index.
///
/// The salt is never zero for a live tile, so the zero reference is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyRef(u32);

/// Reference to a tile: the polygon reference of its polygon zero
pub type TileRef = PolyRef;

impl PolyRef {
    pub const NULL: PolyRef = PolyRef(0);

    pub const SALT_MASK: u32 = (1 << DT_SALT_BITS) - 1;
    pub const TILE_MASK: u32 = (1 << DT_TILE_BITS) - 1;
    pub const POLY_MASK: u32 = (1 << DT_POLY_BITS) - 1;

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Packs salt, tile index and polygon index into a reference
    pub const fn encode(salt: u32, tile: u32, poly: u32) -> Self {
        Self(
            ((salt & Self::SALT_MASK) << (DT_POLY_BITS + DT_TILE_BITS))
                | ((tile & Self::TILE_MASK) << DT_POLY_BITS)
                | (poly & Self::POLY_MASK),
        )
    }

    /// Splits the reference into `(salt, tile, poly)`
    pub const fn decode(self) -> (u32, u32, u32) {
        (self.salt(), self.tile_index(), self.poly_index())
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn salt(self) -> u32 {
        (self.0 >> (DT_POLY_BITS + DT_TILE_BITS)) & Self::SALT_MASK
    }

    pub const fn tile_index(self) -> u32 {
        (self.0 >> DT_POLY_BITS) & Self::TILE_MASK
    }

    pub const fn poly_index(self) -> u32 {
        self.0 & Self::POLY_MASK
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The same tile with another polygon index
    pub const fn with_poly(self, poly: u32) -> Self {
        Self((self.0 & !Self::POLY_MASK) | (poly & Self::POLY_MASK))
    }
}

bitflags::bitflags! {
    /// User flags attached to every polygon, matched by query filters
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        const WALK = 0x01;
        const SWIM = 0x02;
        const DOOR = 0x04;
        const JUMP = 0x08;
        const DISABLED = 0x10;
        const ALL = 0xffff;
    }
}

bitflags::bitflags! {
    /// Flags attached to every straight path vertex
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathFlags: u8 {
        const START = 0x01;
        const END = 0x02;
        const OFFMESH_CONNECTION = 0x04;
    }
}

bitflags::bitflags! {
    /// Extra vertices emitted by `find_straight_path`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StraightPathOptions: u8 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

/// Kind of navigation polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PolyType {
    /// Polygon on the walkable surface
    #[default]
    Ground = 0,
    /// Two point segment of an off-mesh connection
    OffMeshConnection = 1,
}

/// Layout of the tile grid of a navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// World position of the tile grid origin
    pub origin: Vec3,
    /// Width of a tile along x
    pub tile_width: f32,
    /// Depth of a tile along z
    pub tile_height: f32,
    /// Maximum number of tiles, at most 1024
    pub max_tiles: u32,
    /// Maximum number of polygons per tile, at most 65536
    pub max_polys_per_tile: u32,
}

/// Tile neighbour side opposite to `side`
#[inline]
pub(crate) fn opposite_tile(side: u8) -> u8 {
    (side + 4) & 0x7
}

/// Vertices closer than 1/16384 units are treated as the same point.
#[inline]
pub(crate) fn vequal(a: Vec3, b: Vec3) -> bool {
    const THR: f32 = 1.0 / 16384.0;
    a.distance_squared(b) < THR * THR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_ref_encoding() {
        let r = PolyRef::encode(3, 17, 1234);
        assert_eq!(r.decode(), (3, 17, 1234));
        assert!(r.is_valid());
        assert_eq!(r.with_poly(5).decode(), (3, 17, 5));
        assert!(!PolyRef::NULL.is_valid());
    }

    #[test]
    fn test_poly_ref_masks_overflowing_fields() {
        let r = PolyRef::encode(PolyRef::SALT_MASK + 2, PolyRef::TILE_MASK + 1, 0x1_0001);
        assert_eq!(r.decode(), (1, 0, 1));
    }

    #[test]
    fn test_opposite_tile() {
        assert_eq!(opposite_tile(0), 4);
        assert_eq!(opposite_tile(2), 6);
        assert_eq!(opposite_tile(6), 2);
        assert_eq!(opposite_tile(7), 3);
    }
}
