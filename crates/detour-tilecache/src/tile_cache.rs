//! Tile cache implementation for Detour
//!
//! The cache keeps one compressed layer per tile and a pool of temporary
//! obstacles. Adding or removing an obstacle only queues a request; `update`
//! turns requests into a list of touched tiles and rebuilds them into the
//! navigation mesh one tile per call. Stored layers are never modified, so
//! removing an obstacle restores the tiles it touched exactly.

use std::collections::HashMap;

use detour::{NavMesh, Status, DT_MAX_TOUCHED_TILES};
use glam::Vec3;
use log::{debug, info, warn};
use recast::{
    mark_box_area, mark_cylinder_area, mark_rotated_box_area, CompactHeightfield, RecastConfig, RC_NULL_AREA,
};
use recast_common::overlap_bounds;

use crate::tile_cache_builder::TileCacheBuilder;
use crate::tile_cache_data::{TileCacheLayer, TileCacheLayerHeader};

/// Maximum number of queued obstacle requests
pub const MAX_REQUESTS: usize = 64;
/// Maximum number of tiles waiting for a rebuild
pub const MAX_UPDATE: usize = 64;

macro_rules! salted_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
        #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u32);

        impl $name {
            pub const NULL: $name = $name(0);

            /// Salt in the high 16 bits, slot index in the low 16 bits
            pub const fn encode(salt: u16, index: u16) -> Self {
                Self((salt as u32) << 16 | index as u32)
            }

            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            pub const fn id(self) -> u32 {
                self.0
            }

            pub const fn salt(self) -> u16 {
                (self.0 >> 16) as u16
            }

            pub const fn index(self) -> usize {
                (self.0 & 0xffff) as usize
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

salted_ref!(
    /// Reference to a compressed tile. Stale after the tile is removed.
    CompressedTileRef
);
salted_ref!(
    /// Reference to an obstacle. Stale after the obstacle is removed.
    ObstacleRef
);

fn next_salt(salt: u16) -> u16 {
    match salt.wrapping_add(1) {
        0 => 1,
        s => s,
    }
}

/// World placement of the tile grid
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheParams {
    pub origin: Vec3,
    /// Tile size along x in world units
    pub tile_width: f32,
    /// Tile size along z in world units
    pub tile_height: f32,
    pub max_tiles: u32,
    pub max_obstacles: u32,
}

/// Compressed tile slot
#[derive(Debug, Clone, Default)]
pub struct CompressedTile {
    pub salt: u16,
    /// `None` while the slot is free
    pub header: Option<TileCacheLayerHeader>,
    /// Compressed layer blob
    pub data: Vec<u8>,
    next: Option<usize>,
}

/// Shape of a temporary obstacle
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum ObstacleShape {
    /// Upright cylinder standing on `pos`
    Cylinder { pos: Vec3, radius: f32, height: f32 },
    /// Axis-aligned box
    Box { bmin: Vec3, bmax: Vec3 },
    /// Box rotated about the Y axis
    OrientedBox {
        center: Vec3,
        half_extents: Vec3,
        y_radians: f32,
    },
}

impl ObstacleShape {
    /// World-space bounds
    pub fn bounds(&self) -> (Vec3, Vec3) {
        match *self {
            ObstacleShape::Cylinder { pos, radius, height } => (
                Vec3::new(pos.x - radius, pos.y, pos.z - radius),
                Vec3::new(pos.x + radius, pos.y + height, pos.z + radius),
            ),
            ObstacleShape::Box { bmin, bmax } => (bmin, bmax),
            ObstacleShape::OrientedBox {
                center, half_extents, ..
            } => {
                let r = Vec3::new(half_extents.x, 0.0, half_extents.z).length();
                let ext = Vec3::new(r, half_extents.y, r);
                (center - ext, center + ext)
            }
        }
    }

    /// Paints the obstacle into `chf` as unwalkable.
    pub(crate) fn mark(&self, chf: &mut CompactHeightfield) {
        match *self {
            ObstacleShape::Cylinder { pos, radius, height } => {
                mark_cylinder_area(chf, pos, radius, height, RC_NULL_AREA)
            }
            ObstacleShape::Box { bmin, bmax } => mark_box_area(chf, bmin, bmax, RC_NULL_AREA),
            ObstacleShape::OrientedBox {
                center,
                half_extents,
                y_radians,
            } => mark_rotated_box_area(chf, center, half_extents, y_radians, RC_NULL_AREA),
        }
    }
}

/// Lifecycle of an obstacle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObstacleState {
    #[default]
    Empty,
    /// Added, touched tiles not rebuilt yet
    Processing,
    /// Carved into every touched tile
    Processed,
    /// Removal requested, touched tiles not rebuilt yet
    Removing,
}

/// Obstacle slot
#[derive(Debug, Clone, Default)]
pub struct Obstacle {
    pub shape: Option<ObstacleShape>,
    pub state: ObstacleState,
    pub salt: u16,
    /// Tiles the obstacle overlaps
    pub touched: Vec<CompressedTileRef>,
    /// Touched tiles still waiting for a rebuild
    pub pending: Vec<CompressedTileRef>,
    next: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct ObstacleRequest {
    action: RequestAction,
    reference: ObstacleRef,
}

/// Outcome of rebuilding one tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRebuild {
    pub tx: i32,
    pub ty: i32,
    pub tlayer: i32,
    /// Polygons of the navigation mesh tile before the rebuild, zero if absent
    pub polys_before: usize,
    /// Polygons after the rebuild, zero if the tile ended up empty
    pub polys_after: usize,
}

/// Store of compressed tile layers and temporary obstacles
#[derive(Debug)]
pub struct TileCache {
    params: TileCacheParams,
    builder: TileCacheBuilder,
    tiles: Vec<CompressedTile>,
    next_free_tile: Option<usize>,
    pos_lookup: HashMap<(i32, i32), Vec<usize>>,
    obstacles: Vec<Obstacle>,
    next_free_obstacle: Option<usize>,
    requests: Vec<ObstacleRequest>,
    update: Vec<CompressedTileRef>,
}

impl TileCache {
    /// Creates an empty cache. `config` supplies the agent and meshing
    /// parameters used when tiles are rebuilt.
    pub fn new(params: TileCacheParams, config: RecastConfig) -> detour::Result<Self> {
        if !params.origin.is_finite()
            || !(params.tile_width > 0.0 && params.tile_height > 0.0)
            || params.max_tiles == 0
            || params.max_tiles > 0x10000
            || params.max_obstacles > 0x10000
        {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let max_tiles = params.max_tiles as usize;
        let tiles = (0..max_tiles)
            .map(|i| CompressedTile {
                salt: 1,
                next: (i + 1 < max_tiles).then_some(i + 1),
                ..CompressedTile::default()
            })
            .collect();
        let max_obstacles = params.max_obstacles as usize;
        let obstacles = (0..max_obstacles)
            .map(|i| Obstacle {
                salt: 1,
                next: (i + 1 < max_obstacles).then_some(i + 1),
                ..Obstacle::default()
            })
            .collect();

        Ok(Self {
            builder: TileCacheBuilder::new(config),
            tiles,
            next_free_tile: Some(0),
            pos_lookup: HashMap::new(),
            obstacles,
            next_free_obstacle: (max_obstacles > 0).then_some(0),
            requests: Vec::with_capacity(MAX_REQUESTS),
            update: Vec::with_capacity(MAX_UPDATE),
            params,
        })
    }

    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    pub fn builder(&self) -> &TileCacheBuilder {
        &self.builder
    }

    /// Adds a compressed layer. Fails with `ALREADY_OCCUPIED` when a layer
    /// is already stored at the same location.
    pub fn add_tile(&mut self, data: Vec<u8>) -> detour::Result<CompressedTileRef> {
        let header = TileCacheLayerHeader::read(&data)?;
        if self.get_tile_at(header.tx, header.ty, header.tlayer).is_some() {
            return Err(Status::failure(Status::ALREADY_OCCUPIED));
        }
        let Some(idx) = self.next_free_tile else {
            return Err(Status::failure(Status::OUT_OF_MEMORY));
        };

        let tile = &mut self.tiles[idx];
        self.next_free_tile = tile.next.take();
        self.pos_lookup.entry((header.tx, header.ty)).or_default().push(idx);
        tile.header = Some(header);
        tile.data = data;
        Ok(CompressedTileRef::encode(tile.salt, idx as u16))
    }

    /// Removes a tile and hands back its compressed layer.
    pub fn remove_tile(&mut self, r: CompressedTileRef) -> detour::Result<Vec<u8>> {
        let idx = self.tile_index(r).ok_or(Status::failure(Status::INVALID_PARAM))?;
        let tile = &mut self.tiles[idx];
        let Some(header) = tile.header.take() else {
            return Err(Status::failure(Status::INVALID_PARAM));
        };
        if let Some(bucket) = self.pos_lookup.get_mut(&(header.tx, header.ty)) {
            bucket.retain(|&i| i != idx);
            if bucket.is_empty() {
                self.pos_lookup.remove(&(header.tx, header.ty));
            }
        }
        tile.salt = next_salt(tile.salt);
        tile.next = self.next_free_tile;
        self.next_free_tile = Some(idx);
        self.update.retain(|&u| u != r);
        Ok(std::mem::take(&mut tile.data))
    }

    fn tile_index(&self, r: CompressedTileRef) -> Option<usize> {
        let tile = self.tiles.get(r.index())?;
        (tile.header.is_some() && tile.salt == r.salt()).then_some(r.index())
    }

    pub fn get_tile_by_ref(&self, r: CompressedTileRef) -> Option<&CompressedTile> {
        self.tile_index(r).map(|i| &self.tiles[i])
    }

    fn tile_ref(&self, idx: usize) -> CompressedTileRef {
        CompressedTileRef::encode(self.tiles[idx].salt, idx as u16)
    }

    pub fn get_tile_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<CompressedTileRef> {
        self.pos_lookup
            .get(&(tx, ty))?
            .iter()
            .find(|&&i| self.tiles[i].header.as_ref().is_some_and(|h| h.tlayer == tlayer))
            .map(|&i| self.tile_ref(i))
    }

    /// Every layer stored at grid location `(tx, ty)`
    pub fn get_tiles_at(&self, tx: i32, ty: i32) -> Vec<CompressedTileRef> {
        self.pos_lookup
            .get(&(tx, ty))
            .map(|b| b.iter().map(|&i| self.tile_ref(i)).collect())
            .unwrap_or_default()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.header.is_some()).count()
    }

    /// Bounds of the tile proper, without the border cells
    pub fn calc_tight_tile_bounds(header: &TileCacheLayerHeader) -> (Vec3, Vec3) {
        let pad = header.border_size as f32 * header.cs;
        (
            Vec3::new(header.bmin.x + pad, header.bmin.y, header.bmin.z + pad),
            Vec3::new(header.bmax.x - pad, header.bmax.y, header.bmax.z - pad),
        )
    }

    /// Tiles whose tight bounds overlap the box
    pub fn query_tiles(&self, bmin: Vec3, bmax: Vec3) -> Vec<CompressedTileRef> {
        let o = self.params.origin;
        let tx0 = ((bmin.x - o.x) / self.params.tile_width).floor() as i32;
        let tx1 = ((bmax.x - o.x) / self.params.tile_width).floor() as i32;
        let ty0 = ((bmin.z - o.z) / self.params.tile_height).floor() as i32;
        let ty1 = ((bmax.z - o.z) / self.params.tile_height).floor() as i32;

        let mut out = Vec::new();
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                let Some(bucket) = self.pos_lookup.get(&(tx, ty)) else {
                    continue;
                };
                for &i in bucket {
                    let Some(header) = &self.tiles[i].header else {
                        continue;
                    };
                    let (tmin, tmax) = Self::calc_tight_tile_bounds(header);
                    if overlap_bounds(bmin, bmax, tmin, tmax) {
                        out.push(self.tile_ref(i));
                    }
                }
            }
        }
        out
    }

    /// Adds an upright cylinder standing on `pos`.
    pub fn add_obstacle(&mut self, pos: Vec3, radius: f32, height: f32) -> detour::Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::Cylinder { pos, radius, height })
    }

    pub fn add_box_obstacle(&mut self, bmin: Vec3, bmax: Vec3) -> detour::Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::Box { bmin, bmax })
    }

    /// Adds a box rotated by `y_radians` about the Y axis.
    pub fn add_oriented_box_obstacle(
        &mut self,
        center: Vec3,
        half_extents: Vec3,
        y_radians: f32,
    ) -> detour::Result<ObstacleRef> {
        self.add_obstacle_shape(ObstacleShape::OrientedBox {
            center,
            half_extents,
            y_radians,
        })
    }

    /// Queues an obstacle for insertion. Fails with `BUFFER_TOO_SMALL` when
    /// the request queue is full or the obstacle would touch more than
    /// `DT_MAX_TOUCHED_TILES` tiles; the obstacle is not registered then.
    pub fn add_obstacle_shape(&mut self, shape: ObstacleShape) -> detour::Result<ObstacleRef> {
        if self.requests.len() >= MAX_REQUESTS {
            return Err(Status::failure(Status::BUFFER_TOO_SMALL));
        }
        let (bmin, bmax) = shape.bounds();
        let touched = self.query_tiles(bmin, bmax);
        if touched.len() > DT_MAX_TOUCHED_TILES {
            warn!(
                "obstacle touches {} tiles (max {}), not added",
                touched.len(),
                DT_MAX_TOUCHED_TILES
            );
            return Err(Status::failure(Status::BUFFER_TOO_SMALL));
        }
        let Some(idx) = self.next_free_obstacle else {
            return Err(Status::failure(Status::OUT_OF_MEMORY));
        };

        let ob = &mut self.obstacles[idx];
        self.next_free_obstacle = ob.next.take();
        ob.shape = Some(shape);
        ob.state = ObstacleState::Processing;
        ob.touched = touched;
        ob.pending.clear();

        let reference = ObstacleRef::encode(ob.salt, idx as u16);
        self.requests.push(ObstacleRequest {
            action: RequestAction::Add,
            reference,
        });
        Ok(reference)
    }

    /// Queues an obstacle for removal.
    pub fn remove_obstacle(&mut self, r: ObstacleRef) -> detour::Result<()> {
        if self.get_obstacle_by_ref(r).is_none() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        if self.requests.len() >= MAX_REQUESTS {
            return Err(Status::failure(Status::BUFFER_TOO_SMALL));
        }
        self.requests.push(ObstacleRequest {
            action: RequestAction::Remove,
            reference: r,
        });
        Ok(())
    }

    pub fn get_obstacle_by_ref(&self, r: ObstacleRef) -> Option<&Obstacle> {
        let ob = self.obstacles.get(r.index())?;
        (ob.state != ObstacleState::Empty && ob.salt == r.salt()).then_some(ob)
    }

    /// Live obstacles with their references
    pub fn obstacles(&self) -> impl Iterator<Item = (ObstacleRef, &Obstacle)> {
        self.obstacles
            .iter()
            .enumerate()
            .filter(|(_, ob)| ob.state != ObstacleState::Empty)
            .map(|(i, ob)| (ObstacleRef::encode(ob.salt, i as u16), ob))
    }

    pub fn obstacle_count(&self) -> usize {
        self.obstacles().count()
    }

    /// World-space bounds of an obstacle, degenerate for an empty slot
    pub fn get_obstacle_bounds(&self, ob: &Obstacle) -> (Vec3, Vec3) {
        ob.shape.as_ref().map_or((Vec3::ZERO, Vec3::ZERO), ObstacleShape::bounds)
    }

    /// Whether no request or tile rebuild is outstanding
    pub fn is_up_to_date(&self) -> bool {
        self.requests.is_empty() && self.update.is_empty()
    }

    /// Processes queued requests and rebuilds at most one touched tile.
    /// Returns whether the cache is up to date afterwards.
    pub fn update(&mut self, nav: &mut NavMesh) -> recast_common::Result<bool> {
        self.update_with(nav, |_| {})
    }

    /// Like `update`, reporting the rebuilt tile to `on_rebuild`.
    pub fn update_with<F>(&mut self, nav: &mut NavMesh, mut on_rebuild: F) -> recast_common::Result<bool>
    where
        F: FnMut(&TileRebuild),
    {
        if self.update.is_empty() {
            self.process_requests();
        }

        if !self.update.is_empty() {
            let r = self.update.remove(0);
            let rebuilt = match self.build_nav_mesh_tile(r, nav) {
                Ok(rebuilt) => rebuilt,
                Err(e) => {
                    // Obstacles stay pending on `r` until a rebuild succeeds.
                    self.update.insert(0, r);
                    return Err(e);
                }
            };

            for i in 0..self.obstacles.len() {
                let ob = &mut self.obstacles[i];
                if !matches!(ob.state, ObstacleState::Processing | ObstacleState::Removing) {
                    continue;
                }
                ob.pending.retain(|&p| p != r);
                if ob.pending.is_empty() {
                    self.settle_obstacle(i);
                }
            }
            on_rebuild(&rebuilt);
        }

        Ok(self.is_up_to_date())
    }

    fn process_requests(&mut self) {
        let mut requests = std::mem::take(&mut self.requests).into_iter();
        while let Some(req) = requests.next() {
            let idx = req.reference.index();
            match self.obstacles.get(idx) {
                Some(ob) if ob.salt == req.reference.salt() && ob.state != ObstacleState::Empty => {}
                _ => continue,
            }

            // Tiles may have been removed since the obstacle was added.
            let touched: Vec<CompressedTileRef> = self.obstacles[idx]
                .touched
                .iter()
                .copied()
                .filter(|&t| self.tiles.get(t.index()).is_some_and(|s| s.header.is_some() && s.salt == t.salt()))
                .collect();
            let fresh = touched.iter().filter(|t| !self.update.contains(t)).count();
            if self.update.len() + fresh > MAX_UPDATE {
                debug!("tile update list is full, deferring {} requests", requests.len() + 1);
                self.requests.push(req);
                self.requests.extend(requests);
                break;
            }

            let ob = &mut self.obstacles[idx];
            match req.action {
                RequestAction::Add => {}
                RequestAction::Remove => ob.state = ObstacleState::Removing,
            }
            ob.pending = touched.clone();
            for t in touched {
                if !self.update.contains(&t) {
                    self.update.push(t);
                }
            }
            if self.obstacles[idx].pending.is_empty() {
                self.settle_obstacle(idx);
            }
        }
    }

    /// Finishes an obstacle whose touched tiles are all rebuilt.
    fn settle_obstacle(&mut self, idx: usize) {
        let ob = &mut self.obstacles[idx];
        match ob.state {
            ObstacleState::Processing => ob.state = ObstacleState::Processed,
            ObstacleState::Removing => {
                ob.state = ObstacleState::Empty;
                ob.shape = None;
                ob.touched.clear();
                ob.salt = next_salt(ob.salt);
                ob.next = self.next_free_obstacle;
                self.next_free_obstacle = Some(idx);
            }
            _ => {}
        }
    }

    /// Rebuilds every layer at `(tx, ty)` into the navigation mesh.
    pub fn build_nav_mesh_tiles_at(&self, tx: i32, ty: i32, nav: &mut NavMesh) -> recast_common::Result<Vec<TileRebuild>> {
        self.get_tiles_at(tx, ty)
            .into_iter()
            .map(|r| self.build_nav_mesh_tile(r, nav))
            .collect()
    }

    /// Decompresses a layer, carves the active obstacles into it and replaces
    /// the matching tile of `nav` with the result.
    pub fn build_nav_mesh_tile(&self, r: CompressedTileRef, nav: &mut NavMesh) -> recast_common::Result<TileRebuild> {
        let tile = self.get_tile_by_ref(r).ok_or(Status::failure(Status::INVALID_PARAM))?;
        let layer = TileCacheLayer::decompress(&tile.data)?;
        let h = &layer.header;

        let (tmin, tmax) = Self::calc_tight_tile_bounds(h);
        let shapes: Vec<&ObstacleShape> = self
            .obstacles
            .iter()
            .filter(|ob| matches!(ob.state, ObstacleState::Processing | ObstacleState::Processed))
            .filter_map(|ob| ob.shape.as_ref())
            .filter(|shape| {
                let (bmin, bmax) = shape.bounds();
                overlap_bounds(bmin, bmax, tmin, tmax)
            })
            .collect();

        let data = self.builder.build_tile_data(&layer, &shapes)?;

        let old = match nav.get_tile_ref_at(h.tx, h.ty, h.tlayer) {
            Some(old_ref) => Some((old_ref, nav.remove_tile(old_ref)?)),
            None => None,
        };
        let polys_before = old.as_ref().map_or(0, |(_, tile)| tile.polys.len());
        let polys_after = match data {
            Some(data) => {
                let n = data.polys.len();
                if let Err(e) = nav.add_tile(data, None) {
                    warn!("tile ({}, {}, {}) rejected by the navigation mesh: {:?}", h.tx, h.ty, h.tlayer, e);
                    if let Some((old_ref, tile)) = old {
                        nav.add_tile(tile, Some(old_ref))?;
                    }
                    return Err(e.into());
                }
                n
            }
            None => 0,
        };

        info!(
            "rebuilt tile ({}, {}, {}) with {} obstacles: {} -> {} polygons",
            h.tx,
            h.ty,
            h.tlayer,
            shapes.len(),
            polys_before,
            polys_after
        );
        Ok(TileRebuild {
            tx: h.tx,
            ty: h.ty,
            tlayer: h.tlayer,
            polys_before,
            polys_after,
        })
    }
}

impl Drop for TileCache {
    fn drop(&mut self) {
        if !self.is_up_to_date() {
            debug!(
                "tile cache dropped with {} requests and {} tile updates pending",
                self.requests.len(),
                self.update.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast::{Heightfield, RC_WALKABLE_AREA};

    fn params() -> TileCacheParams {
        TileCacheParams {
            origin: Vec3::ZERO,
            tile_width: 4.0,
            tile_height: 4.0,
            max_tiles: 16,
            max_obstacles: 4,
        }
    }

    /// Flat layer covering tile `(tx, ty)` of a 4x4 world unit grid
    fn layer_blob(tx: i32, ty: i32) -> Vec<u8> {
        let bmin = Vec3::new(tx as f32 * 4.0, 0.0, ty as f32 * 4.0);
        let mut hf = Heightfield::new(8, 8, bmin, bmin + Vec3::new(4.0, 4.0, 4.0), 0.5, 0.5);
        for z in 0..8 {
            for x in 0..8 {
                hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let chf = CompactHeightfield::build_from_heightfield(3, 1, &hf).unwrap();
        TileCacheLayer::from_compact(tx, ty, 0, &chf).compress()
    }

    #[test]
    fn test_invalid_params() {
        let cfg = RecastConfig::default();
        let mut p = params();
        p.max_tiles = 0;
        assert!(TileCache::new(p, cfg.clone()).is_err());
        let mut p = params();
        p.tile_width = 0.0;
        assert!(TileCache::new(p, cfg.clone()).is_err());
        let mut p = params();
        p.origin.x = f32::NAN;
        assert!(TileCache::new(p, cfg).is_err());
    }

    #[test]
    fn test_tile_slots_are_salted() {
        let mut cache = TileCache::new(params(), RecastConfig::default()).unwrap();
        let a = cache.add_tile(layer_blob(0, 0)).unwrap();
        let err = cache.add_tile(layer_blob(0, 0)).unwrap_err();
        assert!(err.has_detail(Status::ALREADY_OCCUPIED));
        assert_eq!(cache.get_tile_at(0, 0, 0), Some(a));

        let blob = cache.remove_tile(a).unwrap();
        assert_eq!(blob, layer_blob(0, 0));
        assert!(cache.get_tile_by_ref(a).is_none());
        assert!(cache.remove_tile(a).is_err());

        // Same slot, new salt.
        let b = cache.add_tile(blob).unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert_eq!(cache.tile_count(), 1);
    }

    #[test]
    fn test_query_tiles_uses_tight_bounds() {
        let mut cache = TileCache::new(params(), RecastConfig::default()).unwrap();
        let mut refs = Vec::new();
        for ty in 0..2 {
            for tx in 0..2 {
                refs.push(cache.add_tile(layer_blob(tx, ty)).unwrap());
            }
        }
        let hit = cache.query_tiles(Vec3::new(1.0, 0.0, 1.0), Vec3::new(2.0, 1.0, 2.0));
        assert_eq!(hit, vec![refs[0]]);
        let mut hit = cache.query_tiles(Vec3::new(3.0, 0.0, 3.0), Vec3::new(5.0, 1.0, 5.0));
        hit.sort();
        let mut all = refs.clone();
        all.sort();
        assert_eq!(hit, all);
        assert!(cache.query_tiles(Vec3::splat(20.0), Vec3::splat(21.0)).is_empty());
    }

    #[test]
    fn test_obstacle_lifecycle_without_mesh_changes() {
        let mut cache = TileCache::new(params(), RecastConfig::default()).unwrap();
        let ob = cache
            .add_box_obstacle(Vec3::new(1.0, 0.0, 1.0), Vec3::new(2.0, 1.0, 2.0))
            .unwrap();
        // No tiles touched: settles without any rebuild.
        let mut nav = NavMesh::new(detour::NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 4.0,
            tile_height: 4.0,
            max_tiles: 16,
            max_polys_per_tile: 64,
        })
        .unwrap();
        assert_eq!(cache.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processing);
        assert!(cache.update(&mut nav).unwrap());
        assert_eq!(cache.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processed);

        cache.remove_obstacle(ob).unwrap();
        assert!(cache.update(&mut nav).unwrap());
        assert!(cache.get_obstacle_by_ref(ob).is_none());
        assert!(cache.remove_obstacle(ob).unwrap_err().has_detail(Status::INVALID_PARAM));

        // The slot is reused under a new salt.
        let again = cache.add_obstacle(Vec3::ZERO, 0.5, 1.0).unwrap();
        assert_eq!(again.index(), ob.index());
        assert_ne!(again, ob);
    }

    #[test]
    fn test_obstacle_pool_exhaustion() {
        let mut cache = TileCache::new(params(), RecastConfig::default()).unwrap();
        for _ in 0..4 {
            cache.add_obstacle(Vec3::ZERO, 0.5, 1.0).unwrap();
        }
        let err = cache.add_obstacle(Vec3::ZERO, 0.5, 1.0).unwrap_err();
        assert!(err.has_detail(Status::OUT_OF_MEMORY));
        assert_eq!(cache.obstacle_count(), 4);
    }

    #[test]
    fn test_too_many_touched_tiles_is_rejected() {
        let mut p = params();
        p.max_tiles = 16;
        let mut cache = TileCache::new(p, RecastConfig::default()).unwrap();
        for ty in 0..3 {
            for tx in 0..3 {
                cache.add_tile(layer_blob(tx, ty)).unwrap();
            }
        }
        // 3x3 tiles is one more than the bound.
        let err = cache
            .add_box_obstacle(Vec3::new(1.0, 0.0, 1.0), Vec3::new(11.0, 1.0, 11.0))
            .unwrap_err();
        assert!(err.has_detail(Status::BUFFER_TOO_SMALL));
        assert_eq!(cache.obstacle_count(), 0);
        assert!(cache.is_up_to_date());

        let (bmin, bmax) = ObstacleShape::OrientedBox {
            center: Vec3::new(4.0, 0.0, 4.0),
            half_extents: Vec3::new(3.0, 1.0, 4.0),
            y_radians: 0.3,
        }
        .bounds();
        assert_eq!(bmin, Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(bmax, Vec3::new(9.0, 1.0, 9.0));
    }
}
