//! Navigation graph of one agent type
//!
//! A `NavGraph` owns the navigation mesh built for one set of settings, the
//! geometry it was built from and, when enabled, the tile cache used to carve
//! temporary obstacles. Tiles are addressed through a [`TileSelection`] and
//! every mutating call reports the tiles it touched.

use detour::{
    create_nav_mesh_data, NavMesh, NavMeshCreateParams, NavMeshParams, NavMeshQuery, PolyFlags, TileData,
};
use detour_tilecache::{ObstacleRef, ObstacleShape, TileCache, TileCacheParams};
use glam::Vec3;
use log::{debug, info};
use recast::{RecastBuilder, RecastConfig};
use recast_common::{next_pow2, Error, Result};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{BuildMode, GraphId, InputGeometry, NavMeshSettings, TileChange, TileUpdate, UpdateReport};

/// Most tiles a graph may hold
pub const MAX_GRAPH_TILES: u32 = 1024;

const MAX_POLYS_PER_TILE: u32 = 1 << 16;

/// Tiles addressed by a create, update or remove call
#[derive(Debug, Clone, PartialEq)]
pub enum TileSelection {
    /// The tile containing a position
    At(Vec3),
    /// Every tile overlapping a box on the xz plane
    In(Vec3, Vec3),
    /// The tiles containing any of the positions
    AtPositions(Vec<Vec3>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rebuild {
    Missing,
    Existing,
}

enum BuiltTile {
    Mesh(Option<TileData>),
    Layer(Option<Vec<u8>>),
}

/// Navigation mesh and query factory for one agent type
#[derive(Debug)]
pub struct NavGraph {
    id: GraphId,
    settings: NavMeshSettings,
    geometry: InputGeometry,
    bmin: Vec3,
    bmax: Vec3,
    tiles_x: i32,
    tiles_y: i32,
    nav: NavMesh,
    cache: Option<TileCache>,
}

impl NavGraph {
    /// Builds every tile covering the geometry.
    pub fn build(id: GraphId, settings: NavMeshSettings, geometry: InputGeometry) -> Result<Self> {
        settings.validate()?;
        let (mut bmin, mut bmax) = geometry
            .bounds()
            .ok_or_else(|| Error::InvalidMesh("geometry has no triangles".to_string()))?;
        bmin.y -= settings.cell_height;
        bmax.y += settings.walkable_height;

        let (tiles_x, tiles_y, tile_width, tile_height) = match settings.build_mode {
            BuildMode::Solo => (
                1,
                1,
                (bmax.x - bmin.x).max(settings.cell_size),
                (bmax.z - bmin.z).max(settings.cell_size),
            ),
            BuildMode::Tiled => {
                let tws = settings.tile_world_size();
                let across = ((bmax.x - bmin.x) / tws).ceil().max(1.0);
                let down = ((bmax.z - bmin.z) / tws).ceil().max(1.0);
                let count = across * down;
                if !count.is_finite() || count > MAX_GRAPH_TILES as f32 {
                    return Err(Error::NavMeshGeneration(format!(
                        "{}x{} tiles exceed the limit of {}",
                        across, down, MAX_GRAPH_TILES
                    )));
                }
                (across as i32, down as i32, tws, tws)
            }
        };
        let tile_count = (tiles_x * tiles_y) as u32;

        let nav = NavMesh::new(NavMeshParams {
            origin: bmin,
            tile_width,
            tile_height,
            max_tiles: next_pow2(tile_count),
            max_polys_per_tile: MAX_POLYS_PER_TILE,
        })?;
        let cache = if settings.use_tile_cache {
            Some(TileCache::new(
                TileCacheParams {
                    origin: bmin,
                    tile_width,
                    tile_height,
                    max_tiles: tile_count,
                    max_obstacles: settings.max_obstacles,
                },
                settings.to_recast_config(),
            )?)
        } else {
            None
        };

        let mut graph = Self {
            id,
            settings,
            geometry,
            bmin,
            bmax,
            tiles_x,
            tiles_y,
            nav,
            cache,
        };
        let report = graph.create_tiles(&TileSelection::In(bmin, bmax))?;
        info!(
            "{}: built {} of {} tiles, {} polygons{}",
            id,
            report.tiles.len(),
            tile_count,
            report.polys_after(),
            if graph.cache.is_some() { " (tile cache)" } else { "" }
        );
        Ok(graph)
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn settings(&self) -> &NavMeshSettings {
        &self.settings
    }

    pub fn geometry(&self) -> &InputGeometry {
        &self.geometry
    }

    /// Replaces the source geometry. Built tiles are kept until they are
    /// updated; triangles outside the original bounds are never built.
    pub fn set_geometry(&mut self, geometry: InputGeometry) {
        self.geometry = geometry;
    }

    /// World bounds covered by the tile grid
    pub fn bounds(&self) -> (Vec3, Vec3) {
        (self.bmin, self.bmax)
    }

    /// Number of tiles along x and z
    pub fn tile_grid(&self) -> (i32, i32) {
        (self.tiles_x, self.tiles_y)
    }

    pub fn nav_mesh(&self) -> &NavMesh {
        &self.nav
    }

    pub fn tile_cache(&self) -> Option<&TileCache> {
        self.cache.as_ref()
    }

    /// New query over the mesh with the configured node pool size
    pub fn query(&self) -> detour::Result<NavMeshQuery<'_>> {
        NavMeshQuery::new(&self.nav, self.settings.max_nodes)
    }

    /// Tile coordinates addressed by `selection`, sorted and deduplicated.
    /// Positions outside the grid address nothing.
    pub fn tiles_in(&self, selection: &TileSelection) -> Vec<(i32, i32)> {
        let mut out = match selection {
            TileSelection::At(pos) => self.tile_of(*pos).into_iter().collect(),
            TileSelection::AtPositions(positions) => positions.iter().filter_map(|&p| self.tile_of(p)).collect(),
            TileSelection::In(bmin, bmax) => self.tile_range(*bmin, *bmax),
        };
        out.sort_unstable_by_key(|&(x, y)| (y, x));
        out.dedup();
        out
    }

    fn tile_of(&self, pos: Vec3) -> Option<(i32, i32)> {
        if pos.x < self.bmin.x || pos.x > self.bmax.x || pos.z < self.bmin.z || pos.z > self.bmax.z {
            return None;
        }
        let (tx, ty) = self.nav.calc_tile_loc(pos);
        Some((tx.min(self.tiles_x - 1), ty.min(self.tiles_y - 1)))
    }

    fn tile_range(&self, bmin: Vec3, bmax: Vec3) -> Vec<(i32, i32)> {
        let lo = bmin.max(self.bmin);
        let hi = bmax.min(self.bmax);
        if lo.x > hi.x || lo.z > hi.z {
            return Vec::new();
        }
        let (Some((x0, y0)), Some((x1, y1))) = (self.tile_of(lo), self.tile_of(hi)) else {
            return Vec::new();
        };
        (y0..=y1).flat_map(|y| (x0..=x1).map(move |x| (x, y))).collect()
    }

    fn tile_config(&self, tx: i32, ty: i32) -> RecastConfig {
        match self.settings.build_mode {
            BuildMode::Solo => self.settings.solo_config(self.bmin, self.bmax),
            BuildMode::Tiled => self.settings.tile_config(tx, ty, self.bmin, self.bmax),
        }
    }

    fn has_tile(&self, tx: i32, ty: i32) -> bool {
        self.nav.get_tile_at(tx, ty, 0).is_some()
            || self.cache.as_ref().is_some_and(|c| c.get_tile_at(tx, ty, 0).is_some())
    }

    fn polys_at(&self, tx: i32, ty: i32) -> usize {
        self.nav.get_tile_at(tx, ty, 0).map_or(0, |t| t.polys.len())
    }

    /// Runs the build pipeline for one tile. With a tile cache the result is
    /// a compressed layer, otherwise finished tile data.
    fn build_tile(&self, tx: i32, ty: i32) -> Result<BuiltTile> {
        let cfg = self.tile_config(tx, ty);
        let tris = self.geometry.triangles_in(cfg.bmin, cfg.bmax);
        let verts = self.geometry.positions();
        debug!("{}: tile ({}, {}) gathers {} triangles", self.id, tx, ty, tris.len());

        if let Some(cache) = &self.cache {
            let layer = cache.builder().build_layer(&cfg, tx, ty, 0, verts, &tris)?;
            return Ok(BuiltTile::Layer(layer.map(|l| l.compress())));
        }

        let Some(mut out) = RecastBuilder::new(cfg.clone()).build(verts, &tris)? else {
            return Ok(BuiltTile::Mesh(None));
        };
        out.poly_mesh.flags.fill(PolyFlags::WALK.bits());
        let params = NavMeshCreateParams {
            tile_x: tx,
            tile_y: ty,
            tile_layer: 0,
            walkable_height: cfg.walkable_height as f32 * cfg.ch,
            walkable_radius: cfg.walkable_radius as f32 * cfg.cs,
            walkable_climb: cfg.walkable_climb as f32 * cfg.ch,
            ..NavMeshCreateParams::new(&out.poly_mesh, Some(&out.detail_mesh))
        };
        Ok(BuiltTile::Mesh(Some(create_nav_mesh_data(&params)?)))
    }

    #[cfg(feature = "parallel")]
    fn build_tiles(&self, coords: &[(i32, i32)]) -> Result<Vec<BuiltTile>> {
        coords.par_iter().map(|&(tx, ty)| self.build_tile(tx, ty)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn build_tiles(&self, coords: &[(i32, i32)]) -> Result<Vec<BuiltTile>> {
        coords.iter().map(|&(tx, ty)| self.build_tile(tx, ty)).collect()
    }

    /// Swaps a freshly built tile into the mesh (and cache).
    fn install(&mut self, tx: i32, ty: i32, built: BuiltTile) -> Result<Option<TileUpdate>> {
        let existed = self.has_tile(tx, ty);
        let polys_before = self.polys_at(tx, ty);

        let polys_after = match built {
            BuiltTile::Mesh(data) => {
                if let Some(old) = self.nav.get_tile_ref_at(tx, ty, 0) {
                    self.nav.remove_tile(old)?;
                }
                match data {
                    Some(data) => {
                        let n = data.polys.len();
                        self.nav.add_tile(data, None)?;
                        n
                    }
                    None => 0,
                }
            }
            BuiltTile::Layer(layer) => {
                let Some(cache) = self.cache.as_mut() else {
                    return Err(Error::NavMeshGeneration("tile layer built without a tile cache".to_string()));
                };
                if let Some(old) = cache.get_tile_at(tx, ty, 0) {
                    cache.remove_tile(old)?;
                }
                match layer {
                    Some(bytes) => {
                        cache.add_tile(bytes)?;
                        cache
                            .build_nav_mesh_tiles_at(tx, ty, &mut self.nav)?
                            .iter()
                            .map(|r| r.polys_after)
                            .sum()
                    }
                    None => {
                        if let Some(old) = self.nav.get_tile_ref_at(tx, ty, 0) {
                            self.nav.remove_tile(old)?;
                        }
                        0
                    }
                }
            }
        };

        if !existed && polys_after == 0 {
            debug!("{}: tile ({}, {}) has nothing walkable", self.id, tx, ty);
            return Ok(None);
        }
        Ok(Some(TileUpdate {
            tx,
            ty,
            layer: 0,
            change: if existed { TileChange::Rebuilt } else { TileChange::Created },
            polys_before,
            polys_after,
        }))
    }

    fn rebuild<F>(&mut self, selection: &TileSelection, which: Rebuild, mut on_tile: F) -> Result<UpdateReport>
    where
        F: FnMut(&TileUpdate),
    {
        let coords: Vec<(i32, i32)> = self
            .tiles_in(selection)
            .into_iter()
            .filter(|&(tx, ty)| self.has_tile(tx, ty) == (which == Rebuild::Existing))
            .collect();
        let built = self.build_tiles(&coords)?;

        let mut report = UpdateReport::new(self.id);
        for (&(tx, ty), tile) in coords.iter().zip(built) {
            if let Some(update) = self.install(tx, ty, tile)? {
                on_tile(&update);
                report.tiles.push(update);
            }
        }
        Ok(report)
    }

    /// Builds the selected tiles that do not exist yet.
    pub fn create_tiles(&mut self, selection: &TileSelection) -> Result<UpdateReport> {
        self.create_tiles_with(selection, |_| {})
    }

    pub fn create_tiles_with<F>(&mut self, selection: &TileSelection, on_tile: F) -> Result<UpdateReport>
    where
        F: FnMut(&TileUpdate),
    {
        self.rebuild(selection, Rebuild::Missing, on_tile)
    }

    pub fn create_at(&mut self, pos: Vec3) -> Result<UpdateReport> {
        self.create_tiles(&TileSelection::At(pos))
    }

    pub fn create_in(&mut self, bmin: Vec3, bmax: Vec3) -> Result<UpdateReport> {
        self.create_tiles(&TileSelection::In(bmin, bmax))
    }

    pub fn create_at_positions(&mut self, positions: &[Vec3]) -> Result<UpdateReport> {
        self.create_tiles(&TileSelection::AtPositions(positions.to_vec()))
    }

    /// Rebuilds the selected tiles that exist from the current geometry.
    pub fn update_tiles(&mut self, selection: &TileSelection) -> Result<UpdateReport> {
        self.update_tiles_with(selection, |_| {})
    }

    pub fn update_tiles_with<F>(&mut self, selection: &TileSelection, on_tile: F) -> Result<UpdateReport>
    where
        F: FnMut(&TileUpdate),
    {
        self.rebuild(selection, Rebuild::Existing, on_tile)
    }

    pub fn update_at(&mut self, pos: Vec3) -> Result<UpdateReport> {
        self.update_tiles(&TileSelection::At(pos))
    }

    pub fn update_in(&mut self, bmin: Vec3, bmax: Vec3) -> Result<UpdateReport> {
        self.update_tiles(&TileSelection::In(bmin, bmax))
    }

    pub fn update_at_positions(&mut self, positions: &[Vec3]) -> Result<UpdateReport> {
        self.update_tiles(&TileSelection::AtPositions(positions.to_vec()))
    }

    /// Removes the selected tiles from the mesh and the cache.
    pub fn remove_tiles(&mut self, selection: &TileSelection) -> Result<UpdateReport> {
        self.remove_tiles_with(selection, |_| {})
    }

    pub fn remove_tiles_with<F>(&mut self, selection: &TileSelection, mut on_tile: F) -> Result<UpdateReport>
    where
        F: FnMut(&TileUpdate),
    {
        let mut report = UpdateReport::new(self.id);
        for (tx, ty) in self.tiles_in(selection) {
            if !self.has_tile(tx, ty) {
                continue;
            }
            let polys_before = self.polys_at(tx, ty);
            if let Some(old) = self.nav.get_tile_ref_at(tx, ty, 0) {
                self.nav.remove_tile(old)?;
            }
            if let Some(cache) = self.cache.as_mut() {
                if let Some(old) = cache.get_tile_at(tx, ty, 0) {
                    cache.remove_tile(old)?;
                }
            }
            let update = TileUpdate {
                tx,
                ty,
                layer: 0,
                change: TileChange::Removed,
                polys_before,
                polys_after: 0,
            };
            on_tile(&update);
            report.tiles.push(update);
        }
        Ok(report)
    }

    pub fn remove_at(&mut self, pos: Vec3) -> Result<UpdateReport> {
        self.remove_tiles(&TileSelection::At(pos))
    }

    pub fn remove_in(&mut self, bmin: Vec3, bmax: Vec3) -> Result<UpdateReport> {
        self.remove_tiles(&TileSelection::In(bmin, bmax))
    }

    pub fn remove_at_positions(&mut self, positions: &[Vec3]) -> Result<UpdateReport> {
        self.remove_tiles(&TileSelection::AtPositions(positions.to_vec()))
    }

    /// Queues an obstacle. Fails with `INVALID_PARAM` when the graph has no
    /// tile cache. The mesh changes on the next [`NavGraph::update`].
    pub fn add_obstacle(&mut self, shape: ObstacleShape) -> detour::Result<ObstacleRef> {
        self.cache_mut()?.add_obstacle_shape(shape)
    }

    pub fn remove_obstacle(&mut self, r: ObstacleRef) -> detour::Result<()> {
        self.cache_mut()?.remove_obstacle(r)
    }

    fn cache_mut(&mut self) -> detour::Result<&mut TileCache> {
        self.cache
            .as_mut()
            .ok_or(detour::Status::failure(detour::Status::INVALID_PARAM))
    }

    pub fn is_up_to_date(&self) -> bool {
        self.cache.as_ref().map_or(true, TileCache::is_up_to_date)
    }

    /// Applies every pending obstacle change.
    pub fn update(&mut self) -> Result<UpdateReport> {
        self.update_with(|_| {})
    }

    pub fn update_with<F>(&mut self, mut on_tile: F) -> Result<UpdateReport>
    where
        F: FnMut(&TileUpdate),
    {
        let mut report = UpdateReport::new(self.id);
        let Some(cache) = self.cache.as_mut() else {
            return Ok(report);
        };
        loop {
            let done = cache.update_with(&mut self.nav, |r| {
                let update = TileUpdate {
                    tx: r.tx,
                    ty: r.ty,
                    layer: r.tlayer,
                    change: TileChange::Rebuilt,
                    polys_before: r.polys_before,
                    polys_after: r.polys_after,
                };
                on_tile(&update);
                report.tiles.push(update);
            })?;
            if done {
                break;
            }
        }
        if !report.is_empty() {
            debug!("{}: obstacle update rebuilt {} tiles", self.id, report.tiles.len());
        }
        Ok(report)
    }
}
