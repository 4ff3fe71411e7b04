//! Turns geometry into tile layers and tile layers into navigation mesh tiles

use detour::{create_nav_mesh_data, NavMeshCreateParams, PolyFlags, TileData};
use glam::Vec3;
use log::debug;
use recast::{RecastBuilder, RecastConfig};
use recast_common::Result;

use crate::tile_cache::ObstacleShape;
use crate::tile_cache_data::TileCacheLayer;

/// Builds tile layers and rebuilds tiles from them.
///
/// The configuration supplies the agent and meshing parameters. Grid size
/// and bounds are taken from each layer.
#[derive(Debug, Clone)]
pub struct TileCacheBuilder {
    config: RecastConfig,
}

impl TileCacheBuilder {
    pub fn new(config: RecastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Rasterizes the geometry of one tile into a layer. `cfg` must carry the
    /// tile bounds including the border. Returns `Ok(None)` when the tile has
    /// no walkable spans.
    pub fn build_layer(
        &self,
        cfg: &RecastConfig,
        tx: i32,
        ty: i32,
        tlayer: i32,
        verts: &[Vec3],
        tris: &[[u32; 3]],
    ) -> Result<Option<TileCacheLayer>> {
        cfg.validate()?;
        if tris.is_empty() {
            return Ok(None);
        }
        let builder = RecastBuilder::new(cfg.clone());
        let hf = builder.build_heightfield(verts, tris)?;
        let mut chf = builder.build_compact_heightfield(&hf)?;
        if chf.span_count() == 0 {
            debug!("tile ({}, {}) has no walkable spans", tx, ty);
            return Ok(None);
        }
        chf.border_size = cfg.border_size;
        Ok(Some(TileCacheLayer::from_compact(tx, ty, tlayer, &chf)))
    }

    /// Builds the tile of a layer with `obstacles` carved out. Returns
    /// `Ok(None)` when nothing walkable is left.
    pub fn build_tile_data(&self, layer: &TileCacheLayer, obstacles: &[&ObstacleShape]) -> Result<Option<TileData>> {
        let h = &layer.header;
        let mut chf = layer.to_compact()?;
        for shape in obstacles {
            shape.mark(&mut chf);
        }

        let mut cfg = self.config.clone();
        cfg.bmin = h.bmin;
        cfg.bmax = h.bmax;
        cfg.width = h.width as i32;
        cfg.height = h.height as i32;
        cfg.border_size = h.border_size as i32;
        cfg.cs = h.cs;
        cfg.ch = h.ch;

        let Some(mut out) = RecastBuilder::new(cfg).build_from_compact(chf)? else {
            debug!("tile ({}, {}, {}) is empty after rebuild", h.tx, h.ty, h.tlayer);
            return Ok(None);
        };
        out.poly_mesh.flags.fill(PolyFlags::WALK.bits());

        let params = NavMeshCreateParams {
            tile_x: h.tx,
            tile_y: h.ty,
            tile_layer: h.tlayer,
            walkable_height: self.config.walkable_height as f32 * h.ch,
            walkable_radius: self.config.walkable_radius as f32 * h.cs,
            walkable_climb: self.config.walkable_climb as f32 * h.ch,
            ..NavMeshCreateParams::new(&out.poly_mesh, Some(&out.detail_mesh))
        };
        Ok(Some(create_nav_mesh_data(&params)?))
    }
}
