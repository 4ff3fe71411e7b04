//! Build settings in world units
//!
//! `NavMeshSettings` is the record a caller hands to a graph. It is expressed
//! in world units and converted to voxel units per build.

use std::fs;
use std::path::Path;

use glam::Vec3;
use recast::{PartitionType, RecastConfig};
use recast_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Whether the mesh is one tile or a grid of tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    #[default]
    Solo,
    Tiled,
}

/// Region partitioning used by the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMode {
    #[default]
    Watershed,
    Monotone,
}

impl From<PartitionMode> for PartitionType {
    fn from(mode: PartitionMode) -> Self {
        match mode {
            PartitionMode::Watershed => PartitionType::Watershed,
            PartitionMode::Monotone => PartitionType::Monotone,
        }
    }
}

/// Navigation mesh build settings for one agent type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavMeshSettings {
    /// Horizontal voxel size
    pub cell_size: f32,
    /// Vertical voxel size
    pub cell_height: f32,
    /// Steepest walkable slope in degrees
    pub walkable_slope_angle: f32,
    /// Agent height
    pub walkable_height: f32,
    /// Highest ledge the agent can step up
    pub walkable_climb: f32,
    /// Agent radius
    pub walkable_radius: f32,
    /// Longest contour edge along the mesh border, zero to disable
    pub max_edge_len: f32,
    /// How far a simplified contour may stray from the voxel outline, in cells
    pub max_simplification_error: f32,
    /// Side length in cells of the smallest island region kept
    pub min_region_area: f32,
    /// Side length in cells below which regions are merged
    pub merge_region_area: f32,
    pub max_verts_per_poly: u32,
    /// Detail sampling distance in cells, below 0.9 disables sampling
    pub detail_sample_dist: f32,
    /// Detail height error in cell heights
    pub detail_sample_max_error: f32,
    /// Tile side length in cells
    pub tile_size: u32,
    pub build_mode: BuildMode,
    pub partition_type: PartitionMode,
    /// Keep compressed tile layers for obstacle rebuilds
    pub use_tile_cache: bool,
    /// Node pool size of queries handed out by the graph
    pub max_nodes: usize,
    /// Obstacle capacity of the tile cache
    pub max_obstacles: u32,
}

impl Default for NavMeshSettings {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            walkable_slope_angle: 45.0,
            walkable_height: 2.0,
            walkable_climb: 0.9,
            walkable_radius: 0.6,
            max_edge_len: 12.0,
            max_simplification_error: 1.3,
            min_region_area: 8.0,
            merge_region_area: 20.0,
            max_verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            tile_size: 48,
            build_mode: BuildMode::Solo,
            partition_type: PartitionMode::Watershed,
            use_tile_cache: false,
            max_nodes: 2048,
            max_obstacles: 128,
        }
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::NavMeshGeneration(format!("invalid settings: {}", msg.into()))
}

impl NavMeshSettings {
    /// Checks ranges before anything is built.
    pub fn validate(&self) -> Result<()> {
        if !(self.cell_size > 0.0 && self.cell_height > 0.0) {
            return Err(invalid("cell size and height must be positive"));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(invalid(format!("slope angle {} out of 0..=90", self.walkable_slope_angle)));
        }
        if self.walkable_height < self.cell_height * 3.0 {
            return Err(invalid("walkable height must span at least 3 cells"));
        }
        if self.walkable_climb < 0.0 || self.walkable_radius < 0.0 {
            return Err(invalid("negative climb or radius"));
        }
        if !(3..=detour::MAX_VERTS_PER_POLY as u32).contains(&self.max_verts_per_poly) {
            return Err(invalid(format!(
                "vertices per polygon must be in 3..={}",
                detour::MAX_VERTS_PER_POLY
            )));
        }
        if self.build_mode == BuildMode::Tiled && self.tile_size == 0 {
            return Err(invalid("tiled builds need a tile size"));
        }
        if self.max_nodes == 0 || self.max_nodes > 0xffff {
            return Err(invalid(format!("max nodes {} out of 1..=65535", self.max_nodes)));
        }
        Ok(())
    }

    /// Border cells added around each tile
    pub fn border_size(&self) -> i32 {
        match self.build_mode {
            BuildMode::Solo => 0,
            BuildMode::Tiled => self.walkable_radius_voxels() + 3,
        }
    }

    fn walkable_radius_voxels(&self) -> i32 {
        (self.walkable_radius / self.cell_size).ceil() as i32
    }

    /// World size of one tile along x and z
    pub fn tile_world_size(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// Voxel-unit configuration without bounds
    pub fn to_recast_config(&self) -> RecastConfig {
        let cs = self.cell_size;
        let ch = self.cell_height;
        RecastConfig {
            width: 0,
            height: 0,
            tile_size: match self.build_mode {
                BuildMode::Solo => 0,
                BuildMode::Tiled => self.tile_size as i32,
            },
            border_size: self.border_size(),
            cs,
            ch,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: self.walkable_slope_angle,
            walkable_height: (self.walkable_height / ch).ceil() as i32,
            walkable_climb: (self.walkable_climb / ch).floor() as i32,
            walkable_radius: self.walkable_radius_voxels(),
            max_edge_len: (self.max_edge_len / cs) as i32,
            max_simplification_error: self.max_simplification_error,
            min_region_area: (self.min_region_area * self.min_region_area) as i32,
            merge_region_area: (self.merge_region_area * self.merge_region_area) as i32,
            max_vertices_per_polygon: self.max_verts_per_poly as i32,
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                cs * self.detail_sample_dist
            },
            detail_sample_max_error: ch * self.detail_sample_max_error,
            partition_type: self.partition_type.into(),
        }
    }

    /// Configuration covering the whole of `[bmin, bmax]` as one tile
    pub fn solo_config(&self, bmin: Vec3, bmax: Vec3) -> RecastConfig {
        let mut cfg = self.to_recast_config();
        cfg.border_size = 0;
        cfg.tile_size = 0;
        cfg.calculate_grid_size(bmin, bmax);
        cfg
    }

    /// Configuration of tile `(tx, ty)` of a grid anchored at `bmin`,
    /// bounds padded by the border.
    pub fn tile_config(&self, tx: i32, ty: i32, bmin: Vec3, bmax: Vec3) -> RecastConfig {
        let mut cfg = self.to_recast_config();
        let tws = self.tile_world_size();
        let pad = cfg.border_size as f32 * cfg.cs;
        cfg.bmin = Vec3::new(bmin.x + tx as f32 * tws - pad, bmin.y, bmin.z + ty as f32 * tws - pad);
        cfg.bmax = Vec3::new(
            bmin.x + (tx + 1) as f32 * tws + pad,
            bmax.y,
            bmin.z + (ty + 1) as f32 * tws + pad,
        );
        cfg.width = cfg.tile_size + cfg.border_size * 2;
        cfg.height = cfg.tile_size + cfg.border_size * 2;
        cfg
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Io(e.into()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Io(e.into()))
    }

    /// Reads and validates settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let settings = Self::from_json(&fs::read_to_string(path)?)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_convert_to_voxels() {
        let s = NavMeshSettings::default();
        s.validate().unwrap();
        let cfg = s.to_recast_config();
        assert_eq!(cfg.walkable_height, 10);
        assert_eq!(cfg.walkable_climb, 4);
        assert_eq!(cfg.walkable_radius, 2);
        assert_eq!(cfg.max_edge_len, 40);
        assert_eq!(cfg.min_region_area, 64);
        assert_eq!(cfg.merge_region_area, 400);
        assert_eq!(cfg.border_size, 0);
        assert!((cfg.detail_sample_dist - 1.8).abs() < 1e-5);
        assert!((cfg.detail_sample_max_error - 0.2).abs() < 1e-5);
    }

    #[test]
    fn test_tile_config_is_padded() {
        let s = NavMeshSettings {
            build_mode: BuildMode::Tiled,
            tile_size: 32,
            cell_size: 0.25,
            ..NavMeshSettings::default()
        };
        let cfg = s.tile_config(1, 2, Vec3::new(-4.0, -1.0, 0.0), Vec3::new(20.0, 3.0, 20.0));
        assert_eq!(cfg.border_size, 6);
        assert_eq!(cfg.width, 44);
        assert_eq!(cfg.bmin, Vec3::new(2.5, -1.0, 14.5));
        assert_eq!(cfg.bmax, Vec3::new(13.5, 3.0, 25.5));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            NavMeshSettings {
                cell_size: 0.0,
                ..NavMeshSettings::default()
            },
            NavMeshSettings {
                walkable_height: 0.4,
                ..NavMeshSettings::default()
            },
            NavMeshSettings {
                max_verts_per_poly: 7,
                ..NavMeshSettings::default()
            },
            NavMeshSettings {
                build_mode: BuildMode::Tiled,
                tile_size: 0,
                ..NavMeshSettings::default()
            },
            NavMeshSettings {
                max_nodes: 0,
                ..NavMeshSettings::default()
            },
        ];
        for s in bad {
            assert!(s.validate().is_err(), "{:?}", s);
        }
    }

    #[test]
    fn test_json_round_trip_and_partial_input() {
        let s = NavMeshSettings {
            build_mode: BuildMode::Tiled,
            partition_type: PartitionMode::Monotone,
            use_tile_cache: true,
            ..NavMeshSettings::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        s.save(&path).unwrap();
        assert_eq!(NavMeshSettings::load(&path).unwrap(), s);

        let partial = NavMeshSettings::from_json(r#"{ "walkable_radius": 0.3, "build_mode": "tiled" }"#).unwrap();
        assert_eq!(partial.walkable_radius, 0.3);
        assert_eq!(partial.build_mode, BuildMode::Tiled);
        assert_eq!(partial.cell_size, 0.3);

        assert!(NavMeshSettings::from_json("{ not json").is_err());
    }
}
