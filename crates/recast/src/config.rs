//! Configuration for the Recast navigation mesh generation process

use glam::Vec3;
use recast_common::{Error, Result};

/// Region partitioning algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum PartitionType {
    /// Distance field flood fill. Produces the nicest regions but is the slowest.
    #[default]
    Watershed,
    /// Row sweep. Fast, guarantees holes-free regions, but regions can be long and thin.
    Monotone,
}

/// Configuration parameters for Recast navigation mesh generation.
///
/// Distances marked "voxels" are expressed in cell units: `cs` horizontally,
/// `ch` vertically.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct RecastConfig {
    /// The width of the field along the x-axis
    pub width: i32,
    /// The height of the field along the z-axis
    pub height: i32,
    /// Width and depth of a tile in voxels, zero for single-tile builds
    pub tile_size: i32,
    /// Size of the non-navigable border around the heightfield
    pub border_size: i32,

    /// The width/depth resolution of the field (cell size)
    pub cs: f32,
    /// The height resolution of the field (cell height)
    pub ch: f32,

    /// The minimum bounds of the field's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the field's AABB
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable
    pub walkable_slope_angle: f32,
    /// Minimum floor to ceiling height that still allows the floor to be walkable (voxels)
    pub walkable_height: i32,
    /// Maximum ledge height that is considered traversable (voxels)
    pub walkable_climb: i32,
    /// Distance to erode the walkable area away from obstructions (voxels)
    pub walkable_radius: i32,

    /// Maximum contour edge length along the mesh border (voxels)
    pub max_edge_len: i32,
    /// Maximum distance a simplified contour may deviate from the raw contour (voxels)
    pub max_simplification_error: f32,
    /// Minimum number of cells allowed to form an isolated island area
    pub min_region_area: i32,
    /// Regions smaller than this are merged with larger neighbours when possible
    pub merge_region_area: i32,

    /// Maximum number of vertices per polygon
    pub max_vertices_per_polygon: i32,

    /// Sampling distance used when generating the detail mesh (world units)
    pub detail_sample_dist: f32,
    /// Maximum distance the detail surface may deviate from the heightfield (world units)
    pub detail_sample_max_error: f32,

    /// Region partitioning algorithm
    pub partition_type: PartitionType,
}

impl Default for RecastConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            tile_size: 0,
            border_size: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 4,
            walkable_radius: 2,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            max_vertices_per_polygon: 6,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
            partition_type: PartitionType::Watershed,
        }
    }
}

impl RecastConfig {
    /// Creates a new RecastConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bounds and derives the grid size from them.
    pub fn calculate_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        let (w, h) = calc_grid_size(bmin, bmax, self.cs);
        self.width = w;
        self.height = h;
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::Recast(format!(
                "invalid grid size {}x{}",
                self.width, self.height
            )));
        }
        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::Recast("invalid cell size or height".to_string()));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::Recast(format!(
                "invalid walkable slope angle {}",
                self.walkable_slope_angle
            )));
        }
        if self.walkable_height < 3 {
            return Err(Error::Recast("walkable height must be at least 3 voxels".to_string()));
        }
        if self.walkable_climb < 0 || self.walkable_radius < 0 || self.border_size < 0 {
            return Err(Error::Recast("negative climb, radius or border".to_string()));
        }
        if !(3..=crate::polymesh::MAX_VERTS_PER_POLY as i32).contains(&self.max_vertices_per_polygon) {
            return Err(Error::Recast(format!(
                "vertices per polygon must be in 3..={}",
                crate::polymesh::MAX_VERTS_PER_POLY
            )));
        }
        if self.bmin.x > self.bmax.x || self.bmin.y > self.bmax.y || self.bmin.z > self.bmax.z {
            return Err(Error::Recast("inverted bounds".to_string()));
        }
        Ok(())
    }
}

/// Number of cells covering `[bmin, bmax]` on the XZ plane.
pub fn calc_grid_size(bmin: Vec3, bmax: Vec3, cs: f32) -> (i32, i32) {
    (
        ((bmax.x - bmin.x) / cs + 0.5) as i32,
        ((bmax.z - bmin.z) / cs + 0.5) as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size() {
        let mut cfg = RecastConfig::default();
        cfg.cs = 0.5;
        cfg.calculate_grid_size(Vec3::ZERO, Vec3::new(10.0, 2.0, 5.0));
        assert_eq!((cfg.width, cfg.height), (20, 10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = RecastConfig::default();
        assert!(cfg.validate().is_err());
        cfg.calculate_grid_size(Vec3::ZERO, Vec3::splat(3.0));
        cfg.max_vertices_per_polygon = 2;
        assert!(cfg.validate().is_err());
        cfg.max_vertices_per_polygon = 6;
        cfg.walkable_slope_angle = 91.0;
        assert!(cfg.validate().is_err());
    }
}
