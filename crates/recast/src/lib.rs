//! Recast component for navigation mesh generation
//!
//! Recast turns input triangle meshes into navigation meshes: triangles are
//! voxelized into a heightfield, the walkable surface is partitioned into
//! regions, region outlines are traced into contours and the contours are
//! triangulated into convex polygons with a height detail mesh on top.

mod area;
mod compact_heightfield;
mod config;
mod contour;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod polymesh;
mod rasterization;
mod region;


use glam::Vec3;
use log::{debug, info};
use recast_common::{Error, Result};

pub use area::{
    erode_walkable_area, mark_box_area, mark_convex_poly_area, mark_cylinder_area, mark_rotated_box_area,
    median_filter_walkable_area,
};
pub use compact_heightfield::{CompactCell, CompactHeightfield, CompactSpan, RC_NOT_CONNECTED};
pub use config::{calc_grid_size, PartitionType, RecastConfig};
pub use contour::{
    BuildContoursFlags, Contour, ContourSet, ContourVertex, RC_AREA_BORDER, RC_BORDER_VERTEX, RC_CONTOUR_REG_MASK,
};
pub use detail_mesh::{PolyMeshDetail, DETAIL_EDGE_BOUNDARY};
pub use distance_field::build_distance_field;
pub use heightfield::{get_dir_for_offset, get_dir_offset_x, get_dir_offset_z, Heightfield, Span, NULL_SPAN};
pub use polymesh::{count_poly_verts, PolyMesh, MAX_VERTS_PER_POLY, MESH_NULL_IDX, RC_MULTIPLE_REGS, RC_PORTAL_FLAG};
pub use rasterization::{
    clear_unwalkable_triangles, mark_walkable_triangles, rasterize_triangle, rasterize_triangle_spans,
    rasterize_triangles, RasterSpan,
};
pub use region::{build_regions_monotone, build_regions_watershed, RC_BORDER_REG};

/// Area id of unwalkable space
pub const RC_NULL_AREA: u8 = 0;
/// Default area id of walkable space
pub const RC_WALKABLE_AREA: u8 = 63;
/// Largest span height the heightfield can store
pub const SPAN_MAX_HEIGHT: u16 = (1 << 13) - 1;

/// Output of a pipeline run.
///
/// The compact heightfield and contour set are only kept when the builder was
/// asked to keep intermediates.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildArtifacts {
    pub poly_mesh: PolyMesh,
    pub detail_mesh: PolyMeshDetail,
    pub compact_heightfield: Option<CompactHeightfield>,
    pub contour_set: Option<ContourSet>,
}

/// Builder for Recast navigation mesh generation
#[derive(Debug, Clone)]
pub struct RecastBuilder {
    config: RecastConfig,
    contour_flags: BuildContoursFlags,
    keep_intermediates: bool,
}

impl RecastBuilder {
    /// Creates a new RecastBuilder with the specified configuration
    pub fn new(config: RecastConfig) -> Self {
        Self {
            config,
            contour_flags: BuildContoursFlags::default(),
            keep_intermediates: false,
        }
    }

    /// Gets a reference to the configuration
    pub fn config(&self) -> &RecastConfig {
        &self.config
    }

    /// Selects which contour edges are split at `max_edge_len`
    pub fn with_contour_flags(mut self, flags: BuildContoursFlags) -> Self {
        self.contour_flags = flags;
        self
    }

    /// Keeps the compact heightfield and contour set in the returned artifacts
    pub fn with_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    /// Runs the full pipeline. Returns `Ok(None)` when the input produces no
    /// walkable polygons.
    pub fn build(&self, verts: &[Vec3], tris: &[[u32; 3]]) -> Result<Option<BuildArtifacts>> {
        self.config.validate()?;
        if tris.is_empty() {
            debug!("no triangles to build");
            return Ok(None);
        }

        let hf = self.build_heightfield(verts, tris)?;
        let chf = self.build_compact_heightfield(&hf)?;
        self.build_from_compact(chf)
    }

    /// Runs the full pipeline and returns only the meshes.
    pub fn build_mesh(&self, verts: &[Vec3], tris: &[[u32; 3]]) -> Result<Option<(PolyMesh, PolyMeshDetail)>> {
        Ok(self.build(verts, tris)?.map(|a| (a.poly_mesh, a.detail_mesh)))
    }

    /// Rasterizes the triangles and applies the walkability filters.
    pub fn build_heightfield(&self, verts: &[Vec3], tris: &[[u32; 3]]) -> Result<Heightfield> {
        let cfg = &self.config;
        if let Some(bad) = tris.iter().flatten().find(|&&i| i as usize >= verts.len()) {
            return Err(Error::InvalidMesh(format!(
                "triangle index {} out of bounds ({} vertices)",
                bad,
                verts.len()
            )));
        }

        let mut hf = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch);
        let mut areas = vec![RC_NULL_AREA; tris.len()];
        mark_walkable_triangles(cfg.walkable_slope_angle, verts, tris, &mut areas);
        rasterize_triangles(&mut hf, verts, tris, &areas, cfg.walkable_climb)?;

        hf.filter_low_hanging_walkable_obstacles(cfg.walkable_climb);
        hf.filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb);
        hf.filter_walkable_low_height_spans(cfg.walkable_height);

        debug!(
            "heightfield {}x{}: {} spans, {} walkable",
            hf.width,
            hf.height,
            hf.span_count(),
            hf.walkable_span_count()
        );
        Ok(hf)
    }

    /// Compacts the heightfield. No erosion is applied yet.
    pub fn build_compact_heightfield(&self, hf: &Heightfield) -> Result<CompactHeightfield> {
        CompactHeightfield::build_from_heightfield(self.config.walkable_height, self.config.walkable_climb, hf)
    }

    /// Runs erosion, partitioning, contour tracing and meshing on a compact
    /// heightfield. Area marks must already be applied.
    pub fn build_from_compact(&self, mut chf: CompactHeightfield) -> Result<Option<BuildArtifacts>> {
        let cfg = &self.config;

        if chf.span_count() == 0 {
            debug!("no walkable spans");
            return Ok(None);
        }

        erode_walkable_area(&mut chf, cfg.walkable_radius);

        match cfg.partition_type {
            PartitionType::Watershed => {
                build_distance_field(&mut chf)?;
                build_regions_watershed(&mut chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)?;
            }
            PartitionType::Monotone => {
                build_regions_monotone(&mut chf, cfg.border_size, cfg.min_region_area, cfg.merge_region_area)?;
            }
        }

        let cset = ContourSet::build(&chf, cfg.max_simplification_error, cfg.max_edge_len, self.contour_flags)?;
        if cset.contours.is_empty() {
            debug!("no contours");
            return Ok(None);
        }

        let poly_mesh = PolyMesh::build(&cset, cfg.max_vertices_per_polygon as usize)?;
        if poly_mesh.poly_count() == 0 {
            debug!("no polygons");
            return Ok(None);
        }

        let detail_mesh = PolyMeshDetail::build(&poly_mesh, &chf, cfg.detail_sample_dist, cfg.detail_sample_max_error)?;

        info!(
            "built mesh: {} polygons, {} vertices, {} detail triangles",
            poly_mesh.poly_count(),
            poly_mesh.vert_count(),
            detail_mesh.tri_count()
        );

        let (compact_heightfield, contour_set) = if self.keep_intermediates {
            (Some(chf), Some(cset))
        } else {
            (None, None)
        };

        Ok(Some(BuildArtifacts {
            poly_mesh,
            detail_mesh,
            compact_heightfield,
            contour_set,
        }))
    }
}
