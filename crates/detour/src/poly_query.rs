//! Polygon visitors for `NavMeshQuery::query_polygons_with`
//!
//! The query hands every batch of filtered polygons found in one tile to the
//! visitor. The set of visitors is closed.

use glam::Vec3;

use crate::{MeshTile, NavMesh, PolyRef};

/// Collects polygon references up to a capacity
#[derive(Debug, Clone, Default)]
pub struct CollectPolys {
    pub polys: Vec<PolyRef>,
    pub max_polys: usize,
    /// Set when more polygons were found than fit
    pub overflow: bool,
}

impl CollectPolys {
    pub fn new(max_polys: usize) -> Self {
        Self {
            polys: Vec::new(),
            max_polys,
            overflow: false,
        }
    }

    fn process(&mut self, refs: &[PolyRef]) {
        let remaining = self.max_polys.saturating_sub(self.polys.len());
        if remaining < refs.len() {
            self.overflow = true;
            self.polys.extend_from_slice(&refs[..remaining]);
        } else {
            self.polys.extend_from_slice(refs);
        }
    }
}

/// Tracks the polygon closest to a point
#[derive(Debug, Clone)]
pub struct FindNearestPoly {
    pub center: Vec3,
    pub nearest_distance_sqr: f32,
    pub nearest_ref: PolyRef,
    pub nearest_point: Vec3,
    /// Whether `center` lies above or below the nearest polygon
    pub over_poly: bool,
}

impl FindNearestPoly {
    pub fn new(center: Vec3) -> Self {
        Self {
            center,
            nearest_distance_sqr: f32::MAX,
            nearest_ref: PolyRef::NULL,
            nearest_point: center,
            over_poly: false,
        }
    }

    fn process(&mut self, nav: &NavMesh, tile: &MeshTile, refs: &[PolyRef]) {
        let climb = tile.header.as_ref().map_or(0.0, |h| h.walkable_climb);
        for &r in refs {
            let Ok((closest, over_poly)) = nav.closest_point_on_poly(r, self.center) else {
                continue;
            };
            // Within climb height of a polygon below counts as standing on it.
            let diff = self.center - closest;
            let d = if over_poly {
                let d = diff.y.abs() - climb;
                if d > 0.0 {
                    d * d
                } else {
                    0.0
                }
            } else {
                diff.length_squared()
            };
            if d < self.nearest_distance_sqr {
                self.nearest_distance_sqr = d;
                self.nearest_ref = r;
                self.nearest_point = closest;
                self.over_poly = over_poly;
            }
        }
    }
}

/// Visitor run over polygons found by a box query
#[derive(Debug, Clone)]
pub enum PolyQuery {
    Collect(CollectPolys),
    FindNearest(FindNearestPoly),
}

impl PolyQuery {
    /// Handles one batch of polygons from `tile`
    pub fn process(&mut self, nav: &NavMesh, tile: &MeshTile, refs: &[PolyRef]) {
        match self {
            PolyQuery::Collect(q) => q.process(refs),
            PolyQuery::FindNearest(q) => q.process(nav, tile, refs),
        }
    }
}
