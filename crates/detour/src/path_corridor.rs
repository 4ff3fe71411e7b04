//! Path corridor for path following
//!
//! A corridor is the polygon path from an agent's position to its target.
//! Small moves of either end are spliced into the existing path with the
//! `merge_corridor_*` helpers instead of searching again.

use glam::Vec3;
use log::debug;

use crate::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, Result, Status, StraightPathFlags, StraightPathOptions, StraightPathPoint};

/// Corners closer than this to the agent are dropped.
const MIN_TARGET_DIST: f32 = 0.01;

/// Polygons kept from one `move_along_surface` call
const MAX_VISITED: usize = 16;

/// Polygons examined by the local optimizations
const MAX_RES: usize = 32;

/// Iterations of the local search run by `optimize_path_topology`
const MAX_ITER: usize = 32;

/// Latest polygon of `path` that also appears in `visited`, searching the
/// path from its end. Returns `(path index, earliest visited index)`.
fn furthest_common_from_end(path: &[PolyRef], visited: &[PolyRef]) -> Option<(usize, usize)> {
    path.iter()
        .enumerate()
        .rev()
        .find_map(|(i, p)| visited.iter().position(|v| v == p).map(|j| (i, j)))
}

/// Replaces the start of `path` with the polygons walked by a move of the
/// start position. `visited` runs from the old start to the new one.
pub fn merge_corridor_start_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((furthest_path, furthest_visited)) = furthest_common_from_end(path, visited) else {
        return;
    };

    // Walked polygons in reverse, from the new start back to the common one.
    let req = visited.len() - furthest_visited;
    let orig = (furthest_path + 1).min(path.len());
    let size = (path.len() - orig).min(max_path.saturating_sub(req));

    let mut merged: Vec<PolyRef> = visited[furthest_visited..].iter().rev().copied().collect();
    merged.extend_from_slice(&path[orig..orig + size]);
    merged.truncate(max_path);
    *path = merged;
}

/// Same splice as `merge_corridor_start_moved`, used when replanning the
/// start of a followed path.
pub fn fixup_corridor(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    merge_corridor_start_moved(path, max_path, visited);
}

/// Appends the polygons walked by a move of the end position.
pub fn merge_corridor_end_moved(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let common = path
        .iter()
        .enumerate()
        .find_map(|(i, p)| visited.iter().position(|v| v == p).map(|j| (i, j)));
    let Some((furthest_path, furthest_visited)) = common else {
        return;
    };

    let ppos = furthest_path + 1;
    let vpos = furthest_visited + 1;
    let count = (visited.len() - vpos).min(max_path.saturating_sub(ppos));

    path.truncate(ppos);
    path.extend_from_slice(&visited[vpos..vpos + count]);
}

/// Replaces the start of `path` with a shortcut found by a raycast or local
/// search. `visited` runs from the start to a polygon further down the path.
pub fn merge_corridor_start_shortcut(path: &mut Vec<PolyRef>, max_path: usize, visited: &[PolyRef]) {
    let Some((furthest_path, furthest_visited)) = furthest_common_from_end(path, visited) else {
        return;
    };

    let req = furthest_visited;
    if req == 0 {
        return;
    }

    let orig = furthest_path;
    let size = (path.len() - orig).min(max_path.saturating_sub(req));

    let mut merged = visited[..req].to_vec();
    merged.extend_from_slice(&path[orig..orig + size]);
    merged.truncate(max_path);
    *path = merged;
}

/// Removes a U-turn at the start of `path`: when a polygon a few steps
/// ahead is adjacent to the first one, the path jumps straight to it.
pub fn fixup_shortcuts(path: &mut Vec<PolyRef>, nav: &NavMesh) {
    const MAX_NEIS: usize = 16;
    const MAX_LOOK_AHEAD: usize = 6;

    if path.len() < 3 {
        return;
    }

    let Ok((tile, poly)) = nav.get_tile_and_poly_by_ref(path[0]) else {
        return;
    };
    let neis: Vec<PolyRef> = tile
        .links_of(poly)
        .map(|l| l.reference)
        .filter(|r| r.is_valid())
        .take(MAX_NEIS)
        .collect();

    let cut = (2..MAX_LOOK_AHEAD.min(path.len()))
        .rev()
        .find(|&i| neis.contains(&path[i]));

    if let Some(cut) = cut {
        path.drain(1..cut);
    }
}

/// Polygon corridor between an agent and its target
#[derive(Debug, Clone)]
pub struct PathCorridor {
    pos: Vec3,
    target: Vec3,
    path: Vec<PolyRef>,
    max_path: usize,
}

impl PathCorridor {
    pub fn new(max_path: usize) -> Self {
        Self {
            pos: Vec3::ZERO,
            target: Vec3::ZERO,
            path: Vec::with_capacity(max_path),
            max_path: max_path.max(1),
        }
    }

    /// Places the agent at `pos` in polygon `r` with no target.
    pub fn reset(&mut self, r: PolyRef, pos: Vec3) {
        self.pos = pos;
        self.target = pos;
        self.path.clear();
        self.path.push(r);
    }

    pub fn pos(&self) -> Vec3 {
        self.pos
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn path(&self) -> &[PolyRef] {
        &self.path
    }

    pub fn path_count(&self) -> usize {
        self.path.len()
    }

    pub fn max_path(&self) -> usize {
        self.max_path
    }

    pub fn first_poly(&self) -> PolyRef {
        self.path.first().copied().unwrap_or(PolyRef::NULL)
    }

    pub fn last_poly(&self) -> PolyRef {
        self.path.last().copied().unwrap_or(PolyRef::NULL)
    }

    /// Loads a new target and polygon path.
    pub fn set_corridor(&mut self, target: Vec3, path: &[PolyRef]) {
        self.target = target;
        self.path.clear();
        self.path.extend_from_slice(&path[..path.len().min(self.max_path)]);
    }

    /// Next corners to steer towards, up to the first off-mesh connection.
    pub fn find_corners(&self, max_corners: usize, query: &NavMeshQuery) -> Result<Vec<StraightPathPoint>> {
        if self.path.is_empty() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let straight = query.find_straight_path(
            self.pos,
            self.target,
            &self.path,
            max_corners,
            StraightPathOptions::empty(),
        )?;
        let mut corners = straight.points;

        let skip = corners
            .iter()
            .take_while(|c| {
                !c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION)
                    && recast_common::dist_sqr_2d(c.pos, self.pos) <= MIN_TARGET_DIST * MIN_TARGET_DIST
            })
            .count();
        corners.drain(..skip);

        if let Some(i) = corners
            .iter()
            .position(|c| c.flags.contains(StraightPathFlags::OFFMESH_CONNECTION))
        {
            corners.truncate(i + 1);
        }
        Ok(corners)
    }

    /// Shortcuts the corridor when `next` is directly visible from the
    /// current position. Returns whether the path changed.
    pub fn optimize_path_visibility(
        &mut self,
        next: Vec3,
        path_optimization_range: f32,
        query: &NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<bool> {
        if self.path.is_empty() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let dist = recast_common::dist_2d(self.pos, next);
        if dist < 0.01 {
            return Ok(false);
        }

        // Overshoot a little to open up fields in tiled meshes.
        let dist = (dist + 0.01).min(path_optimization_range);
        let goal = self.pos + (next - self.pos) * (path_optimization_range / dist);

        let hit = query.raycast(self.path[0], self.pos, goal, filter, MAX_RES)?;
        if hit.path.len() > 1 && hit.t > 0.99 {
            let before = self.path.len();
            merge_corridor_start_shortcut(&mut self.path, self.max_path, &hit.path);
            return Ok(self.path.len() != before);
        }
        Ok(false)
    }

    /// Runs a short local search from the first polygon towards the target
    /// and splices the result in. Returns whether a path was merged.
    pub fn optimize_path_topology(&mut self, query: &mut NavMeshQuery, filter: &QueryFilter) -> bool {
        if self.path.len() < 3 {
            return false;
        }

        query.init_sliced_find_path(self.path[0], self.last_poly(), self.pos, self.target, filter);
        query.update_sliced_find_path(MAX_ITER);
        match query.finalize_sliced_find_path_partial(&self.path, MAX_RES) {
            Ok(res) if res.status.is_success() && !res.path.is_empty() => {
                merge_corridor_start_shortcut(&mut self.path, self.max_path, &res.path);
                true
            }
            _ => false,
        }
    }

    /// Advances the corridor past the off-mesh connection `offmesh_ref`.
    /// Returns the polygons on both sides of it and its start and end point.
    pub fn move_over_offmesh_connection(
        &mut self,
        offmesh_ref: PolyRef,
        nav: &NavMesh,
    ) -> Result<([PolyRef; 2], Vec3, Vec3)> {
        let Some(idx) = self.path.iter().position(|&r| r == offmesh_ref) else {
            return Err(Status::failure(Status::INVALID_PARAM));
        };
        let prev_ref = if idx > 0 { self.path[idx - 1] } else { PolyRef::NULL };

        let (start, end) = nav.get_off_mesh_connection_poly_end_points(prev_ref, offmesh_ref)?;
        self.path.drain(..=idx);
        self.pos = end;
        Ok(([prev_ref, offmesh_ref], start, end))
    }

    /// Moves the agent along the surface towards `npos`, updating the start
    /// of the corridor.
    pub fn move_position(&mut self, npos: Vec3, query: &mut NavMeshQuery, filter: &QueryFilter) -> Result<()> {
        if self.path.is_empty() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let (mut result, mut visited) = query.move_along_surface(self.path[0], self.pos, npos, filter)?;
        visited.truncate(MAX_VISITED);
        merge_corridor_start_moved(&mut self.path, self.max_path, &visited);

        // Stay on top of the mesh.
        if let Ok(h) = query.get_poly_height(self.path[0], result) {
            result.y = h;
        }
        self.pos = result;
        Ok(())
    }

    /// Moves the target along the surface towards `npos`, updating the end
    /// of the corridor.
    pub fn move_target_position(&mut self, npos: Vec3, query: &mut NavMeshQuery, filter: &QueryFilter) -> Result<()> {
        if self.path.is_empty() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let (result, mut visited) = query.move_along_surface(self.last_poly(), self.target, npos, filter)?;
        visited.truncate(MAX_VISITED);
        merge_corridor_end_moved(&mut self.path, self.max_path, &visited);
        self.target = result;
        Ok(())
    }

    /// Cuts the corridor at its first polygon that is gone or rejected by
    /// `filter`. An unusable first polygon is replaced by `safe_ref`.
    pub fn trim_invalid_path(
        &mut self,
        safe_ref: PolyRef,
        safe_pos: Vec3,
        query: &NavMeshQuery,
        filter: &QueryFilter,
    ) -> Result<()> {
        let n = self
            .path
            .iter()
            .take_while(|&&r| query.is_valid_poly_ref(r, filter))
            .count();

        if n == self.path.len() {
            return Ok(());
        }
        if n == 0 {
            self.pos = safe_pos;
            self.path.clear();
            self.path.push(safe_ref);
        } else {
            self.path.truncate(n);
        }
        debug!("corridor trimmed to {} polygons", self.path.len());

        self.target = query.closest_point_on_poly_boundary(self.last_poly(), self.target)?;
        Ok(())
    }

    /// Whether the first `max_look_ahead` polygons are still usable
    pub fn is_valid(&self, max_look_ahead: usize, query: &NavMeshQuery, filter: &QueryFilter) -> bool {
        self.path
            .iter()
            .take(max_look_ahead)
            .all(|&r| query.is_valid_poly_ref(r, filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::grid_navmesh;
    use crate::PolyFlags;

    fn refs(ids: &[u32]) -> Vec<PolyRef> {
        ids.iter().map(|&i| PolyRef::encode(1, 0, i)).collect()
    }

    #[test]
    fn test_merge_start_moved_forward_and_back() {
        let mut path = refs(&[1, 2, 3, 4]);
        merge_corridor_start_moved(&mut path, 16, &refs(&[1, 2, 3]));
        assert_eq!(path, refs(&[3, 4]));

        let mut path = refs(&[2, 3]);
        merge_corridor_start_moved(&mut path, 16, &refs(&[2, 1]));
        assert_eq!(path, refs(&[1, 2, 3]));

        // Nothing in common leaves the path alone.
        let mut path = refs(&[2, 3]);
        fixup_corridor(&mut path, 16, &refs(&[7, 8]));
        assert_eq!(path, refs(&[2, 3]));
    }

    #[test]
    fn test_merge_end_moved() {
        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, 16, &refs(&[3, 4, 5]));
        assert_eq!(path, refs(&[1, 2, 3, 4, 5]));

        let mut path = refs(&[1, 2, 3]);
        merge_corridor_end_moved(&mut path, 4, &refs(&[3, 4, 5]));
        assert_eq!(path, refs(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_merge_start_shortcut() {
        let mut path = refs(&[0, 1, 2, 5, 4, 7, 8]);
        merge_corridor_start_shortcut(&mut path, 16, &refs(&[0, 1, 4, 7, 8]));
        assert_eq!(path, refs(&[0, 1, 4, 7, 8]));

        // A shortcut ending on the first polygon changes nothing.
        let mut path = refs(&[0, 1, 2]);
        merge_corridor_start_shortcut(&mut path, 16, &refs(&[0]));
        assert_eq!(path, refs(&[0, 1, 2]));
    }

    #[test]
    fn test_fixup_shortcuts_removes_u_turn() {
        let mesh = grid_navmesh();
        let base = mesh.get_poly_ref_base(0);
        let mut path: Vec<PolyRef> = [0, 1, 2, 5, 4, 3].iter().map(|&i| base.with_poly(i)).collect();
        fixup_shortcuts(&mut path, &mesh);
        assert_eq!(path, vec![base.with_poly(0), base.with_poly(3)]);
    }

    #[test]
    fn test_move_position_advances_start() {
        let mesh = grid_navmesh();
        let base = mesh.get_poly_ref_base(0);
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let filter = QueryFilter::default();

        let mut corridor = PathCorridor::new(32);
        corridor.reset(base.with_poly(0), Vec3::new(0.5, 0.0, 0.5));
        corridor.set_corridor(Vec3::new(2.5, 0.0, 0.5), &[base, base.with_poly(1), base.with_poly(2)]);

        let corners = corridor.find_corners(4, &query).unwrap();
        assert_eq!(corners.len(), 1);
        assert!(corners[0].flags.contains(StraightPathFlags::END));

        corridor.move_position(Vec3::new(1.5, 0.0, 0.5), &mut query, &filter).unwrap();
        assert_eq!(corridor.path(), &[base.with_poly(1), base.with_poly(2)]);
        assert_eq!(corridor.pos(), Vec3::new(1.5, 0.0, 0.5));

        corridor
            .move_target_position(Vec3::new(2.5, 0.0, 1.5), &mut query, &filter)
            .unwrap();
        assert_eq!(corridor.last_poly(), base.with_poly(5));
    }

    #[test]
    fn test_optimize_path_visibility() {
        let mesh = grid_navmesh();
        let base = mesh.get_poly_ref_base(0);
        let query = NavMeshQuery::new(&mesh, 256).unwrap();
        let filter = QueryFilter::default();

        let mut corridor = PathCorridor::new(32);
        corridor.reset(base, Vec3::new(0.5, 0.0, 0.3));
        let detour: Vec<PolyRef> = [0, 1, 2, 5, 4, 7, 8].iter().map(|&i| base.with_poly(i)).collect();
        let target = Vec3::new(2.5, 0.0, 2.7);
        corridor.set_corridor(target, &detour);

        assert!(corridor.optimize_path_visibility(target, 2.0, &query, &filter).unwrap());
        let polys: Vec<u32> = corridor.path().iter().map(|r| r.poly_index()).collect();
        assert_eq!(polys, vec![0, 1, 4, 7, 8]);
    }

    #[test]
    fn test_optimize_path_topology_keeps_endpoints() {
        let mesh = grid_navmesh();
        let base = mesh.get_poly_ref_base(0);
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let filter = QueryFilter::default();

        let mut corridor = PathCorridor::new(32);
        corridor.reset(base, Vec3::new(0.5, 0.0, 0.5));
        let detour: Vec<PolyRef> = [0, 1, 2, 5, 4, 7, 8].iter().map(|&i| base.with_poly(i)).collect();
        corridor.set_corridor(Vec3::new(2.5, 0.0, 2.5), &detour);

        assert!(corridor.optimize_path_topology(&mut query, &filter));
        assert_eq!(corridor.first_poly(), base);
        assert_eq!(corridor.last_poly(), base.with_poly(8));
        assert!(corridor.path_count() <= detour.len());
    }

    #[test]
    fn test_trim_invalid_path() {
        let mut mesh = grid_navmesh();
        let base = mesh.get_poly_ref_base(0);
        mesh.set_poly_flags(base.with_poly(2), PolyFlags::WALK | PolyFlags::DISABLED)
            .unwrap();
        let query = NavMeshQuery::new(&mesh, 256).unwrap();
        let filter = QueryFilter::new(PolyFlags::WALK, PolyFlags::DISABLED);

        let mut corridor = PathCorridor::new(32);
        corridor.reset(base, Vec3::new(0.5, 0.0, 0.5));
        corridor.set_corridor(Vec3::new(2.5, 0.0, 0.5), &[base, base.with_poly(1), base.with_poly(2)]);
        assert!(!corridor.is_valid(8, &query, &filter));

        corridor
            .trim_invalid_path(base, Vec3::new(0.5, 0.0, 0.5), &query, &filter)
            .unwrap();
        assert_eq!(corridor.path(), &[base, base.with_poly(1)]);
        assert!((corridor.target() - Vec3::new(2.0, 0.0, 0.5)).length() < 1e-5);
        assert!(corridor.is_valid(8, &query, &filter));
    }
}
