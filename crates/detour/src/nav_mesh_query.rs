//! Navigation mesh query implementation for Detour
//!
//! `NavMeshQuery` borrows a `NavMesh` and owns the scratch state of its
//! searches (node pools and open list). A query is cheap to keep around and
//! must not be shared between threads while a search runs; create one per
//! worker instead.

use std::collections::VecDeque;

use glam::Vec3;
use log::trace;
use rand::Rng;
use recast_common::{
    dist_pt_seg_sqr_2d, distance_pt_poly_edges_sqr, intersect_seg_seg_2d, intersect_segment_poly_2d,
    point_in_polygon, random_point_in_convex_poly, sqr, tri_area_2d,
};

use crate::nav_mesh::{MeshTile, Poly};
use crate::node_pool::{NodeFlags, NodeIndex, NodePool, NodeQueue};
use crate::poly_query::{CollectPolys, FindNearestPoly, PolyQuery};
use crate::{
    vequal, NavMesh, PolyRef, PolyType, QueryFilter, Result, Status, StraightPathFlags, StraightPathOptions,
    DT_EXT_LINK, H_SCALE, MAX_VERTS_PER_POLY,
};

/// Size of the node pool used by local searches
const TINY_NODE_POOL_SIZE: usize = 64;

/// Polygons handed to a `PolyQuery` per call
const BATCH_SIZE: usize = 32;

/// Nearest polygon found by `find_nearest_poly`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoly {
    pub reference: PolyRef,
    /// Closest point on the polygon
    pub point: Vec3,
    /// Whether the query point lies above or below the polygon
    pub over_poly: bool,
}

/// Polygon corridor produced by a path search
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub path: Vec<PolyRef>,
    /// `SUCCESS` plus `PARTIAL_RESULT`, `OUT_OF_NODES` or `BUFFER_TOO_SMALL`
    pub status: Status,
}

/// Vertex of a straight path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    pub pos: Vec3,
    pub flags: StraightPathFlags,
    /// Polygon entered at this vertex, null at the end point
    pub reference: PolyRef,
}

/// Output of `find_straight_path`
#[derive(Debug, Clone, PartialEq)]
pub struct StraightPath {
    pub points: Vec<StraightPathPoint>,
    pub status: Status,
}

/// Output of `raycast`
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Hit parameter along the ray, `f32::MAX` when the end was reached
    pub t: f32,
    /// Normal of the wall that was hit
    pub hit_normal: Vec3,
    /// Edge of the last visited polygon the ray left through
    pub hit_edge_index: Option<usize>,
    /// Polygons visited by the ray
    pub path: Vec<PolyRef>,
    pub status: Status,
}

impl RaycastHit {
    /// The ray reached its end point without hitting a wall
    pub fn reached_end(&self) -> bool {
        self.t == f32::MAX
    }
}

/// State of an in-flight sliced path search
#[derive(Debug, Clone)]
struct SlicedQuery {
    status: Status,
    start_ref: PolyRef,
    end_ref: PolyRef,
    end_pos: Vec3,
    filter: QueryFilter,
    last_best_node: Option<NodeIndex>,
    last_best_node_cost: f32,
}

impl Default for SlicedQuery {
    fn default() -> Self {
        Self {
            status: Status::FAILURE,
            start_ref: PolyRef::NULL,
            end_ref: PolyRef::NULL,
            end_pos: Vec3::ZERO,
            filter: QueryFilter::default(),
            last_best_node: None,
            last_best_node_cost: f32::MAX,
        }
    }
}

fn poly_verts(tile: &MeshTile, poly: &Poly) -> ([Vec3; MAX_VERTS_PER_POLY], usize) {
    let mut verts = [Vec3::ZERO; MAX_VERTS_PER_POLY];
    let n = tile.poly_verts(poly, &mut verts);
    (verts, n)
}

fn poly_area(tile: &MeshTile, poly: &Poly) -> f32 {
    let (verts, nv) = poly_verts(tile, poly);
    (2..nv).map(|j| tri_area_2d(verts[0], verts[j - 1], verts[j])).sum()
}

fn is_valid_pos(p: Vec3) -> bool {
    p.is_finite()
}

/// Appends a straight path vertex, merging it with the previous one when they
/// coincide. Returns `IN_PROGRESS` while more vertices may follow.
fn append_vertex(
    points: &mut Vec<StraightPathPoint>,
    max_points: usize,
    pos: Vec3,
    flags: StraightPathFlags,
    reference: PolyRef,
) -> Status {
    if let Some(last) = points.last_mut().filter(|l| vequal(l.pos, pos)) {
        last.flags = flags;
        last.reference = reference;
        return Status::IN_PROGRESS;
    }

    points.push(StraightPathPoint { pos, flags, reference });
    if points.len() >= max_points {
        return Status::SUCCESS | Status::BUFFER_TOO_SMALL;
    }
    if flags == StraightPathFlags::END {
        return Status::SUCCESS;
    }
    Status::IN_PROGRESS
}

/// Navigation mesh query
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    nav: &'a NavMesh,
    node_pool: NodePool,
    tiny_node_pool: NodePool,
    open_list: NodeQueue,
    query: SlicedQuery,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query over `nav` able to expand up to `max_nodes` nodes per search.
    pub fn new(nav: &'a NavMesh, max_nodes: usize) -> Result<Self> {
        if max_nodes == 0 || max_nodes > NodeIndex::MAX as usize {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        Ok(Self {
            nav,
            node_pool: NodePool::new(max_nodes),
            tiny_node_pool: NodePool::new(TINY_NODE_POOL_SIZE),
            open_list: NodeQueue::new(max_nodes),
            query: SlicedQuery::default(),
        })
    }

    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav
    }

    /// Node pool of the last search
    pub fn node_pool(&self) -> &NodePool {
        &self.node_pool
    }

    fn tile_and_poly(&self, r: PolyRef) -> Result<(&'a MeshTile, &'a Poly)> {
        self.nav.get_tile_and_poly_by_ref(r)
    }

    /// Whether `r` resolves and passes `filter`
    pub fn is_valid_poly_ref(&self, r: PolyRef, filter: &QueryFilter) -> bool {
        self.tile_and_poly(r).is_ok_and(|(_, poly)| filter.pass_filter(poly))
    }

    /// Runs `query` over every polygon overlapping the box that passes `filter`.
    pub fn query_polygons_with(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
        query: &mut PolyQuery,
    ) -> Result<()> {
        if !is_valid_pos(center) || !is_valid_pos(half_extents) || half_extents.min_element() < 0.0 {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let bmin = center - half_extents;
        let bmax = center + half_extents;
        let (minx, miny) = self.nav.calc_tile_loc(bmin);
        let (maxx, maxy) = self.nav.calc_tile_loc(bmax);

        for y in miny..=maxy {
            for x in minx..=maxx {
                for ti in self.nav.tile_indices_at(x, y) {
                    let Some(tile) = self.nav.tile(ti) else {
                        continue;
                    };
                    let refs: Vec<PolyRef> = self
                        .nav
                        .query_polygons_in_tile(ti, bmin, bmax)
                        .into_iter()
                        .filter(|r| filter.pass_filter(&tile.polys[r.poly_index() as usize]))
                        .collect();
                    for batch in refs.chunks(BATCH_SIZE) {
                        query.process(self.nav, tile, batch);
                    }
                }
            }
        }
        Ok(())
    }

    /// Collects up to `max_polys` polygons overlapping the box. The status
    /// carries `BUFFER_TOO_SMALL` when more were found.
    pub fn query_polygons(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
        max_polys: usize,
    ) -> Result<(Vec<PolyRef>, Status)> {
        let mut query = PolyQuery::Collect(CollectPolys::new(max_polys));
        self.query_polygons_with(center, half_extents, filter, &mut query)?;
        let PolyQuery::Collect(collect) = query else {
            return Err(Status::FAILURE);
        };
        let status = if collect.overflow {
            Status::SUCCESS | Status::BUFFER_TOO_SMALL
        } else {
            Status::SUCCESS
        };
        Ok((collect.polys, status))
    }

    /// Finds the polygon nearest to `center` within the search box.
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Result<Option<NearestPoly>> {
        let mut query = PolyQuery::FindNearest(FindNearestPoly::new(center));
        self.query_polygons_with(center, half_extents, filter, &mut query)?;
        let PolyQuery::FindNearest(nearest) = query else {
            return Err(Status::FAILURE);
        };
        Ok(nearest.nearest_ref.is_valid().then_some(NearestPoly {
            reference: nearest.nearest_ref,
            point: nearest.nearest_point,
            over_poly: nearest.over_poly,
        }))
    }

    /// Closest point on the polygon's detail surface
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: Vec3) -> Result<(Vec3, bool)> {
        if !is_valid_pos(pos) {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        self.nav.closest_point_on_poly(r, pos)
    }

    /// `pos` when it lies inside the polygon, else the closest point on its
    /// boundary. Ignores height detail.
    pub fn closest_point_on_poly_boundary(&self, r: PolyRef, pos: Vec3) -> Result<Vec3> {
        let (tile, poly) = self.tile_and_poly(r)?;
        if !is_valid_pos(pos) {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let (verts, nv) = poly_verts(tile, poly);
        let mut edged = [0.0; MAX_VERTS_PER_POLY];
        let mut edget = [0.0; MAX_VERTS_PER_POLY];
        if distance_pt_poly_edges_sqr(pos, &verts[..nv], &mut edged, &mut edget) {
            return Ok(pos);
        }

        let mut imin = 0;
        for i in 1..nv {
            if edged[i] < edged[imin] {
                imin = i;
            }
        }
        Ok(verts[imin].lerp(verts[(imin + 1) % nv], edget[imin]))
    }

    /// Height of the polygon surface at `pos`
    pub fn get_poly_height(&self, r: PolyRef, pos: Vec3) -> Result<f32> {
        let (tile, poly) = self.tile_and_poly(r)?;
        if !is_valid_pos(pos) {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = tile.verts[poly.verts[0] as usize];
            let v1 = tile.verts[poly.verts[1] as usize];
            let (_, t) = dist_pt_seg_sqr_2d(pos, v0, v1);
            return Ok(v0.y + (v1.y - v0.y) * t);
        }

        self.nav
            .poly_height(tile, r.poly_index() as usize, pos)
            .ok_or(Status::failure(Status::INVALID_PARAM))
    }

    /// Left and right end of the portal between two adjacent polygons
    pub fn get_portal_points(&self, from: PolyRef, to: PolyRef) -> Result<(Vec3, Vec3)> {
        let (from_tile, from_poly) = self.tile_and_poly(from)?;
        let (to_tile, to_poly) = self.tile_and_poly(to)?;
        portal_points(from, from_poly, from_tile, to, to_poly, to_tile)
    }

    /// Middle of the portal between two adjacent polygons
    pub fn get_edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<Vec3> {
        let (left, right) = self.get_portal_points(from, to)?;
        Ok((left + right) * 0.5)
    }

    /// Whether the last search closed a node for `r`
    pub fn is_in_closed_list(&self, r: PolyRef) -> bool {
        self.node_pool
            .find_nodes(r)
            .into_iter()
            .any(|n| self.node_pool.node(n).flags.contains(NodeFlags::CLOSED))
    }

    fn edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Option<Vec3> {
        let (from_tile, from_poly) = self.tile_and_poly(from).ok()?;
        let (to_tile, to_poly) = self.tile_and_poly(to).ok()?;
        portal_points(from, from_poly, from_tile, to, to_poly, to_tile)
            .ok()
            .map(|(l, r)| (l + r) * 0.5)
    }

    /// Walks the parent chain back from `end`, keeping at most `max_path`
    /// polygons from the start side.
    fn get_path_to_node(&self, end: NodeIndex, max_path: usize) -> (Vec<PolyRef>, Status) {
        let mut path = Vec::new();
        let mut cur = Some(end);
        while let Some(n) = cur {
            let node = self.node_pool.node(n);
            path.push(node.id);
            cur = node.parent;
        }
        path.reverse();

        if path.len() > max_path {
            path.truncate(max_path);
            (path, Status::SUCCESS | Status::BUFFER_TOO_SMALL)
        } else {
            (path, Status::SUCCESS)
        }
    }

    /// A* search from `start_ref` to `end_ref`.
    ///
    /// When the goal cannot be reached the path leads to the visited polygon
    /// closest to the goal and the status carries `PARTIAL_RESULT`.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<PathResult> {
        if !self.nav.is_valid_poly_ref(start_ref)
            || !self.nav.is_valid_poly_ref(end_ref)
            || !is_valid_pos(start_pos)
            || !is_valid_pos(end_pos)
            || max_path == 0
        {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        if start_ref == end_ref {
            return Ok(PathResult {
                path: vec![start_ref],
                status: Status::SUCCESS,
            });
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_node = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        {
            let n = self.node_pool.node_mut(start_node);
            n.pos = start_pos;
            n.parent = None;
            n.cost = 0.0;
            n.total = start_pos.distance(end_pos) * H_SCALE;
            n.flags = NodeFlags::OPEN;
        }
        self.open_list.push(&self.node_pool, start_node);

        let mut last_best = start_node;
        let mut last_best_cost = self.node_pool.node(start_node).total;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            let best_node = {
                let n = self.node_pool.node_mut(best);
                n.flags.remove(NodeFlags::OPEN);
                n.flags.insert(NodeFlags::CLOSED);
                n.clone()
            };

            if best_node.id == end_ref {
                last_best = best;
                break;
            }

            let best_ref = best_node.id;
            let Ok((best_tile, best_poly)) = self.tile_and_poly(best_ref) else {
                continue;
            };
            let parent_ref = best_node.parent.map(|p| self.node_pool.node(p).id);

            for link in best_tile.links_of(best_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok((_, neighbour_poly)) = self.tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_poly) {
                    continue;
                }

                // One node per tile side so border polygons can be reached twice.
                let cross_side = if link.side != 0xff { link.side >> 1 } else { 0 };
                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, cross_side) else {
                    out_of_nodes = true;
                    continue;
                };

                if self.node_pool.node(neighbour).flags.is_empty() {
                    if let Some(mid) = self.edge_mid_point(best_ref, neighbour_ref) {
                        self.node_pool.node_mut(neighbour).pos = mid;
                    }
                }
                let neighbour_pos = self.node_pool.node(neighbour).pos;

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let cur_cost = filter.get_cost(best_node.pos, neighbour_pos, best_poly);
                    let end_cost = filter.get_cost(neighbour_pos, end_pos, neighbour_poly);
                    (best_node.cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.get_cost(best_node.pos, neighbour_pos, best_poly);
                    (best_node.cost + cur_cost, neighbour_pos.distance(end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let flags = self.node_pool.node(neighbour).flags;
                if flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= self.node_pool.node(neighbour).total {
                    continue;
                }

                {
                    let n = self.node_pool.node_mut(neighbour);
                    n.parent = Some(best);
                    n.flags.remove(NodeFlags::CLOSED);
                    n.cost = cost;
                    n.total = total;
                }

                if flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(&self.node_pool, neighbour);
                } else {
                    self.node_pool.node_mut(neighbour).flags.insert(NodeFlags::OPEN);
                    if !self.open_list.push(&self.node_pool, neighbour) {
                        out_of_nodes = true;
                    }
                }

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = neighbour;
                }
            }
        }

        let (path, mut status) = self.get_path_to_node(last_best, max_path);
        if self.node_pool.node(last_best).id != end_ref {
            status |= Status::PARTIAL_RESULT;
        }
        if out_of_nodes {
            status |= Status::OUT_OF_NODES;
        }
        trace!("find_path: {} polygons, {}", path.len(), status);
        Ok(PathResult { path, status })
    }

    /// Starts a path search that is advanced with `update_sliced_find_path`.
    pub fn init_sliced_find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Status {
        self.query = SlicedQuery {
            status: Status::FAILURE,
            start_ref,
            end_ref,
            end_pos,
            filter: filter.clone(),
            last_best_node: None,
            last_best_node_cost: f32::MAX,
        };

        if !self.nav.is_valid_poly_ref(start_ref)
            || !self.nav.is_valid_poly_ref(end_ref)
            || !is_valid_pos(start_pos)
            || !is_valid_pos(end_pos)
        {
            self.query.status = Status::failure(Status::INVALID_PARAM);
            return self.query.status;
        }

        if start_ref == end_ref {
            self.query.status = Status::SUCCESS;
            return self.query.status;
        }

        self.node_pool.clear();
        self.open_list.clear();

        let Some(start_node) = self.node_pool.get_node(start_ref, 0) else {
            self.query.status = Status::failure(Status::OUT_OF_NODES);
            return self.query.status;
        };
        let total = start_pos.distance(end_pos) * H_SCALE;
        {
            let n = self.node_pool.node_mut(start_node);
            n.pos = start_pos;
            n.parent = None;
            n.cost = 0.0;
            n.total = total;
            n.flags = NodeFlags::OPEN;
        }
        self.open_list.push(&self.node_pool, start_node);

        self.query.status = Status::IN_PROGRESS;
        self.query.last_best_node = Some(start_node);
        self.query.last_best_node_cost = total;
        self.query.status
    }

    /// Runs at most `max_iter` expansions of the sliced search. Returns the
    /// search status and the number of iterations done.
    pub fn update_sliced_find_path(&mut self, max_iter: usize) -> (Status, usize) {
        if !self.query.status.is_in_progress() {
            return (self.query.status, 0);
        }

        if !self.nav.is_valid_poly_ref(self.query.start_ref) || !self.nav.is_valid_poly_ref(self.query.end_ref) {
            self.query.status = Status::FAILURE;
            return (self.query.status, 0);
        }

        let end_ref = self.query.end_ref;
        let end_pos = self.query.end_pos;
        let filter = self.query.filter.clone();
        let mut iter = 0;

        while iter < max_iter {
            let Some(best) = self.open_list.pop(&self.node_pool) else {
                break;
            };
            iter += 1;

            let best_node = {
                let n = self.node_pool.node_mut(best);
                n.flags.remove(NodeFlags::OPEN);
                n.flags.insert(NodeFlags::CLOSED);
                n.clone()
            };

            if best_node.id == end_ref {
                self.query.last_best_node = Some(best);
                self.query.status = Status::success(self.query.status.detail());
                return (self.query.status, iter);
            }

            // Tiles may change between slices.
            let Ok((best_tile, best_poly)) = self.tile_and_poly(best_node.id) else {
                self.query.status = Status::FAILURE;
                return (self.query.status, iter);
            };
            let parent_ref = best_node.parent.map(|p| self.node_pool.node(p).id);
            if let Some(pr) = parent_ref {
                if !self.nav.is_valid_poly_ref(pr) {
                    self.query.status = Status::FAILURE;
                    return (self.query.status, iter);
                }
            }

            for link in best_tile.links_of(best_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok((_, neighbour_poly)) = self.tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(neighbour_poly) {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    self.query.status |= Status::OUT_OF_NODES;
                    continue;
                };

                // Siblings of the same parent were expanded already.
                let n_parent = self.node_pool.node(neighbour).parent;
                if n_parent.is_some() && n_parent == best_node.parent {
                    continue;
                }

                if self.node_pool.node(neighbour).flags.is_empty() {
                    if let Some(mid) = self.edge_mid_point(best_node.id, neighbour_ref) {
                        self.node_pool.node_mut(neighbour).pos = mid;
                    }
                }
                let neighbour_pos = self.node_pool.node(neighbour).pos;

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let cur_cost = filter.get_cost(best_node.pos, neighbour_pos, best_poly);
                    let end_cost = filter.get_cost(neighbour_pos, end_pos, neighbour_poly);
                    (best_node.cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.get_cost(best_node.pos, neighbour_pos, best_poly);
                    (best_node.cost + cur_cost, neighbour_pos.distance(end_pos) * H_SCALE)
                };
                let total = cost + heuristic;

                let flags = self.node_pool.node(neighbour).flags;
                if flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED) && total >= self.node_pool.node(neighbour).total {
                    continue;
                }

                {
                    let n = self.node_pool.node_mut(neighbour);
                    n.parent = Some(best);
                    n.flags.remove(NodeFlags::CLOSED);
                    n.cost = cost;
                    n.total = total;
                }

                if flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(&self.node_pool, neighbour);
                } else {
                    self.node_pool.node_mut(neighbour).flags.insert(NodeFlags::OPEN);
                    if !self.open_list.push(&self.node_pool, neighbour) {
                        self.query.status |= Status::OUT_OF_NODES;
                    }
                }

                if heuristic < self.query.last_best_node_cost {
                    self.query.last_best_node_cost = heuristic;
                    self.query.last_best_node = Some(neighbour);
                }
            }
        }

        // Open list exhausted without reaching the goal.
        if self.open_list.is_empty() {
            self.query.status = Status::success(self.query.status.detail());
        }
        (self.query.status, iter)
    }

    /// Path found by the sliced search, or towards the closest node when the
    /// goal was not reached.
    pub fn finalize_sliced_find_path(&mut self, max_path: usize) -> Result<PathResult> {
        let query = std::mem::take(&mut self.query);
        if query.status.is_failure() || max_path == 0 {
            return Err(Status::FAILURE);
        }

        if query.start_ref == query.end_ref {
            return Ok(PathResult {
                path: vec![query.start_ref],
                status: Status::SUCCESS,
            });
        }

        let Some(last) = query.last_best_node else {
            return Err(Status::FAILURE);
        };
        let mut details = query.status.detail();
        if self.node_pool.node(last).id != query.end_ref {
            details |= Status::PARTIAL_RESULT;
        }
        let (path, status) = self.get_path_to_node(last, max_path);
        Ok(PathResult {
            path,
            status: status | Status::success(details),
        })
    }

    /// Like `finalize_sliced_find_path`, but ends the path at the furthest
    /// polygon of `existing` that the search visited.
    pub fn finalize_sliced_find_path_partial(&mut self, existing: &[PolyRef], max_path: usize) -> Result<PathResult> {
        if existing.is_empty() || max_path == 0 {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        let query = std::mem::take(&mut self.query);
        if query.status.is_failure() {
            return Err(Status::FAILURE);
        }

        if query.start_ref == query.end_ref {
            return Ok(PathResult {
                path: vec![query.start_ref],
                status: Status::SUCCESS,
            });
        }

        let mut details = query.status.detail();
        let visited = existing
            .iter()
            .rev()
            .find_map(|&r| self.node_pool.find_nodes(r).first().copied());
        let node = match visited {
            Some(n) => n,
            None => {
                details |= Status::PARTIAL_RESULT;
                query.last_best_node.ok_or(Status::FAILURE)?
            }
        };

        let (path, status) = self.get_path_to_node(node, max_path);
        Ok(PathResult {
            path,
            status: status | Status::success(details),
        })
    }

    /// String-pulls the polygon corridor `path` into a list of corner points.
    pub fn find_straight_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        max_straight_path: usize,
        options: StraightPathOptions,
    ) -> Result<StraightPath> {
        if !is_valid_pos(start_pos) || !is_valid_pos(end_pos) || path.is_empty() || max_straight_path == 0 {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let closest_start_pos = self
            .closest_point_on_poly_boundary(path[0], start_pos)
            .map_err(|_| Status::failure(Status::INVALID_PARAM))?;
        let mut closest_end_pos = self
            .closest_point_on_poly_boundary(path[path.len() - 1], end_pos)
            .map_err(|_| Status::failure(Status::INVALID_PARAM))?;

        let mut points = Vec::new();
        let max = max_straight_path;
        let finish = |points: Vec<StraightPathPoint>, status: Status| Ok(StraightPath { points, status });

        let stat = append_vertex(&mut points, max, closest_start_pos, StraightPathFlags::START, path[0]);
        if stat != Status::IN_PROGRESS {
            return finish(points, stat);
        }

        let crossings = options.intersects(StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS);

        if path.len() > 1 {
            let mut portal_apex = closest_start_pos;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0;
            let mut left_index = 0;
            let mut right_index = 0;
            let mut left_poly_type = PolyType::Ground;
            let mut right_poly_type = PolyType::Ground;
            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0;
            while i < path.len() {
                let (left, right, to_type) = if i + 1 < path.len() {
                    match self.portal_points_with_type(path[i], path[i + 1]) {
                        Ok(p) => {
                            // Starting right on the first portal: skip it.
                            if i == 0 {
                                let (d, _) = dist_pt_seg_sqr_2d(portal_apex, p.0, p.1);
                                if d < sqr(0.001) {
                                    i += 1;
                                    continue;
                                }
                            }
                            p
                        }
                        Err(_) => {
                            // path[i + 1] is gone; stop at path[i].
                            closest_end_pos = self
                                .closest_point_on_poly_boundary(path[i], end_pos)
                                .map_err(|_| Status::failure(Status::INVALID_PARAM))?;
                            if crossings {
                                self.append_portals(
                                    &mut points,
                                    max,
                                    apex_index,
                                    i,
                                    closest_end_pos,
                                    path,
                                    options,
                                );
                            }
                            append_vertex(&mut points, max, closest_end_pos, StraightPathFlags::empty(), path[i]);
                            let mut status = Status::SUCCESS | Status::PARTIAL_RESULT;
                            if points.len() >= max {
                                status |= Status::BUFFER_TOO_SMALL;
                            }
                            return finish(points, status);
                        }
                    }
                } else {
                    (closest_end_pos, closest_end_pos, PolyType::Ground)
                };
                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                // Right vertex.
                if tri_area_2d(portal_apex, portal_right, right) <= 0.0 {
                    if vequal(portal_apex, portal_right) || tri_area_2d(portal_apex, portal_left, right) > 0.0 {
                        portal_right = right;
                        right_poly_ref = next_ref;
                        right_poly_type = to_type;
                        right_index = i;
                    } else {
                        if crossings {
                            let stat = self.append_portals(
                                &mut points,
                                max,
                                apex_index,
                                left_index,
                                portal_left,
                                path,
                                options,
                            );
                            if stat != Status::IN_PROGRESS {
                                return finish(points, stat);
                            }
                        }

                        portal_apex = portal_left;
                        apex_index = left_index;

                        let flags = if !left_poly_ref.is_valid() {
                            StraightPathFlags::END
                        } else if left_poly_type == PolyType::OffMeshConnection {
                            StraightPathFlags::OFFMESH_CONNECTION
                        } else {
                            StraightPathFlags::empty()
                        };
                        let stat = append_vertex(&mut points, max, portal_apex, flags, left_poly_ref);
                        if stat != Status::IN_PROGRESS {
                            return finish(points, stat);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left vertex.
                if tri_area_2d(portal_apex, portal_left, left) >= 0.0 {
                    if vequal(portal_apex, portal_left) || tri_area_2d(portal_apex, portal_right, left) < 0.0 {
                        portal_left = left;
                        left_poly_ref = next_ref;
                        left_poly_type = to_type;
                        left_index = i;
                    } else {
                        if crossings {
                            let stat = self.append_portals(
                                &mut points,
                                max,
                                apex_index,
                                right_index,
                                portal_right,
                                path,
                                options,
                            );
                            if stat != Status::IN_PROGRESS {
                                return finish(points, stat);
                            }
                        }

                        portal_apex = portal_right;
                        apex_index = right_index;

                        let flags = if !right_poly_ref.is_valid() {
                            StraightPathFlags::END
                        } else if right_poly_type == PolyType::OffMeshConnection {
                            StraightPathFlags::OFFMESH_CONNECTION
                        } else {
                            StraightPathFlags::empty()
                        };
                        let stat = append_vertex(&mut points, max, portal_apex, flags, right_poly_ref);
                        if stat != Status::IN_PROGRESS {
                            return finish(points, stat);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;

                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            if crossings {
                let stat = self.append_portals(
                    &mut points,
                    max,
                    apex_index,
                    path.len() - 1,
                    closest_end_pos,
                    path,
                    options,
                );
                if stat != Status::IN_PROGRESS {
                    return finish(points, stat);
                }
            }
        }

        append_vertex(&mut points, max, closest_end_pos, StraightPathFlags::END, PolyRef::NULL);
        let status = if points.len() >= max {
            Status::SUCCESS | Status::BUFFER_TOO_SMALL
        } else {
            Status::SUCCESS
        };
        finish(points, status)
    }

    fn portal_points_with_type(&self, from: PolyRef, to: PolyRef) -> Result<(Vec3, Vec3, PolyType)> {
        let (from_tile, from_poly) = self.tile_and_poly(from)?;
        let (to_tile, to_poly) = self.tile_and_poly(to)?;
        let (l, r) = portal_points(from, from_poly, from_tile, to, to_poly, to_tile)?;
        Ok((l, r, to_poly.poly_type))
    }

    /// Adds a vertex where the segment from the last vertex to `end_pos`
    /// crosses each portal between `start_idx` and `end_idx`.
    #[allow(clippy::too_many_arguments)]
    fn append_portals(
        &self,
        points: &mut Vec<StraightPathPoint>,
        max: usize,
        start_idx: usize,
        end_idx: usize,
        end_pos: Vec3,
        path: &[PolyRef],
        options: StraightPathOptions,
    ) -> Status {
        let Some(start_pos) = points.last().map(|p| p.pos) else {
            return Status::IN_PROGRESS;
        };

        for i in start_idx..end_idx {
            let Ok((from_tile, from_poly)) = self.tile_and_poly(path[i]) else {
                return Status::failure(Status::INVALID_PARAM);
            };
            let Ok((to_tile, to_poly)) = self.tile_and_poly(path[i + 1]) else {
                return Status::failure(Status::INVALID_PARAM);
            };
            let Ok((left, right)) = portal_points(path[i], from_poly, from_tile, path[i + 1], to_poly, to_tile) else {
                break;
            };

            if options.contains(StraightPathOptions::AREA_CROSSINGS) && from_poly.area == to_poly.area {
                continue;
            }

            if let Some((_, t)) = intersect_seg_seg_2d(start_pos, end_pos, left, right) {
                let pt = left.lerp(right, t);
                let stat = append_vertex(points, max, pt, StraightPathFlags::empty(), path[i + 1]);
                if stat != Status::IN_PROGRESS {
                    return stat;
                }
            }
        }
        Status::IN_PROGRESS
    }

    /// Casts a ray along the surface from `start_pos` towards `end_pos`.
    ///
    /// Walls are polygon edges without a passable neighbour. The ray is
    /// tested in 2D and may pass over or under height changes.
    pub fn raycast(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
        max_path: usize,
    ) -> Result<RaycastHit> {
        if !self.nav.is_valid_poly_ref(start_ref) || !is_valid_pos(start_pos) || !is_valid_pos(end_pos) {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let mut hit = RaycastHit {
            t: 0.0,
            hit_normal: Vec3::ZERO,
            hit_edge_index: None,
            path: Vec::new(),
            status: Status::SUCCESS,
        };

        let mut cur_ref = start_ref;
        while cur_ref.is_valid() {
            let (tile, poly) = self.tile_and_poly(cur_ref)?;
            let (verts, nv) = poly_verts(tile, poly);

            let Some(seg) = intersect_segment_poly_2d(start_pos, end_pos, &verts[..nv]) else {
                // Could not hit the polygon; keep the old t.
                return Ok(hit);
            };
            hit.hit_edge_index = seg.seg_max;

            if seg.tmax > hit.t {
                hit.t = seg.tmax;
            }

            if hit.path.len() < max_path {
                hit.path.push(cur_ref);
            } else {
                hit.status |= Status::BUFFER_TOO_SMALL;
            }

            // Ray ends inside this polygon.
            let Some(seg_max) = seg.seg_max else {
                hit.t = f32::MAX;
                return Ok(hit);
            };

            let mut next_ref = PolyRef::NULL;
            for link in tile.links_of(poly) {
                if link.edge as usize != seg_max {
                    continue;
                }
                let Ok((_, next_poly)) = self.tile_and_poly(link.reference) else {
                    continue;
                };
                if next_poly.poly_type == PolyType::OffMeshConnection || !filter.pass_filter(next_poly) {
                    continue;
                }

                if link.side == 0xff || (link.bmin == 0 && link.bmax == 255) {
                    next_ref = link.reference;
                    break;
                }

                // Partial portal on a tile border: the hit must fall inside it.
                let left = verts[link.edge as usize];
                let right = verts[(link.edge as usize + 1) % nv];
                let s = 1.0 / 255.0;
                let (a, b, v) = match link.side {
                    0 | 4 => (left.z, right.z, start_pos.z + (end_pos.z - start_pos.z) * seg.tmax),
                    2 | 6 => (left.x, right.x, start_pos.x + (end_pos.x - start_pos.x) * seg.tmax),
                    _ => continue,
                };
                let mut lmin = a + (b - a) * (link.bmin as f32 * s);
                let mut lmax = a + (b - a) * (link.bmax as f32 * s);
                if lmin > lmax {
                    std::mem::swap(&mut lmin, &mut lmax);
                }
                if v >= lmin && v <= lmax {
                    next_ref = link.reference;
                    break;
                }
            }

            if !next_ref.is_valid() {
                // Wall hit.
                let va = verts[seg_max];
                let vb = verts[(seg_max + 1) % nv];
                let dx = vb.x - va.x;
                let dz = vb.z - va.z;
                hit.hit_normal = Vec3::new(dz, 0.0, -dx).normalize_or_zero();
                return Ok(hit);
            }

            cur_ref = next_ref;
        }

        Ok(hit)
    }

    /// Moves from `start_pos` towards `end_pos` constrained to the mesh
    /// surface. Returns the reached position and the visited polygons.
    ///
    /// The search is local: it only visits polygons touching the circle
    /// around the movement segment and gives up after a small number of them.
    pub fn move_along_surface(
        &mut self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<(Vec3, Vec<PolyRef>)> {
        const MAX_STACK: usize = 48;

        if !self.nav.is_valid_poly_ref(start_ref) || !is_valid_pos(start_pos) || !is_valid_pos(end_pos) {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        self.tiny_node_pool.clear();
        let start_node = self
            .tiny_node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        {
            let n = self.tiny_node_pool.node_mut(start_node);
            n.parent = None;
            n.cost = 0.0;
            n.total = 0.0;
            n.flags = NodeFlags::CLOSED;
        }

        let mut stack = VecDeque::with_capacity(MAX_STACK);
        stack.push_back(start_node);

        let mut best_pos = start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = None;

        let search_pos = start_pos.lerp(end_pos, 0.5);
        let search_rad_sqr = sqr(start_pos.distance(end_pos) / 2.0 + 0.001);

        while let Some(cur) = stack.pop_front() {
            let cur_ref = self.tiny_node_pool.node(cur).id;
            let (tile, poly) = self.tile_and_poly(cur_ref)?;
            let (verts, nv) = poly_verts(tile, poly);

            if point_in_polygon(end_pos, &verts[..nv]) {
                best_node = Some(cur);
                best_pos = end_pos;
                break;
            }

            let mut j = nv - 1;
            for i in 0..nv {
                let mut neis = Vec::with_capacity(8);
                if poly.neis[j] & DT_EXT_LINK != 0 {
                    for link in tile.links_of(poly) {
                        if link.edge as usize == j && link.reference.is_valid() {
                            if let Ok((_, nei_poly)) = self.tile_and_poly(link.reference) {
                                if filter.pass_filter(nei_poly) && neis.len() < 8 {
                                    neis.push(link.reference);
                                }
                            }
                        }
                    }
                } else if poly.neis[j] != 0 {
                    let idx = (poly.neis[j] - 1) as usize;
                    if filter.pass_filter(&tile.polys[idx]) {
                        neis.push(cur_ref.with_poly(idx as u32));
                    }
                }

                let vj = verts[j];
                let vi = verts[i];
                if neis.is_empty() {
                    // Wall edge.
                    let (dist_sqr, tseg) = dist_pt_seg_sqr_2d(end_pos, vj, vi);
                    if dist_sqr < best_dist {
                        best_pos = vj.lerp(vi, tseg);
                        best_dist = dist_sqr;
                        best_node = Some(cur);
                    }
                } else {
                    for nei in neis {
                        let Some(nn) = self.tiny_node_pool.get_node(nei, 0) else {
                            continue;
                        };
                        if self.tiny_node_pool.node(nn).flags.contains(NodeFlags::CLOSED) {
                            continue;
                        }
                        let (dist_sqr, _) = dist_pt_seg_sqr_2d(search_pos, vj, vi);
                        if dist_sqr > search_rad_sqr {
                            continue;
                        }
                        if stack.len() < MAX_STACK {
                            let n = self.tiny_node_pool.node_mut(nn);
                            n.parent = Some(cur);
                            n.flags.insert(NodeFlags::CLOSED);
                            stack.push_back(nn);
                        }
                    }
                }
                j = i;
            }
        }

        let mut visited = Vec::new();
        let mut cur = best_node;
        while let Some(n) = cur {
            let node = self.tiny_node_pool.node(n);
            visited.push(node.id);
            cur = node.parent;
        }
        visited.reverse();

        Ok((best_pos, visited))
    }

    /// Random point on the mesh. A tile is picked uniformly, then a polygon
    /// weighted by area, then a point uniformly inside the polygon.
    pub fn find_random_point<R: Rng + ?Sized>(&self, filter: &QueryFilter, rng: &mut R) -> Result<(PolyRef, Vec3)> {
        let mut chosen_tile = None;
        let mut tsum = 0.0;
        for (i, _) in self.nav.tiles() {
            tsum += 1.0;
            if rng.gen::<f32>() * tsum <= 1.0 {
                chosen_tile = Some(i);
            }
        }
        let ti = chosen_tile.ok_or(Status::FAILURE)?;
        let tile = self.nav.tile(ti).ok_or(Status::FAILURE)?;
        let base = self.nav.get_poly_ref_base(ti);

        let mut chosen = None;
        let mut area_sum = 0.0;
        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.poly_type != PolyType::Ground || !filter.pass_filter(poly) {
                continue;
            }
            let area = poly_area(tile, poly);
            area_sum += area;
            if rng.gen::<f32>() * area_sum <= area {
                chosen = Some((base.with_poly(i as u32), poly));
            }
        }
        let (poly_ref, poly) = chosen.ok_or(Status::FAILURE)?;

        let (verts, nv) = poly_verts(tile, poly);
        let s = rng.gen::<f32>();
        let t = rng.gen::<f32>();
        let mut pt = random_point_in_convex_poly(&verts[..nv], s, t);
        pt.y = self.get_poly_height(poly_ref, pt)?;
        Ok((poly_ref, pt))
    }

    /// Random point on polygons reachable from `start_ref` that touch the
    /// circle at `center`. The point itself may lie outside the circle.
    pub fn find_random_point_around_circle<R: Rng + ?Sized>(
        &mut self,
        start_ref: PolyRef,
        center: Vec3,
        max_radius: f32,
        filter: &QueryFilter,
        rng: &mut R,
    ) -> Result<(PolyRef, Vec3)> {
        let (_, start_poly) = self.tile_and_poly(start_ref)?;
        if !is_valid_pos(center) || !max_radius.is_finite() || max_radius < 0.0 || !filter.pass_filter(start_poly) {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        self.node_pool.clear();
        self.open_list.clear();

        let start_node = self
            .node_pool
            .get_node(start_ref, 0)
            .ok_or(Status::failure(Status::OUT_OF_NODES))?;
        {
            let n = self.node_pool.node_mut(start_node);
            n.pos = center;
            n.parent = None;
            n.cost = 0.0;
            n.total = 0.0;
            n.flags = NodeFlags::OPEN;
        }
        self.open_list.push(&self.node_pool, start_node);

        let radius_sqr = sqr(max_radius);
        let mut area_sum = 0.0;
        let mut chosen: Option<(PolyRef, &'a MeshTile, &'a Poly)> = None;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            let best_node = {
                let n = self.node_pool.node_mut(best);
                n.flags.remove(NodeFlags::OPEN);
                n.flags.insert(NodeFlags::CLOSED);
                n.clone()
            };
            let best_ref = best_node.id;
            let Ok((best_tile, best_poly)) = self.tile_and_poly(best_ref) else {
                continue;
            };

            if best_poly.poly_type == PolyType::Ground {
                let area = poly_area(best_tile, best_poly);
                area_sum += area;
                if rng.gen::<f32>() * area_sum <= area {
                    chosen = Some((best_ref, best_tile, best_poly));
                }
            }

            let parent_ref = best_node.parent.map(|p| self.node_pool.node(p).id);

            for link in best_tile.links_of(best_poly) {
                let neighbour_ref = link.reference;
                if !neighbour_ref.is_valid() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok((nei_tile, nei_poly)) = self.tile_and_poly(neighbour_ref) else {
                    continue;
                };
                if !filter.pass_filter(nei_poly) {
                    continue;
                }

                let Ok((va, vb)) = portal_points(best_ref, best_poly, best_tile, neighbour_ref, nei_poly, nei_tile)
                else {
                    continue;
                };

                // Skip polygons the circle does not reach.
                let (dist_sqr, _) = dist_pt_seg_sqr_2d(center, va, vb);
                if dist_sqr > radius_sqr {
                    continue;
                }

                let Some(neighbour) = self.node_pool.get_node(neighbour_ref, 0) else {
                    continue;
                };
                let flags = self.node_pool.node(neighbour).flags;
                if flags.contains(NodeFlags::CLOSED) {
                    continue;
                }
                if flags.is_empty() {
                    self.node_pool.node_mut(neighbour).pos = va.lerp(vb, 0.5);
                }

                let total = best_node.total + best_node.pos.distance(self.node_pool.node(neighbour).pos);
                if flags.contains(NodeFlags::OPEN) && total >= self.node_pool.node(neighbour).total {
                    continue;
                }

                {
                    let n = self.node_pool.node_mut(neighbour);
                    n.flags.remove(NodeFlags::CLOSED);
                    n.parent = Some(best);
                    n.total = total;
                }

                if flags.contains(NodeFlags::OPEN) {
                    self.open_list.modify(&self.node_pool, neighbour);
                } else {
                    self.node_pool.node_mut(neighbour).flags = NodeFlags::OPEN;
                    self.open_list.push(&self.node_pool, neighbour);
                }
            }
        }

        let (poly_ref, tile, poly) = chosen.ok_or(Status::FAILURE)?;
        let (verts, nv) = poly_verts(tile, poly);
        let s = rng.gen::<f32>();
        let t = rng.gen::<f32>();
        let mut pt = random_point_in_convex_poly(&verts[..nv], s, t);
        pt.y = self.get_poly_height(poly_ref, pt)?;
        Ok((poly_ref, pt))
    }
}

/// Portal between two linked polygons as `(left, right)`. Off-mesh
/// connections collapse the portal to their end point.
fn portal_points(
    from: PolyRef,
    from_poly: &Poly,
    from_tile: &MeshTile,
    to: PolyRef,
    to_poly: &Poly,
    to_tile: &MeshTile,
) -> Result<(Vec3, Vec3)> {
    let link = from_tile
        .links_of(from_poly)
        .find(|l| l.reference == to)
        .ok_or(Status::failure(Status::INVALID_PARAM))?;

    if from_poly.poly_type == PolyType::OffMeshConnection {
        let v = from_tile.verts[from_poly.verts[link.edge as usize] as usize];
        return Ok((v, v));
    }

    if to_poly.poly_type == PolyType::OffMeshConnection {
        let back = to_tile
            .links_of(to_poly)
            .find(|l| l.reference == from)
            .ok_or(Status::failure(Status::INVALID_PARAM))?;
        let v = to_tile.verts[to_poly.verts[back.edge as usize] as usize];
        return Ok((v, v));
    }

    let nv = from_poly.vert_count as usize;
    let v0 = from_tile.verts[from_poly.verts[link.edge as usize] as usize];
    let v1 = from_tile.verts[from_poly.verts[(link.edge as usize + 1) % nv] as usize];

    // Border links may only cover part of the edge.
    if link.side != 0xff && (link.bmin != 0 || link.bmax != 255) {
        let s = 1.0 / 255.0;
        return Ok((v0.lerp(v1, link.bmin as f32 * s), v0.lerp(v1, link.bmax as f32 * s)));
    }
    Ok((v0, v1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{grid_navmesh, two_tile_navmesh};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn poly_at(query: &NavMeshQuery, p: Vec3) -> PolyRef {
        query
            .find_nearest_poly(p, Vec3::new(0.1, 1.0, 0.1), &QueryFilter::default())
            .unwrap()
            .unwrap()
            .reference
    }

    #[test]
    fn test_invalid_max_nodes() {
        let mesh = grid_navmesh();
        assert!(NavMeshQuery::new(&mesh, 0).is_err());
        assert!(NavMeshQuery::new(&mesh, 70_000).is_err());
    }

    #[test]
    fn test_find_nearest_poly() {
        let mesh = grid_navmesh();
        let query = NavMeshQuery::new(&mesh, 128).unwrap();
        let filter = QueryFilter::default();

        let nearest = query
            .find_nearest_poly(Vec3::new(2.5, 0.4, 0.5), Vec3::new(0.5, 1.0, 0.5), &filter)
            .unwrap()
            .unwrap();
        assert_eq!(nearest.reference.poly_index(), 2);
        assert!(nearest.over_poly);

        let none = query
            .find_nearest_poly(Vec3::new(20.0, 0.0, 20.0), Vec3::splat(1.0), &filter)
            .unwrap();
        assert!(none.is_none());
        assert!(query.find_nearest_poly(Vec3::NAN, Vec3::ONE, &filter).is_err());
    }

    #[test]
    fn test_query_polygons_buffer_too_small() {
        let mesh = grid_navmesh();
        let query = NavMeshQuery::new(&mesh, 128).unwrap();
        let (polys, status) = query
            .query_polygons(Vec3::new(1.5, 0.0, 1.5), Vec3::new(3.0, 1.0, 3.0), &QueryFilter::default(), 4)
            .unwrap();
        assert_eq!(polys.len(), 4);
        assert!(status.has_detail(Status::BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_raycast_reaches_end() {
        let mesh = grid_navmesh();
        let query = NavMeshQuery::new(&mesh, 128).unwrap();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let start_ref = poly_at(&query, start);
        let hit = query
            .raycast(start_ref, start, Vec3::new(2.5, 0.0, 0.5), &QueryFilter::default(), 16)
            .unwrap();
        assert!(hit.reached_end());
        let polys: Vec<u32> = hit.path.iter().map(|r| r.poly_index()).collect();
        assert_eq!(polys, vec![0, 1, 2]);
    }

    #[test]
    fn test_raycast_hits_wall() {
        let mesh = grid_navmesh();
        let query = NavMeshQuery::new(&mesh, 128).unwrap();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let start_ref = poly_at(&query, start);
        let hit = query
            .raycast(start_ref, start, Vec3::new(4.0, 0.0, 0.5), &QueryFilter::default(), 16)
            .unwrap();
        assert!(!hit.reached_end());
        assert!((hit.t - 2.5 / 3.5).abs() < 1e-4);
        assert!((hit.hit_normal - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(hit.path.len(), 3);
    }

    #[test]
    fn test_raycast_crosses_tiles() {
        let mesh = two_tile_navmesh();
        let query = NavMeshQuery::new(&mesh, 128).unwrap();
        let start = Vec3::new(0.5, 0.0, 1.5);
        let start_ref = poly_at(&query, start);
        let hit = query
            .raycast(start_ref, start, Vec3::new(5.5, 0.0, 1.5), &QueryFilter::default(), 16)
            .unwrap();
        assert!(hit.reached_end());
        assert_eq!(hit.path.len(), 6);
    }

    #[test]
    fn test_move_along_surface_slides_to_wall() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 128).unwrap();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let start_ref = poly_at(&query, start);

        let (pos, visited) = query
            .move_along_surface(start_ref, start, Vec3::new(5.0, 0.0, 0.5), &QueryFilter::default())
            .unwrap();
        assert!((pos - Vec3::new(3.0, 0.0, 0.5)).length() < 1e-4);
        assert_eq!(visited.first(), Some(&start_ref));
        assert_eq!(visited.last().map(|r| r.poly_index()), Some(2));

        let (pos, visited) = query
            .move_along_surface(start_ref, start, Vec3::new(1.5, 0.0, 0.5), &QueryFilter::default())
            .unwrap();
        assert_eq!(pos, Vec3::new(1.5, 0.0, 0.5));
        assert_eq!(visited.len(), 2);
    }

    #[test]
    fn test_random_points_stay_on_mesh() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 128).unwrap();
        let filter = QueryFilter::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..32 {
            let (r, p) = query.find_random_point(&filter, &mut rng).unwrap();
            assert!(mesh.is_valid_poly_ref(r));
            assert!((0.0..=3.0).contains(&p.x) && (0.0..=3.0).contains(&p.z));
            let (_, over) = mesh.closest_point_on_poly(r, p).unwrap();
            assert!(over);
        }

        let center = Vec3::new(1.5, 0.0, 1.5);
        let start_ref = poly_at(&query, center);
        for _ in 0..16 {
            let (r, p) = query
                .find_random_point_around_circle(start_ref, center, 0.4, &filter, &mut rng)
                .unwrap();
            assert_eq!(r, start_ref);
            assert!((1.0..=2.0).contains(&p.x) && (1.0..=2.0).contains(&p.z));
        }
    }

    #[test]
    fn test_poly_height_and_boundary() {
        let mesh = grid_navmesh();
        let query = NavMeshQuery::new(&mesh, 128).unwrap();
        let r = poly_at(&query, Vec3::new(0.5, 0.0, 0.5));
        assert_eq!(query.get_poly_height(r, Vec3::new(0.5, 5.0, 0.5)).unwrap(), 0.0);
        assert!(query.get_poly_height(r, Vec3::new(2.5, 0.0, 2.5)).is_err());

        let p = query.closest_point_on_poly_boundary(r, Vec3::new(-2.0, 0.0, 0.5)).unwrap();
        assert!((p - Vec3::new(0.0, 0.0, 0.5)).length() < 1e-5);
        let inside = Vec3::new(0.25, 0.0, 0.75);
        assert_eq!(query.closest_point_on_poly_boundary(r, inside).unwrap(), inside);
    }

    #[test]
    fn test_portal_points() {
        let mesh = two_tile_navmesh();
        let query = NavMeshQuery::new(&mesh, 128).unwrap();
        let a = poly_at(&query, Vec3::new(2.5, 0.0, 1.5));
        let b = poly_at(&query, Vec3::new(3.5, 0.0, 1.5));
        let mid = query.get_edge_mid_point(a, b).unwrap();
        assert!((mid - Vec3::new(3.0, 0.0, 1.5)).length() < 1e-5);
        assert!(query.get_portal_points(a, poly_at(&query, Vec3::new(0.5, 0.0, 0.5))).is_err());
    }
}
