//! Path search scenarios on hand-built grid meshes
//!
//! The grid tiles are 3x3 unit squares, so polygon `z * 3 + x` covers
//! `[x, x + 1] x [z, z + 1]` in the first tile.

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use crate::test_mesh_helpers::{grid_navmesh, grid_poly_mesh, two_tile_navmesh, GRID_PARAMS};
    use crate::{
        create_nav_mesh_data, NavMesh, NavMeshCreateParams, NavMeshQuery, NodePool, NodeQueue,
        OffMeshConnectionDef, PolyFlags, PolyRef, PolyType, QueryFilter, Status, StraightPathFlags,
        StraightPathOptions,
    };

    fn nearest(query: &NavMeshQuery, p: Vec3) -> PolyRef {
        query
            .find_nearest_poly(p, Vec3::new(0.2, 1.0, 0.2), &QueryFilter::default())
            .unwrap()
            .unwrap()
            .reference
    }

    /// Length of the polyline through the portal midpoints of `path`
    fn corridor_length(query: &NavMeshQuery, start: Vec3, end: Vec3, path: &[PolyRef]) -> f32 {
        let mut pts = vec![start];
        for w in path.windows(2) {
            pts.push(query.get_edge_mid_point(w[0], w[1]).unwrap());
        }
        pts.push(end);
        pts.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    fn is_connected(mesh: &NavMesh, path: &[PolyRef]) -> bool {
        path.windows(2).all(|w| {
            let (tile, poly) = mesh.get_tile_and_poly_by_ref(w[0]).unwrap();
            tile.links_of(poly).any(|l| l.reference == w[1])
        })
    }

    #[test]
    fn test_corner_to_corner_path() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let end = Vec3::new(2.5, 0.0, 2.5);
        let (s, e) = (nearest(&query, start), nearest(&query, end));

        let result = query.find_path(s, e, start, end, &QueryFilter::default(), 64).unwrap();
        assert_eq!(result.status, Status::SUCCESS);
        assert_eq!(result.path.len(), 5);
        assert_eq!(result.path[0], s);
        assert_eq!(result.path[4], e);
        assert!(is_connected(&mesh, &result.path));
        assert!(corridor_length(&query, start, end, &result.path) <= 3.71);

        let straight = query
            .find_straight_path(start, end, &result.path, 16, StraightPathOptions::empty())
            .unwrap();
        assert_eq!(straight.points.len(), 2);
        assert!(straight.points[0].flags.contains(StraightPathFlags::START));
        assert!(straight.points[1].flags.contains(StraightPathFlags::END));
        let length = straight.points[0].pos.distance(straight.points[1].pos);
        assert!((length - 8f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn test_same_polygon_path() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let start = Vec3::new(1.2, 0.0, 1.2);
        let end = Vec3::new(1.8, 0.0, 1.7);
        let s = nearest(&query, start);
        let result = query.find_path(s, s, start, end, &QueryFilter::default(), 8).unwrap();
        assert_eq!(result.path, vec![s]);
        assert!(query.find_path(s, PolyRef::NULL, start, end, &QueryFilter::default(), 8).is_err());
    }

    #[test]
    fn test_unreachable_goal_gives_partial_path() {
        let mut mesh = grid_navmesh();
        let goal = mesh.get_poly_ref_base(0).with_poly(8);
        mesh.set_poly_flags(goal, PolyFlags::WALK | PolyFlags::DISABLED).unwrap();

        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let filter = QueryFilter::new(PolyFlags::WALK, PolyFlags::DISABLED);
        let start = Vec3::new(0.5, 0.0, 0.5);
        let s = nearest(&query, start);
        let result = query
            .find_path(s, goal, start, Vec3::new(2.5, 0.0, 2.5), &filter, 64)
            .unwrap();

        assert!(result.status.is_success());
        assert!(result.status.has_detail(Status::PARTIAL_RESULT));
        let last = result.path.last().unwrap().poly_index();
        assert!(last == 5 || last == 7, "ended at {last}");
        assert!(!result.path.contains(&goal));
    }

    #[test]
    fn test_small_node_pool_runs_out_of_nodes() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 2).unwrap();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let end = Vec3::new(2.5, 0.0, 2.5);
        let (s, e) = (nearest(&query, start), nearest(&query, end));

        let result = query.find_path(s, e, start, end, &QueryFilter::default(), 64).unwrap();
        assert!(result.status.has_detail(Status::OUT_OF_NODES));
        assert!(result.status.has_detail(Status::PARTIAL_RESULT));
        assert_eq!(result.path[0], s);
    }

    #[test]
    fn test_short_path_buffer_keeps_start() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let end = Vec3::new(2.5, 0.0, 2.5);
        let (s, e) = (nearest(&query, start), nearest(&query, end));

        let result = query.find_path(s, e, start, end, &QueryFilter::default(), 3).unwrap();
        assert_eq!(result.path.len(), 3);
        assert_eq!(result.path[0], s);
        assert!(result.status.has_detail(Status::BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_sliced_search_matches_full_search() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let filter = QueryFilter::default();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let end = Vec3::new(2.5, 0.0, 2.5);
        let (s, e) = (nearest(&query, start), nearest(&query, end));
        let full = query.find_path(s, e, start, end, &filter, 64).unwrap();

        assert!(query.init_sliced_find_path(s, e, start, end, &filter).is_in_progress());
        let mut total_iters = 0;
        loop {
            let (status, iters) = query.update_sliced_find_path(1);
            total_iters += iters;
            if !status.is_in_progress() {
                assert!(status.is_success());
                break;
            }
            assert!(total_iters < 100);
        }
        assert!(query.is_in_closed_list(e));

        let sliced = query.finalize_sliced_find_path(64).unwrap();
        assert_eq!(sliced.path.len(), full.path.len());
        assert_eq!(sliced.path.first(), Some(&s));
        assert_eq!(sliced.path.last(), Some(&e));
        assert!(!sliced.status.has_detail(Status::PARTIAL_RESULT));

        // Finalizing resets the search.
        assert!(query.finalize_sliced_find_path(64).is_err());
    }

    #[test]
    fn test_sliced_search_fails_when_tile_removed() {
        let mut mesh = two_tile_navmesh();
        let right = mesh.get_tile_ref_at(1, 0, 0).unwrap();
        let start = Vec3::new(0.5, 0.0, 1.5);
        let end = Vec3::new(5.5, 0.0, 1.5);
        let (s, e) = {
            let query = NavMeshQuery::new(&mesh, 64).unwrap();
            (nearest(&query, start), nearest(&query, end))
        };
        mesh.remove_tile(right).unwrap();

        let mut query = NavMeshQuery::new(&mesh, 64).unwrap();
        let status = query.init_sliced_find_path(s, e, start, end, &QueryFilter::default());
        assert!(status.is_failure());
        assert!(status.has_detail(Status::INVALID_PARAM));
    }

    #[test]
    fn test_partial_finalize_uses_existing_corridor() {
        let mesh = grid_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let filter = QueryFilter::default();
        let start = Vec3::new(0.5, 0.0, 0.5);
        let end = Vec3::new(2.5, 0.0, 2.5);
        let (s, e) = (nearest(&query, start), nearest(&query, end));
        let existing = query.find_path(s, e, start, end, &filter, 64).unwrap().path;

        query.init_sliced_find_path(s, e, start, end, &filter);
        query.update_sliced_find_path(2);
        let partial = query.finalize_sliced_find_path_partial(&existing, 64).unwrap();
        assert!(partial.status.is_success());
        assert_eq!(partial.path[0], s);
        let last = *partial.path.last().unwrap();
        assert!(existing.contains(&last) || partial.status.has_detail(Status::PARTIAL_RESULT));
    }

    #[test]
    fn test_path_across_tiles() {
        let mesh = two_tile_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let start = Vec3::new(0.5, 0.0, 1.5);
        let end = Vec3::new(5.5, 0.0, 1.5);
        let (s, e) = (nearest(&query, start), nearest(&query, end));
        assert_ne!(s.tile_index(), e.tile_index());

        let result = query.find_path(s, e, start, end, &QueryFilter::default(), 64).unwrap();
        assert_eq!(result.status, Status::SUCCESS);
        assert_eq!(result.path.len(), 6);
        assert!(is_connected(&mesh, &result.path));

        let straight = query
            .find_straight_path(start, end, &result.path, 16, StraightPathOptions::ALL_CROSSINGS)
            .unwrap();
        // One vertex per crossed portal between start and end.
        assert_eq!(straight.points.len(), 7);
        for (i, p) in straight.points[1..6].iter().enumerate() {
            assert!((p.pos.x - (i + 1) as f32).abs() < 1e-4);
            assert_eq!(p.reference, result.path[i + 1]);
        }

        let area_only = query
            .find_straight_path(start, end, &result.path, 16, StraightPathOptions::AREA_CROSSINGS)
            .unwrap();
        assert_eq!(area_only.points.len(), 2);
    }

    #[test]
    fn test_straight_path_buffer_too_small() {
        let mesh = two_tile_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let start = Vec3::new(0.5, 0.0, 1.5);
        let end = Vec3::new(5.5, 0.0, 1.5);
        let (s, e) = (nearest(&query, start), nearest(&query, end));
        let path = query.find_path(s, e, start, end, &QueryFilter::default(), 64).unwrap().path;

        let straight = query
            .find_straight_path(start, end, &path, 3, StraightPathOptions::ALL_CROSSINGS)
            .unwrap();
        assert_eq!(straight.points.len(), 3);
        assert!(straight.status.has_detail(Status::BUFFER_TOO_SMALL));
    }

    #[test]
    fn test_funnel_never_longer_than_corridor() {
        let mesh = two_tile_navmesh();
        let mut query = NavMeshQuery::new(&mesh, 512).unwrap();
        let filter = QueryFilter::default();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..24 {
            let (s, start) = query.find_random_point(&filter, &mut rng).unwrap();
            let (e, end) = query.find_random_point(&filter, &mut rng).unwrap();
            let result = query.find_path(s, e, start, end, &filter, 64).unwrap();
            assert!(result.status.is_success());

            let straight = query
                .find_straight_path(start, end, &result.path, 64, StraightPathOptions::empty())
                .unwrap();
            // The end points are the only vertices a corridor does not pay for.
            assert!(straight.points.len() <= result.path.len() + 1);

            let funnel: f32 = straight.points.windows(2).map(|w| w[0].pos.distance(w[1].pos)).sum();
            assert!(funnel <= corridor_length(&query, start, end, &result.path) + 1e-4);
        }
    }

    #[test]
    fn test_path_through_off_mesh_connection() {
        let pmesh = grid_poly_mesh(3, 0);
        let cons = [OffMeshConnectionDef {
            start: Vec3::new(0.5, 0.0, 0.5),
            end: Vec3::new(2.5, 0.0, 2.5),
            radius: 0.3,
            bidirectional: true,
            area: 1,
            flags: PolyFlags::JUMP,
            user_id: 11,
        }];
        let params = NavMeshCreateParams {
            off_mesh_cons: &cons,
            walkable_climb: 0.5,
            ..NavMeshCreateParams::new(&pmesh, None)
        };
        let mut mesh = NavMesh::new(GRID_PARAMS).unwrap();
        mesh.add_tile(create_nav_mesh_data(&params).unwrap(), None).unwrap();

        // Ground is twice as expensive as the jump.
        let mut filter = QueryFilter::default();
        filter.set_area_cost(recast::RC_WALKABLE_AREA, 2.0);

        let mut query = NavMeshQuery::new(&mesh, 256).unwrap();
        let start = Vec3::new(0.2, 0.0, 0.6);
        let end = Vec3::new(2.7, 0.0, 2.8);
        let (s, e) = (nearest(&query, start), nearest(&query, end));
        let result = query.find_path(s, e, start, end, &filter, 64).unwrap();
        assert_eq!(result.path.len(), 3);

        let link = result.path[1];
        let (_, poly) = mesh.get_tile_and_poly_by_ref(link).unwrap();
        assert_eq!(poly.poly_type, PolyType::OffMeshConnection);
        assert_eq!(mesh.get_off_mesh_connection_by_ref(link).unwrap().user_id, 11);

        let straight = query
            .find_straight_path(start, end, &result.path, 16, StraightPathOptions::empty())
            .unwrap();
        assert_eq!(straight.points.len(), 4);
        let jump = straight.points[1];
        assert!(jump.flags.contains(StraightPathFlags::OFFMESH_CONNECTION));
        assert_eq!(jump.reference, link);
        assert!((jump.pos - Vec3::new(0.5, 0.0, 0.5)).length() < 1e-4);
        assert!((straight.points[2].pos - Vec3::new(2.5, 0.0, 2.5)).length() < 1e-4);

        let (a, b) = mesh.get_off_mesh_connection_poly_end_points(s, link).unwrap();
        assert!((a - jump.pos).length() < 1e-4);
        assert!((b - straight.points[2].pos).length() < 1e-4);

        // Excluding jumps forces the ground route.
        filter.set_exclude_flags(PolyFlags::JUMP);
        let ground = query.find_path(s, e, start, end, &filter, 64).unwrap();
        assert_eq!(ground.path.len(), 5);
        assert!(is_connected(&mesh, &ground.path));
    }

    #[test]
    fn test_node_queue_keeps_heap_order() {
        let mut rng = StdRng::seed_from_u64(1234);
        let mut pool = NodePool::new(512);
        let mut queue = NodeQueue::new(512);

        for i in 0..300u32 {
            let n = pool.get_node(PolyRef::encode(1, 0, i + 1), 0).unwrap();
            pool.node_mut(n).total = rng.gen_range(0.0..100.0);
            assert!(queue.push(&pool, n));
        }
        // Lower a few totals in place.
        for i in (0..300u32).step_by(7) {
            let n = pool.find_node(PolyRef::encode(1, 0, i + 1), 0).unwrap();
            let total = pool.node(n).total * 0.5;
            pool.node_mut(n).total = total;
            queue.modify(&pool, n);
        }

        let mut last = f32::MIN;
        let mut popped = 0;
        while let Some(n) = queue.pop(&pool) {
            let total = pool.node(n).total;
            assert!(total >= last);
            last = total;
            popped += 1;
        }
        assert_eq!(popped, 300);
    }
}
