//! Obstacles carved through the cache into a live tiled mesh

#[cfg(test)]
mod tests {
    use detour::{NavMesh, NavMeshParams, NavMeshQuery, QueryFilter, StraightPathOptions, TileData};
    use glam::Vec3;
    use recast::RecastConfig;

    use crate::{ObstacleState, TileCache, TileCacheParams, TileRebuild};

    const TILE: f32 = 8.0;
    const TILE_VOXELS: i32 = 32;
    const BORDER: i32 = 5;

    fn agent_config() -> RecastConfig {
        RecastConfig {
            cs: 0.25,
            ch: 0.2,
            tile_size: TILE_VOXELS,
            border_size: BORDER,
            ..RecastConfig::default()
        }
    }

    fn tile_config(tx: i32, ty: i32) -> RecastConfig {
        let mut cfg = agent_config();
        let pad = BORDER as f32 * cfg.cs;
        cfg.bmin = Vec3::new(tx as f32 * TILE - pad, -1.0, ty as f32 * TILE - pad);
        cfg.bmax = Vec3::new((tx + 1) as f32 * TILE + pad, 2.0, (ty + 1) as f32 * TILE + pad);
        cfg.width = TILE_VOXELS + BORDER * 2;
        cfg.height = TILE_VOXELS + BORDER * 2;
        cfg
    }

    /// `n` x `n` tiles of flat floor, all tiles built into the mesh
    fn floor(n: i32, max_polys_per_tile: u32) -> (TileCache, NavMesh) {
        let side = n as f32 * TILE;
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, side),
            Vec3::new(side, 0.0, side),
            Vec3::new(side, 0.0, 0.0),
        ];
        let tris = vec![[0, 1, 2], [0, 2, 3]];
        let max_tiles = ((n * n) as u32).next_power_of_two().max(8);

        let mut cache = TileCache::new(
            TileCacheParams {
                origin: Vec3::ZERO,
                tile_width: TILE,
                tile_height: TILE,
                max_tiles,
                max_obstacles: 32,
            },
            agent_config(),
        )
        .unwrap();
        let mut nav = NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: TILE,
            tile_height: TILE,
            max_tiles,
            max_polys_per_tile,
        })
        .unwrap();

        for ty in 0..n {
            for tx in 0..n {
                let layer = cache
                    .builder()
                    .build_layer(&tile_config(tx, ty), tx, ty, 0, &verts, &tris)
                    .unwrap()
                    .unwrap();
                cache.add_tile(layer.compress()).unwrap();
                let built = cache.build_nav_mesh_tiles_at(tx, ty, &mut nav).unwrap();
                assert_eq!(built.len(), 1);
                assert!(built[0].polys_after > 0);
            }
        }
        (cache, nav)
    }

    fn setup() -> (TileCache, NavMesh) {
        floor(2, 256)
    }

    fn snapshot(cache: &TileCache, nav: &NavMesh) -> Vec<(Vec<u8>, TileData, usize)> {
        let mut out = Vec::new();
        for ty in 0..2 {
            for tx in 0..2 {
                let r = cache.get_tile_at(tx, ty, 0).unwrap();
                let layer = cache.get_tile_by_ref(r).unwrap().data.clone();
                let tile = nav.get_tile_at(tx, ty, 0).unwrap();
                out.push((layer, tile.to_data().unwrap(), tile.link_count()));
            }
        }
        out
    }

    fn settle(cache: &mut TileCache, nav: &mut NavMesh) -> Vec<TileRebuild> {
        let mut rebuilt = Vec::new();
        for _ in 0..256 {
            if cache.update_with(nav, |r| rebuilt.push(*r)).unwrap() {
                return rebuilt;
            }
        }
        panic!("tile cache did not settle");
    }

    fn straight_len(nav: &NavMesh, a: Vec3, b: Vec3) -> f32 {
        let filter = QueryFilter::default();
        let ext = Vec3::new(0.5, 2.0, 0.5);
        let mut query = NavMeshQuery::new(nav, 2048).unwrap();
        let start = query.find_nearest_poly(a, ext, &filter).unwrap().unwrap();
        let end = query.find_nearest_poly(b, ext, &filter).unwrap().unwrap();
        let path = query
            .find_path(start.reference, end.reference, start.point, end.point, &filter, 256)
            .unwrap();
        assert!(path.status.is_success());
        let straight = query
            .find_straight_path(start.point, end.point, &path.path, 64, StraightPathOptions::empty())
            .unwrap();
        straight
            .points
            .windows(2)
            .map(|w| w[0].pos.distance(w[1].pos))
            .sum()
    }

    #[test]
    fn test_add_then_remove_restores_tiles() {
        let (mut cache, mut nav) = setup();
        let before = snapshot(&cache, &nav);
        // Slightly askew so the line does not run along the tile seam.
        let (a, b) = (Vec3::new(1.0, 0.0, 7.6), Vec3::new(15.0, 0.0, 8.4));
        let open = straight_len(&nav, a, b);
        assert!((open - a.distance(b)).abs() < 0.5);

        let ob = cache.add_obstacle(Vec3::new(8.0, -0.5, 8.0), 1.5, 3.0).unwrap();
        assert_eq!(cache.get_obstacle_by_ref(ob).unwrap().touched.len(), 4);
        let rebuilt = settle(&mut cache, &mut nav);
        assert_eq!(rebuilt.len(), 4);

        let carved = snapshot(&cache, &nav);
        for (old, new) in before.iter().zip(&carved) {
            // Layers are never rewritten by obstacles.
            assert_eq!(old.0, new.0);
            assert_ne!(old.1, new.1);
        }
        assert!(straight_len(&nav, a, b) > open + 0.1);

        cache.remove_obstacle(ob).unwrap();
        let rebuilt = settle(&mut cache, &mut nav);
        assert_eq!(rebuilt.len(), 4);
        assert!(cache.get_obstacle_by_ref(ob).is_none());

        assert_eq!(snapshot(&cache, &nav), before);
        assert!((straight_len(&nav, a, b) - open).abs() < 1e-3);
    }

    #[test]
    fn test_remove_before_update_leaves_mesh_unchanged() {
        let (mut cache, mut nav) = setup();
        let before = snapshot(&cache, &nav);

        let ob = cache
            .add_oriented_box_obstacle(Vec3::new(4.0, 0.5, 4.0), Vec3::new(1.0, 1.0, 0.5), 0.7)
            .unwrap();
        cache.remove_obstacle(ob).unwrap();
        let rebuilt = settle(&mut cache, &mut nav);

        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].polys_before, rebuilt[0].polys_after);
        assert_eq!(snapshot(&cache, &nav), before);
        assert_eq!(cache.obstacle_count(), 0);
    }

    #[test]
    fn test_rebuild_invalidates_old_poly_refs() {
        let (mut cache, mut nav) = setup();
        let filter = QueryFilter::default();
        let old = {
            let query = NavMeshQuery::new(&nav, 64).unwrap();
            query
                .find_nearest_poly(Vec3::new(2.0, 0.0, 2.0), Vec3::new(0.5, 2.0, 0.5), &filter)
                .unwrap()
                .unwrap()
                .reference
        };

        cache
            .add_box_obstacle(Vec3::new(5.0, -0.5, 5.0), Vec3::new(6.0, 2.0, 6.0))
            .unwrap();
        settle(&mut cache, &mut nav);

        assert!(!nav.is_valid_poly_ref(old));
        let query = NavMeshQuery::new(&nav, 64).unwrap();
        let center = Vec3::new(5.5, 0.0, 5.5);
        if let Some(near) = query
            .find_nearest_poly(center, Vec3::new(0.1, 2.0, 0.1), &filter)
            .unwrap()
        {
            let d = Vec3::new(near.point.x - center.x, 0.0, near.point.z - center.z).length();
            assert!(d > 0.5);
        }
    }

    #[test]
    fn test_update_list_overflow_defers_requests() {
        let (mut cache, mut nav) = floor(10, 256);
        // One box on each interior tile corner of a 2x2 block: 25 obstacles, 100 tiles.
        let mut obstacles = Vec::new();
        for bz in 0..5 {
            for bx in 0..5 {
                let corner = Vec3::new((2 * bx + 1) as f32 * TILE, 0.0, (2 * bz + 1) as f32 * TILE);
                let ob = cache
                    .add_box_obstacle(corner + Vec3::new(-1.0, -0.5, -1.0), corner + Vec3::new(1.0, 2.0, 1.0))
                    .unwrap();
                assert_eq!(cache.get_obstacle_by_ref(ob).unwrap().touched.len(), 4);
                obstacles.push(ob);
            }
        }

        assert!(!cache.update(&mut nav).unwrap());
        // 16 obstacles fill the update list, the other 9 wait for room.
        let deferred = obstacles
            .iter()
            .filter(|&&ob| cache.get_obstacle_by_ref(ob).unwrap().pending.is_empty())
            .count();
        assert_eq!(deferred, 9);

        let rebuilt = settle(&mut cache, &mut nav);
        // The first rebuild happened in the call above.
        assert_eq!(rebuilt.len(), 99);
        let mut tiles: Vec<(i32, i32)> = rebuilt.iter().map(|r| (r.tx, r.ty)).collect();
        tiles.sort();
        tiles.dedup();
        assert_eq!(tiles.len(), 99);
        for ob in obstacles {
            assert_eq!(cache.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processed);
        }
    }

    #[test]
    fn test_failed_rebuild_keeps_tile_and_obstacle_pending() {
        let (mut cache, mut roomy) = floor(1, 256);
        let polys = roomy.get_tile_at(0, 0, 0).unwrap().polys.len() as u32;
        let mut tight = NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: TILE,
            tile_height: TILE,
            max_tiles: 8,
            max_polys_per_tile: polys,
        })
        .unwrap();
        cache.build_nav_mesh_tiles_at(0, 0, &mut tight).unwrap();
        let before = tight.get_tile_at(0, 0, 0).unwrap().to_data().unwrap();

        // Carving a hole needs more polygons than `tight` allows per tile.
        let ob = cache
            .add_box_obstacle(Vec3::new(3.0, -0.5, 3.0), Vec3::new(5.0, 2.0, 5.0))
            .unwrap();
        let err = cache.update(&mut tight).unwrap_err();
        assert!(matches!(err, recast_common::Error::Detour(_)));

        assert_eq!(tight.get_tile_at(0, 0, 0).unwrap().to_data().unwrap(), before);
        assert_eq!(cache.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processing);
        assert!(!cache.is_up_to_date());

        // The same tile is retried on the next update.
        assert!(cache.update(&mut roomy).unwrap());
        assert_eq!(cache.get_obstacle_by_ref(ob).unwrap().state, ObstacleState::Processed);
        assert!(roomy.get_tile_at(0, 0, 0).unwrap().polys.len() as u32 > polys);
    }
}
