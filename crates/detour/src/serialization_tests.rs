//! Saving and loading meshes built from real geometry
//!
//! The mesh comes out of the Recast pipeline, goes through the tile builder
//! and is written to disk as a mesh set.

#[cfg(test)]
mod tests {
    use std::io::{Seek, SeekFrom};

    use glam::Vec3;
    use recast::{RecastBuilder, RecastConfig};

    use crate::{
        create_nav_mesh_data, load_nav_mesh_set, save_nav_mesh_set, NavMesh, NavMeshCreateParams, NavMeshQuery,
        PolyFlags, QueryFilter, Status, StraightPathOptions, TileData,
    };

    /// 12x12 floor with a box standing on it
    fn floor_with_box() -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let mut verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 12.0),
            Vec3::new(12.0, 0.0, 12.0),
            Vec3::new(12.0, 0.0, 0.0),
        ];
        let mut tris = vec![[0, 1, 2], [0, 2, 3]];

        let (bmin, bmax) = (Vec3::new(4.0, 0.0, 4.0), Vec3::new(6.0, 1.5, 7.0));
        for i in 0..8 {
            verts.push(Vec3::new(
                if i & 1 == 0 { bmin.x } else { bmax.x },
                if i & 2 == 0 { bmin.y } else { bmax.y },
                if i & 4 == 0 { bmin.z } else { bmax.z },
            ));
        }
        for f in [[0, 4, 6, 2], [1, 3, 7, 5], [0, 1, 5, 4], [2, 6, 7, 3], [0, 2, 3, 1], [4, 5, 7, 6]] {
            tris.push([4 + f[0], 4 + f[1], 4 + f[2]]);
            tris.push([4 + f[0], 4 + f[2], 4 + f[3]]);
        }
        (verts, tris)
    }

    fn built_tile() -> TileData {
        let (verts, tris) = floor_with_box();
        let mut cfg = RecastConfig::default();
        cfg.max_edge_len = 12;
        cfg.calculate_grid_size(Vec3::new(0.0, -1.0, 0.0), Vec3::new(12.0, 3.0, 12.0));

        let mut out = RecastBuilder::new(cfg).build(&verts, &tris).unwrap().unwrap();
        out.poly_mesh.flags.fill(PolyFlags::WALK.bits());

        let params = NavMeshCreateParams::new(&out.poly_mesh, Some(&out.detail_mesh));
        create_nav_mesh_data(&params).unwrap()
    }

    #[test]
    fn test_saved_mesh_answers_queries_the_same() {
        let data = built_tile();
        let mesh = NavMesh::from_single_tile(data.clone()).unwrap();

        let mut file = tempfile::tempfile().unwrap();
        save_nav_mesh_set(&mesh, &mut file).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let loaded = load_nav_mesh_set(&mut file).unwrap();

        assert_eq!(loaded.params(), mesh.params());
        assert_eq!(loaded.tile_count(), 1);
        let (_, tile) = loaded.tiles().next().unwrap();
        assert_eq!(tile.to_data().unwrap(), data);

        let filter = QueryFilter::default();
        let ext = Vec3::new(1.0, 2.0, 1.0);
        let (a, b) = (Vec3::new(1.5, 0.0, 1.5), Vec3::new(10.5, 0.0, 10.5));

        let mut answers = Vec::new();
        for nav in [&mesh, &loaded] {
            let mut query = NavMeshQuery::new(nav, 1024).unwrap();
            let start = query.find_nearest_poly(a, ext, &filter).unwrap().unwrap();
            let end = query.find_nearest_poly(b, ext, &filter).unwrap().unwrap();
            let path = query
                .find_path(start.reference, end.reference, start.point, end.point, &filter, 128)
                .unwrap();
            assert_eq!(path.status, Status::SUCCESS);
            let straight = query
                .find_straight_path(start.point, end.point, &path.path, 32, StraightPathOptions::empty())
                .unwrap();
            answers.push((start, end, path.path, straight.points));
        }
        assert_eq!(answers[0], answers[1]);

        // The box sits between the two corners, so the path bends around it.
        assert!(answers[0].3.len() > 2);
    }

    #[test]
    fn test_tile_blob_survives_remove_and_re_add() {
        let data = built_tile();
        let blob = data.to_bytes();
        let mut mesh = NavMesh::from_single_tile(data).unwrap();
        let tile_ref = mesh.get_tile_ref_at(0, 0, 0).unwrap();
        let links = mesh.get_tile_at(0, 0, 0).unwrap().link_count();

        let removed = mesh.remove_tile(tile_ref).unwrap();
        assert_eq!(removed.to_bytes(), blob);
        assert!(!mesh.is_valid_poly_ref(tile_ref));

        // Restoring under the old reference keeps old polygon refs usable.
        mesh.add_tile_from_bytes(&blob, Some(tile_ref)).unwrap();
        assert!(mesh.is_valid_poly_ref(tile_ref));
        assert_eq!(mesh.get_tile_at(0, 0, 0).unwrap().link_count(), links);

        let mut corrupt = blob.clone();
        corrupt[0] ^= 0x20;
        let err = mesh.add_tile_from_bytes(&corrupt, None).unwrap_err();
        assert!(err.has_detail(Status::WRONG_MAGIC));
    }

    /// Loads `data` after `corrupt` has been applied and returns the status.
    fn load_corrupted(corrupt: impl FnOnce(&mut TileData)) -> Status {
        let mut data = built_tile();
        corrupt(&mut data);
        let mut mesh = NavMesh::new(crate::NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 12.0,
            tile_height: 12.0,
            max_tiles: 1,
            max_polys_per_tile: 1024,
        })
        .unwrap();
        let from_blob = mesh.add_tile_from_bytes(&data.to_bytes(), None).unwrap_err();
        assert_eq!(mesh.tile_count(), 0);
        let from_struct = mesh.add_tile(data, None).unwrap_err();
        assert_eq!(from_blob, from_struct);
        from_blob
    }

    #[test]
    fn test_unmodified_tile_passes_validation() {
        let data = built_tile();
        assert!(data.polys.len() > 1);
        assert!(!data.bv_tree.is_empty());
        assert!(!data.detail_tris.is_empty());
        assert!(TileData::from_bytes(&data.to_bytes()).is_ok());
    }

    #[test]
    fn test_detail_triangle_index_out_of_range() {
        let status = load_corrupted(|d| d.detail_tris[0][0] = 200);
        assert!(status.has_detail(Status::INVALID_PARAM));
    }

    #[test]
    fn test_neighbour_index_out_of_range() {
        let status = load_corrupted(|d| {
            let n = d.polys.len() as u16;
            d.polys[0].neis[0] = n + 1;
        });
        assert!(status.has_detail(Status::INVALID_PARAM));
    }

    #[test]
    fn test_bv_node_index_out_of_range() {
        let status = load_corrupted(|d| {
            let leaf = d.bv_tree.iter_mut().find(|n| n.i >= 0).unwrap();
            leaf.i = 5000;
        });
        assert!(status.has_detail(Status::INVALID_PARAM));

        // An escape running past the end of the tree, and one that would never advance.
        for escape in [-100_000, i32::MIN] {
            let status = load_corrupted(|d| d.bv_tree[0].i = escape);
            assert!(status.has_detail(Status::INVALID_PARAM));
        }
    }

    #[test]
    fn test_detail_ranges_that_overflow() {
        let status = load_corrupted(|d| d.detail_meshes[0].vert_base = u32::MAX);
        assert!(status.has_detail(Status::INVALID_PARAM));
        let status = load_corrupted(|d| d.detail_meshes[0].tri_base = u32::MAX - 1);
        assert!(status.has_detail(Status::INVALID_PARAM));
    }

    #[test]
    fn test_oversized_link_count_is_rejected() {
        let status = load_corrupted(|d| d.header.max_link_count = u32::MAX);
        assert!(status.has_detail(Status::INVALID_PARAM));
    }

    #[test]
    fn test_oversized_set_record_is_rejected() {
        let mesh = NavMesh::from_single_tile(built_tile()).unwrap();
        let mut buf = Vec::new();
        save_nav_mesh_set(&mesh, &mut buf).unwrap();

        // The first record's size follows the 40 byte set header and its tile ref.
        buf[44..48].copy_from_slice(&0x7fff_ffffu32.to_le_bytes());
        let err = load_nav_mesh_set(buf.as_slice()).unwrap_err();
        assert!(err.has_detail(Status::INVALID_PARAM));
    }
}
