//! Hand-built grid meshes shared by the Detour tests.
//!
//! A grid of `n * n` unit squares at y = 0. Polygon `z * n + x` covers
//! `[x, x + 1] x [z, z + 1]` of its tile.

use glam::Vec3;
use recast::{PolyMesh, MESH_NULL_IDX, RC_PORTAL_FLAG, RC_WALKABLE_AREA};

use crate::{create_nav_mesh_data, NavMesh, NavMeshCreateParams, NavMeshParams, PolyFlags, TileData};

pub const GRID_PARAMS: NavMeshParams = NavMeshParams {
    origin: Vec3::ZERO,
    tile_width: 3.0,
    tile_height: 3.0,
    max_tiles: 8,
    max_polys_per_tile: 64,
};

/// Grid polygon mesh in a tile of its own. Bit `k` of `portal_mask` turns the
/// border on Recast side `k` into portals (0: x = 0, 1: z = n, 2: x = n, 3: z = 0).
pub fn grid_poly_mesh(n: usize, portal_mask: u8) -> PolyMesh {
    let nvp = 6;
    let mut mesh = PolyMesh::new(nvp);
    mesh.cs = 1.0;
    mesh.ch = 1.0;
    mesh.bmin = Vec3::ZERO;
    mesh.bmax = Vec3::new(n as f32, 1.0, n as f32);

    for z in 0..=n {
        for x in 0..=n {
            mesh.verts.extend_from_slice(&[x as u16, 0, z as u16]);
        }
    }

    let vert = |x: usize, z: usize| (z * (n + 1) + x) as u16;
    let poly = |x: usize, z: usize| (z * n + x) as u16;
    let border = |side: u8| {
        if portal_mask & (1 << side) != 0 {
            RC_PORTAL_FLAG | side as u16
        } else {
            MESH_NULL_IDX
        }
    };

    for z in 0..n {
        for x in 0..n {
            mesh.polys
                .extend_from_slice(&[vert(x, z), vert(x, z + 1), vert(x + 1, z + 1), vert(x + 1, z)]);
            mesh.polys.extend_from_slice(&[MESH_NULL_IDX; 2]);
            mesh.polys.extend_from_slice(&[
                if x > 0 { poly(x - 1, z) } else { border(0) },
                if z + 1 < n { poly(x, z + 1) } else { border(1) },
                if x + 1 < n { poly(x + 1, z) } else { border(2) },
                if z > 0 { poly(x, z - 1) } else { border(3) },
            ]);
            mesh.polys.extend_from_slice(&[MESH_NULL_IDX; 2]);
            mesh.regs.push(1);
            mesh.areas.push(RC_WALKABLE_AREA);
            mesh.flags.push(PolyFlags::WALK.bits());
        }
    }
    mesh
}

/// Grid tile at tile coordinates `(tx, ty)` with every border turned into portals.
pub fn grid_tile(tx: i32, ty: i32, n: usize) -> TileData {
    let mut mesh = grid_poly_mesh(n, 0b1111);
    let offset = Vec3::new(tx as f32 * n as f32, 0.0, ty as f32 * n as f32);
    mesh.bmin += offset;
    mesh.bmax += offset;
    let params = NavMeshCreateParams {
        tile_x: tx,
        tile_y: ty,
        walkable_climb: 0.5,
        ..NavMeshCreateParams::new(&mesh, None)
    };
    create_nav_mesh_data(&params).expect("grid tile")
}

/// Single 3x3 grid tile
pub fn grid_navmesh() -> NavMesh {
    let mut mesh = NavMesh::new(GRID_PARAMS).expect("params");
    mesh.add_tile(grid_tile(0, 0, 3), None).expect("tile");
    mesh
}

/// Two 3x3 grid tiles side by side along x
pub fn two_tile_navmesh() -> NavMesh {
    let mut mesh = NavMesh::new(GRID_PARAMS).expect("params");
    mesh.add_tile(grid_tile(0, 0, 3), None).expect("left tile");
    mesh.add_tile(grid_tile(1, 0, 3), None).expect("right tile");
    mesh
}
