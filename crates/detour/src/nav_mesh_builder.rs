//! Navigation mesh tile builder
//!
//! Turns a Recast polygon mesh (plus optional detail mesh and off-mesh
//! connections) into `TileData` ready to be added to a `NavMesh`.

use glam::Vec3;
use log::{debug, warn};
use recast::{PolyMesh, PolyMeshDetail, MESH_NULL_IDX, RC_PORTAL_FLAG};

use crate::binary_format::max_links_for;
use crate::nav_mesh::{BVNode, OffMeshConnection, Poly, PolyDetail, TileData, TileHeader};
use crate::{
    PolyFlags, PolyType, Result, Status, DT_EXT_LINK, DT_OFFMESH_CON_BIDIR, DT_NULL_LINK, MAX_VERTS_PER_POLY,
};

/// Off-mesh connection as authored by the user
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnectionDef {
    pub start: Vec3,
    pub end: Vec3,
    pub radius: f32,
    pub bidirectional: bool,
    pub area: u8,
    pub flags: PolyFlags,
    pub user_id: u32,
}

/// Input for building one navigation mesh tile
#[derive(Debug, Clone)]
pub struct NavMeshCreateParams<'a> {
    pub poly_mesh: &'a PolyMesh,
    pub detail_mesh: Option<&'a PolyMeshDetail>,
    pub off_mesh_cons: &'a [OffMeshConnectionDef],
    pub user_id: u32,
    pub tile_x: i32,
    pub tile_y: i32,
    pub tile_layer: i32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub build_bv_tree: bool,
}

impl<'a> NavMeshCreateParams<'a> {
    /// Parameters for a tile at (0, 0) with a BV tree and no off-mesh connections
    pub fn new(poly_mesh: &'a PolyMesh, detail_mesh: Option<&'a PolyMeshDetail>) -> Self {
        Self {
            poly_mesh,
            detail_mesh,
            off_mesh_cons: &[],
            user_id: 0,
            tile_x: 0,
            tile_y: 0,
            tile_layer: 0,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            build_bv_tree: true,
        }
    }
}

const XP: u8 = 1 << 0;
const ZP: u8 = 1 << 1;
const XM: u8 = 1 << 2;
const ZM: u8 = 1 << 3;

/// Tile side a point lies beyond, or 0xff when inside the tile footprint
fn classify_off_mesh_point(pt: Vec3, bmin: Vec3, bmax: Vec3) -> u8 {
    let mut outcode = 0;
    if pt.x >= bmax.x {
        outcode |= XP;
    }
    if pt.z >= bmax.z {
        outcode |= ZP;
    }
    if pt.x < bmin.x {
        outcode |= XM;
    }
    if pt.z < bmin.z {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => 0xff,
    }
}

/// Detour side for a Recast portal side, `None` for a non-portal border
fn portal_side(dir: u16) -> Option<u16> {
    match dir {
        0 => Some(4),
        1 => Some(2),
        2 => Some(0),
        3 => Some(6),
        _ => None,
    }
}

/// Builds the tile data for a polygon mesh.
pub fn create_nav_mesh_data(params: &NavMeshCreateParams) -> Result<TileData> {
    let pmesh = params.poly_mesh;
    let nvp = pmesh.nvp;
    let npolys = pmesh.poly_count();
    let nverts = pmesh.vert_count();

    if nvp == 0 || nvp > MAX_VERTS_PER_POLY || npolys == 0 || nverts >= 0xffff {
        return Err(Status::failure(Status::INVALID_PARAM));
    }
    if let Some(dm) = params.detail_mesh {
        if dm.meshes.len() != npolys {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
    }

    let cs = pmesh.cs;
    let ch = pmesh.ch;
    let to_world = |i: usize| {
        let v = pmesh.vert(i);
        pmesh.bmin + Vec3::new(v[0] as f32 * cs, v[1] as f32 * ch, v[2] as f32 * cs)
    };

    // Classify off-mesh end points against the tile, with a tight vertical range.
    let mut classes = Vec::with_capacity(params.off_mesh_cons.len());
    if !params.off_mesh_cons.is_empty() {
        let (mut hmin, mut hmax) = (f32::MAX, f32::MIN);
        match params.detail_mesh {
            Some(dm) if !dm.verts.is_empty() => {
                for v in &dm.verts {
                    hmin = hmin.min(v.y);
                    hmax = hmax.max(v.y);
                }
            }
            _ => {
                for i in 0..nverts {
                    let h = to_world(i).y;
                    hmin = hmin.min(h);
                    hmax = hmax.max(h);
                }
            }
        }
        hmin -= params.walkable_climb;
        hmax += params.walkable_climb;
        let bmin = Vec3::new(pmesh.bmin.x, hmin, pmesh.bmin.z);
        let bmax = Vec3::new(pmesh.bmax.x, hmax, pmesh.bmax.z);

        for con in params.off_mesh_cons {
            let mut c0 = classify_off_mesh_point(con.start, bmin, bmax);
            let c1 = classify_off_mesh_point(con.end, bmin, bmax);
            // Starts far above or below the tile cannot touch it.
            if c0 == 0xff && (con.start.y < bmin.y || con.start.y > bmax.y) {
                c0 = 0;
            }
            classes.push((c0, c1));
        }
    }

    let off_mesh_link_count = classes
        .iter()
        .map(|&(a, b)| (a == 0xff) as u32 + (b == 0xff) as u32)
        .sum::<u32>();
    let stored: Vec<(usize, u8)> = classes
        .iter()
        .enumerate()
        .filter(|(_, c)| c.0 == 0xff)
        .map(|(i, c)| (i, c.1))
        .collect();

    let mut edge_count = 0u32;
    let mut portal_count = 0u32;
    for i in 0..npolys {
        let neis = pmesh.poly_neighbours(i);
        for (j, _) in pmesh.poly_verts(i).iter().enumerate() {
            edge_count += 1;
            if neis[j] != MESH_NULL_IDX && neis[j] & RC_PORTAL_FLAG != 0 && neis[j] & 0xf != 0xf {
                portal_count += 1;
            }
        }
    }
    let max_link_count = edge_count + portal_count * 2 + off_mesh_link_count * 2;
    if max_link_count as u64 > max_links_for(npolys + stored.len(), stored.len()) {
        warn!("{} off-mesh connections exceed the tile link budget", classes.len());
        return Err(Status::failure(Status::INVALID_PARAM));
    }

    let mut verts: Vec<Vec3> = (0..nverts).map(to_world).collect();
    let off_mesh_vert_base = verts.len();
    for &(i, _) in &stored {
        let con = &params.off_mesh_cons[i];
        verts.push(con.start);
        verts.push(con.end);
    }

    let mut polys = Vec::with_capacity(npolys + stored.len());
    for i in 0..npolys {
        let pv = pmesh.poly_verts(i);
        let neis = pmesh.poly_neighbours(i);
        let mut poly = Poly {
            first_link: DT_NULL_LINK,
            flags: PolyFlags::from_bits_retain(pmesh.flags.get(i).copied().unwrap_or(0)),
            area: pmesh.areas[i],
            vert_count: pv.len() as u8,
            poly_type: PolyType::Ground,
            ..Default::default()
        };
        for (j, &v) in pv.iter().enumerate() {
            poly.verts[j] = v;
            let nei = neis[j];
            poly.neis[j] = if nei == MESH_NULL_IDX {
                0
            } else if nei & RC_PORTAL_FLAG != 0 {
                portal_side(nei & 0xf).map_or(0, |side| DT_EXT_LINK | side)
            } else {
                nei + 1
            };
        }
        polys.push(poly);
    }

    for (n, &(i, _)) in stored.iter().enumerate() {
        let con = &params.off_mesh_cons[i];
        let mut poly = Poly {
            first_link: DT_NULL_LINK,
            flags: con.flags,
            area: con.area,
            vert_count: 2,
            poly_type: PolyType::OffMeshConnection,
            ..Default::default()
        };
        poly.verts[0] = (off_mesh_vert_base + n * 2) as u16;
        poly.verts[1] = (off_mesh_vert_base + n * 2 + 1) as u16;
        polys.push(poly);
    }

    let mut detail_meshes = Vec::with_capacity(npolys);
    let mut detail_verts = Vec::new();
    let mut detail_tris = Vec::new();
    for i in 0..npolys {
        let nv = pmesh.poly_verts(i).len();
        let sub = params.detail_mesh.map(|dm| (dm, dm.meshes[i]));
        match sub {
            Some((dm, [vb, ndv, tb, ntris])) if ndv as usize >= nv && ntris > 0 => {
                // The first `nv` detail vertices repeat the polygon vertices.
                detail_meshes.push(PolyDetail {
                    vert_base: detail_verts.len() as u32,
                    tri_base: detail_tris.len() as u32,
                    vert_count: (ndv as usize - nv) as u8,
                    tri_count: ntris as u8,
                });
                detail_verts.extend_from_slice(&dm.verts[vb as usize + nv..(vb + ndv) as usize]);
                detail_tris.extend_from_slice(&dm.tris[tb as usize..(tb + ntris) as usize]);
            }
            _ => {
                // Triangle fan over the polygon.
                detail_meshes.push(PolyDetail {
                    vert_base: 0,
                    tri_base: detail_tris.len() as u32,
                    vert_count: 0,
                    tri_count: (nv - 2) as u8,
                });
                for j in 2..nv {
                    let mut flags = 1 << 2;
                    if j == 2 {
                        flags |= 1;
                    }
                    if j == nv - 1 {
                        flags |= 1 << 4;
                    }
                    detail_tris.push([0, (j - 1) as u8, j as u8, flags]);
                }
            }
        }
    }

    let bv_tree = if params.build_bv_tree {
        create_bv_tree(params)
    } else {
        Vec::new()
    };

    let off_mesh_cons = stored
        .iter()
        .enumerate()
        .map(|(n, &(i, side))| {
            let con = &params.off_mesh_cons[i];
            OffMeshConnection {
                pos: [con.start, con.end],
                rad: con.radius,
                poly: (npolys + n) as u16,
                flags: if con.bidirectional { DT_OFFMESH_CON_BIDIR } else { 0 },
                side,
                user_id: con.user_id,
            }
        })
        .collect();

    let header = TileHeader {
        x: params.tile_x,
        y: params.tile_y,
        layer: params.tile_layer,
        user_id: params.user_id,
        off_mesh_base: npolys as u32,
        max_link_count,
        walkable_height: params.walkable_height,
        walkable_radius: params.walkable_radius,
        walkable_climb: params.walkable_climb,
        bmin: pmesh.bmin,
        bmax: pmesh.bmax,
        bv_quant_factor: 1.0 / cs,
    };

    debug!(
        "tile ({}, {}, {}): {} polygons, {} off-mesh connections, {} bv nodes",
        header.x,
        header.y,
        header.layer,
        npolys,
        stored.len(),
        bv_tree.len()
    );

    Ok(TileData {
        header,
        verts,
        polys,
        detail_meshes,
        detail_verts,
        detail_tris,
        bv_tree,
        off_mesh_cons,
    })
}

#[derive(Clone, Copy)]
struct BVItem {
    bmin: [u16; 3],
    bmax: [u16; 3],
    i: i32,
}

fn quantize(v: f32) -> u16 {
    (v as i32).clamp(0, 0xffff) as u16
}

/// Builds a flattened BV tree over the ground polygons with bounds quantized
/// to cell size on every axis.
fn create_bv_tree(params: &NavMeshCreateParams) -> Vec<BVNode> {
    let pmesh = params.poly_mesh;
    let npolys = pmesh.poly_count();
    let quant_factor = 1.0 / pmesh.cs;

    let mut items: Vec<BVItem> = (0..npolys)
        .map(|i| match params.detail_mesh {
            Some(dm) if dm.meshes[i][1] > 0 => {
                let [vb, ndv, _, _] = dm.meshes[i];
                let pts = &dm.verts[vb as usize..(vb + ndv) as usize];
                let (lo, hi) = pts.iter().fold((pts[0], pts[0]), |(lo, hi), &v| (lo.min(v), hi.max(v)));
                let lo = (lo - pmesh.bmin) * quant_factor;
                let hi = (hi - pmesh.bmin) * quant_factor;
                BVItem {
                    bmin: [quantize(lo.x), quantize(lo.y), quantize(lo.z)],
                    bmax: [quantize(hi.x), quantize(hi.y), quantize(hi.z)],
                    i: i as i32,
                }
            }
            _ => {
                let mut bmin = [u16::MAX; 3];
                let mut bmax = [0u16; 3];
                for &v in pmesh.poly_verts(i) {
                    let p = pmesh.vert(v as usize);
                    for k in 0..3 {
                        bmin[k] = bmin[k].min(p[k]);
                        bmax[k] = bmax[k].max(p[k]);
                    }
                }
                // Heights are in ch units, the tree uses cs on every axis.
                bmin[1] = (bmin[1] as f32 * pmesh.ch / pmesh.cs).floor() as u16;
                bmax[1] = (bmax[1] as f32 * pmesh.ch / pmesh.cs).ceil() as u16;
                BVItem { bmin, bmax, i: i as i32 }
            }
        })
        .collect();

    let mut nodes = Vec::with_capacity(npolys * 2);
    subdivide(&mut items, &mut nodes);
    nodes
}

fn subdivide(items: &mut [BVItem], nodes: &mut Vec<BVNode>) {
    let icur = nodes.len();
    if let [item] = items {
        nodes.push(BVNode {
            bmin: item.bmin,
            bmax: item.bmax,
            i: item.i,
        });
        return;
    }

    let mut node = BVNode {
        bmin: items[0].bmin,
        bmax: items[0].bmax,
        i: 0,
    };
    for it in &items[1..] {
        for k in 0..3 {
            node.bmin[k] = node.bmin[k].min(it.bmin[k]);
            node.bmax[k] = node.bmax[k].max(it.bmax[k]);
        }
    }
    nodes.push(node);

    let ext = [
        node.bmax[0] - node.bmin[0],
        node.bmax[1] - node.bmin[1],
        node.bmax[2] - node.bmin[2],
    ];
    let mut axis = 0;
    if ext[1] > ext[axis] {
        axis = 1;
    }
    if ext[2] > ext[axis] {
        axis = 2;
    }
    items.sort_by_key(|it| it.bmin[axis]);

    let split = items.len() / 2;
    let (left, right) = items.split_at_mut(split);
    subdivide(left, nodes);
    subdivide(right, nodes);

    let escape = (nodes.len() - icur) as i32;
    nodes[icur].i = -escape;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::grid_poly_mesh;

    #[test]
    fn test_classify_off_mesh_point() {
        let bmin = Vec3::ZERO;
        let bmax = Vec3::splat(3.0);
        assert_eq!(classify_off_mesh_point(Vec3::new(1.0, 1.0, 1.0), bmin, bmax), 0xff);
        assert_eq!(classify_off_mesh_point(Vec3::new(4.0, 1.0, 1.0), bmin, bmax), 0);
        assert_eq!(classify_off_mesh_point(Vec3::new(4.0, 1.0, 4.0), bmin, bmax), 1);
        assert_eq!(classify_off_mesh_point(Vec3::new(1.0, 1.0, 4.0), bmin, bmax), 2);
        assert_eq!(classify_off_mesh_point(Vec3::new(-1.0, 1.0, 1.0), bmin, bmax), 4);
        assert_eq!(classify_off_mesh_point(Vec3::new(1.0, 1.0, -1.0), bmin, bmax), 6);
        assert_eq!(classify_off_mesh_point(Vec3::new(4.0, 1.0, -1.0), bmin, bmax), 7);
    }

    #[test]
    fn test_grid_tile_layout() {
        let pmesh = grid_poly_mesh(3, 0);
        let data = create_nav_mesh_data(&NavMeshCreateParams::new(&pmesh, None)).unwrap();
        assert_eq!(data.polys.len(), 9);
        assert_eq!(data.verts.len(), 16);
        assert_eq!(data.detail_tris.len(), 18);
        // 36 edges, no portals.
        assert_eq!(data.header.max_link_count, 36);
        assert_eq!(data.header.off_mesh_base, 9);

        let leaves = data.bv_tree.iter().filter(|n| n.i >= 0).count();
        assert_eq!(leaves, 9);
        assert_eq!(data.bv_tree[0].i, -(data.bv_tree.len() as i32));
    }

    #[test]
    fn test_portals_are_remapped() {
        let pmesh = grid_poly_mesh(3, 0b0100);
        let data = create_nav_mesh_data(&NavMeshCreateParams::new(&pmesh, None)).unwrap();
        // Recast side 2 is +x, Detour side 0.
        let east = &data.polys[5];
        assert!(east.neis.contains(&(DT_EXT_LINK)));
        assert_eq!(data.header.max_link_count, 36 + 3 * 2);
    }

    #[test]
    fn test_off_mesh_connections_are_stored_by_start() {
        let pmesh = grid_poly_mesh(3, 0);
        let cons = [
            OffMeshConnectionDef {
                start: Vec3::new(0.5, 0.0, 0.5),
                end: Vec3::new(2.5, 0.0, 2.5),
                radius: 0.3,
                bidirectional: true,
                area: 5,
                flags: PolyFlags::JUMP,
                user_id: 7,
            },
            OffMeshConnectionDef {
                start: Vec3::new(5.0, 0.0, 0.5),
                end: Vec3::new(1.5, 0.0, 1.5),
                radius: 0.3,
                bidirectional: false,
                area: 5,
                flags: PolyFlags::JUMP,
                user_id: 8,
            },
        ];
        let params = NavMeshCreateParams {
            off_mesh_cons: &cons,
            ..NavMeshCreateParams::new(&pmesh, None)
        };
        let data = create_nav_mesh_data(&params).unwrap();
        assert_eq!(data.off_mesh_cons.len(), 1);
        assert_eq!(data.polys.len(), 10);
        assert_eq!(data.polys[9].poly_type, PolyType::OffMeshConnection);
        assert_eq!(data.off_mesh_cons[0].poly, 9);
        assert_eq!(data.off_mesh_cons[0].side, 0xff);
        assert_eq!(data.off_mesh_cons[0].user_id, 7);
        // Three end points land in the tile.
        assert_eq!(data.header.max_link_count, 36 + 3 * 2);
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        let pmesh = PolyMesh::new(6);
        let err = create_nav_mesh_data(&NavMeshCreateParams::new(&pmesh, None)).unwrap_err();
        assert!(err.has_detail(Status::INVALID_PARAM));
    }
}
