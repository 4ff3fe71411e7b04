//! Binary tile and mesh set formats
//!
//! A tile blob starts with a `DNAV` header followed by the tile arrays. A mesh
//! set starts with an `MSET` header holding the mesh parameters, followed by
//! `(tile ref, blob size, blob)` records. Everything is little-endian.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use log::{debug, warn};

use crate::nav_mesh::{BVNode, OffMeshConnection, Poly, PolyDetail, TileData, TileHeader};
use crate::{NavMesh, NavMeshParams, PolyFlags, PolyRef, PolyType, Result, Status, DT_EXT_LINK, MAX_VERTS_PER_POLY};

/// Tile blob magic ('DNAV')
pub const DT_NAVMESH_MAGIC: u32 = (b'D' as u32) << 24 | (b'N' as u32) << 16 | (b'A' as u32) << 8 | b'V' as u32;
/// Tile blob version
pub const DT_NAVMESH_VERSION: u32 = 7;
/// Mesh set magic ('MSET')
pub const DT_NAVMESH_SET_MAGIC: u32 = (b'M' as u32) << 24 | (b'S' as u32) << 16 | (b'E' as u32) << 8 | b'T' as u32;
/// Mesh set version
pub const DT_NAVMESH_SET_VERSION: u32 = 1;

/// Counts stored in front of the tile arrays
#[derive(Debug, Clone, Default)]
struct MeshHeader {
    poly_count: u32,
    vert_count: u32,
    detail_mesh_count: u32,
    detail_vert_count: u32,
    detail_tri_count: u32,
    bv_node_count: u32,
    off_mesh_con_count: u32,
}

fn write_vec3<W: Write>(w: &mut W, v: Vec3) -> std::io::Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)?;
    w.write_f32::<LittleEndian>(v.z)
}

fn read_vec3<R: Read>(r: &mut R) -> std::io::Result<Vec3> {
    Ok(Vec3::new(
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
        r.read_f32::<LittleEndian>()?,
    ))
}

fn write_header<W: Write>(w: &mut W, h: &TileHeader, counts: &MeshHeader) -> std::io::Result<()> {
    w.write_u32::<LittleEndian>(DT_NAVMESH_MAGIC)?;
    w.write_u32::<LittleEndian>(DT_NAVMESH_VERSION)?;
    w.write_i32::<LittleEndian>(h.x)?;
    w.write_i32::<LittleEndian>(h.y)?;
    w.write_i32::<LittleEndian>(h.layer)?;
    w.write_u32::<LittleEndian>(h.user_id)?;
    w.write_u32::<LittleEndian>(counts.poly_count)?;
    w.write_u32::<LittleEndian>(counts.vert_count)?;
    w.write_u32::<LittleEndian>(h.max_link_count)?;
    w.write_u32::<LittleEndian>(counts.detail_mesh_count)?;
    w.write_u32::<LittleEndian>(counts.detail_vert_count)?;
    w.write_u32::<LittleEndian>(counts.detail_tri_count)?;
    w.write_u32::<LittleEndian>(counts.bv_node_count)?;
    w.write_u32::<LittleEndian>(counts.off_mesh_con_count)?;
    w.write_u32::<LittleEndian>(h.off_mesh_base)?;
    w.write_f32::<LittleEndian>(h.walkable_height)?;
    w.write_f32::<LittleEndian>(h.walkable_radius)?;
    w.write_f32::<LittleEndian>(h.walkable_climb)?;
    write_vec3(w, h.bmin)?;
    write_vec3(w, h.bmax)?;
    w.write_f32::<LittleEndian>(h.bv_quant_factor)
}

fn read_header<R: Read>(r: &mut R) -> Result<(TileHeader, MeshHeader)> {
    if r.read_u32::<LittleEndian>()? != DT_NAVMESH_MAGIC {
        return Err(Status::failure(Status::WRONG_MAGIC));
    }
    if r.read_u32::<LittleEndian>()? != DT_NAVMESH_VERSION {
        return Err(Status::failure(Status::WRONG_VERSION));
    }

    let mut h = TileHeader::default();
    let mut counts = MeshHeader::default();
    h.x = r.read_i32::<LittleEndian>()?;
    h.y = r.read_i32::<LittleEndian>()?;
    h.layer = r.read_i32::<LittleEndian>()?;
    h.user_id = r.read_u32::<LittleEndian>()?;
    counts.poly_count = r.read_u32::<LittleEndian>()?;
    counts.vert_count = r.read_u32::<LittleEndian>()?;
    h.max_link_count = r.read_u32::<LittleEndian>()?;
    counts.detail_mesh_count = r.read_u32::<LittleEndian>()?;
    counts.detail_vert_count = r.read_u32::<LittleEndian>()?;
    counts.detail_tri_count = r.read_u32::<LittleEndian>()?;
    counts.bv_node_count = r.read_u32::<LittleEndian>()?;
    counts.off_mesh_con_count = r.read_u32::<LittleEndian>()?;
    h.off_mesh_base = r.read_u32::<LittleEndian>()?;
    h.walkable_height = r.read_f32::<LittleEndian>()?;
    h.walkable_radius = r.read_f32::<LittleEndian>()?;
    h.walkable_climb = r.read_f32::<LittleEndian>()?;
    h.bmin = read_vec3(r)?;
    h.bmax = read_vec3(r)?;
    h.bv_quant_factor = r.read_f32::<LittleEndian>()?;
    Ok((h, counts))
}

fn write_poly<W: Write>(w: &mut W, p: &Poly) -> std::io::Result<()> {
    for v in p.verts {
        w.write_u16::<LittleEndian>(v)?;
    }
    for n in p.neis {
        w.write_u16::<LittleEndian>(n)?;
    }
    w.write_u16::<LittleEndian>(p.flags.bits())?;
    w.write_u8(p.vert_count)?;
    // Area in the low six bits, polygon type in the top two.
    w.write_u8((p.area & 0x3f) | ((p.poly_type as u8) << 6))
}

fn read_poly<R: Read>(r: &mut R) -> std::io::Result<Poly> {
    let mut p = Poly::default();
    for v in &mut p.verts {
        *v = r.read_u16::<LittleEndian>()?;
    }
    for n in &mut p.neis {
        *n = r.read_u16::<LittleEndian>()?;
    }
    p.flags = PolyFlags::from_bits_retain(r.read_u16::<LittleEndian>()?);
    p.vert_count = r.read_u8()?.min(MAX_VERTS_PER_POLY as u8);
    let area_and_type = r.read_u8()?;
    p.area = area_and_type & 0x3f;
    p.poly_type = if area_and_type >> 6 == PolyType::OffMeshConnection as u8 {
        PolyType::OffMeshConnection
    } else {
        PolyType::Ground
    };
    Ok(p)
}

pub(crate) fn encode_tile(tile: &TileData) -> Vec<u8> {
    let mut buf = Vec::new();
    // Writes into a Vec cannot fail.
    let _ = write_tile(&mut buf, tile);
    buf
}

fn write_tile<W: Write>(w: &mut W, tile: &TileData) -> std::io::Result<()> {
    let counts = MeshHeader {
        poly_count: tile.polys.len() as u32,
        vert_count: tile.verts.len() as u32,
        detail_mesh_count: tile.detail_meshes.len() as u32,
        detail_vert_count: tile.detail_verts.len() as u32,
        detail_tri_count: tile.detail_tris.len() as u32,
        bv_node_count: tile.bv_tree.len() as u32,
        off_mesh_con_count: tile.off_mesh_cons.len() as u32,
    };
    write_header(w, &tile.header, &counts)?;

    for &v in &tile.verts {
        write_vec3(w, v)?;
    }
    for p in &tile.polys {
        write_poly(w, p)?;
    }
    for d in &tile.detail_meshes {
        w.write_u32::<LittleEndian>(d.vert_base)?;
        w.write_u32::<LittleEndian>(d.tri_base)?;
        w.write_u8(d.vert_count)?;
        w.write_u8(d.tri_count)?;
    }
    for &v in &tile.detail_verts {
        write_vec3(w, v)?;
    }
    for t in &tile.detail_tris {
        w.write_all(t)?;
    }
    for n in &tile.bv_tree {
        for v in n.bmin.iter().chain(&n.bmax) {
            w.write_u16::<LittleEndian>(*v)?;
        }
        w.write_i32::<LittleEndian>(n.i)?;
    }
    for c in &tile.off_mesh_cons {
        write_vec3(w, c.pos[0])?;
        write_vec3(w, c.pos[1])?;
        w.write_f32::<LittleEndian>(c.rad)?;
        w.write_u16::<LittleEndian>(c.poly)?;
        w.write_u8(c.flags)?;
        w.write_u8(c.side)?;
        w.write_u32::<LittleEndian>(c.user_id)?;
    }
    Ok(())
}

pub(crate) fn decode_tile(data: &[u8]) -> Result<TileData> {
    let mut r = Cursor::new(data);
    let (header, counts) = read_header(&mut r)?;

    // Reject counts the blob cannot possibly hold before allocating.
    let min_size = counts.vert_count as u64 * 12
        + counts.poly_count as u64 * 28
        + counts.detail_mesh_count as u64 * 10
        + counts.detail_vert_count as u64 * 12
        + counts.detail_tri_count as u64 * 4
        + counts.bv_node_count as u64 * 16
        + counts.off_mesh_con_count as u64 * 36;
    if min_size > data.len() as u64 {
        return Err(Status::failure(Status::INVALID_PARAM));
    }

    let mut tile = TileData {
        header,
        ..TileData::default()
    };
    for _ in 0..counts.vert_count {
        tile.verts.push(read_vec3(&mut r)?);
    }
    for _ in 0..counts.poly_count {
        tile.polys.push(read_poly(&mut r)?);
    }
    for _ in 0..counts.detail_mesh_count {
        tile.detail_meshes.push(PolyDetail {
            vert_base: r.read_u32::<LittleEndian>()?,
            tri_base: r.read_u32::<LittleEndian>()?,
            vert_count: r.read_u8()?,
            tri_count: r.read_u8()?,
        });
    }
    for _ in 0..counts.detail_vert_count {
        tile.detail_verts.push(read_vec3(&mut r)?);
    }
    for _ in 0..counts.detail_tri_count {
        let mut t = [0u8; 4];
        r.read_exact(&mut t)?;
        tile.detail_tris.push(t);
    }
    for _ in 0..counts.bv_node_count {
        let mut node = BVNode::default();
        for v in node.bmin.iter_mut().chain(node.bmax.iter_mut()) {
            *v = r.read_u16::<LittleEndian>()?;
        }
        node.i = r.read_i32::<LittleEndian>()?;
        tile.bv_tree.push(node);
    }
    for _ in 0..counts.off_mesh_con_count {
        tile.off_mesh_cons.push(OffMeshConnection {
            pos: [read_vec3(&mut r)?, read_vec3(&mut r)?],
            rad: r.read_f32::<LittleEndian>()?,
            poly: r.read_u16::<LittleEndian>()?,
            flags: r.read_u8()?,
            side: r.read_u8()?,
            user_id: r.read_u32::<LittleEndian>()?,
        });
    }

    validate_tile(&tile)?;
    Ok(tile)
}

/// Off-mesh connections that only land in a tile, counted toward its link budget
pub(crate) const MAX_LANDING_CONNECTIONS: u64 = 4096;

/// Most links a tile may ask for: its edges and portals, both ends of its own
/// off-mesh connections and the landings of connections stored elsewhere.
pub(crate) fn max_links_for(poly_count: usize, off_mesh_count: usize) -> u64 {
    poly_count as u64 * MAX_VERTS_PER_POLY as u64 * 3 + (off_mesh_count as u64 + MAX_LANDING_CONNECTIONS) * 4
}

/// Index and count checks so a corrupt tile cannot cause out of range access
/// or runaway allocation later.
pub(crate) fn validate_tile(tile: &TileData) -> Result<()> {
    let bad = || Status::failure(Status::INVALID_PARAM);
    let nverts = tile.verts.len();
    let npolys = tile.polys.len();

    if tile.header.max_link_count as u64 > max_links_for(npolys, tile.off_mesh_cons.len()) {
        return Err(bad());
    }
    if tile.header.off_mesh_base as usize > npolys {
        return Err(bad());
    }
    for p in &tile.polys {
        if p.vert_indices().iter().any(|&v| v as usize >= nverts) {
            return Err(bad());
        }
        let neis = &p.neis[..p.vert_count as usize];
        if neis
            .iter()
            .any(|&n| n != 0 && n & DT_EXT_LINK == 0 && n as usize > npolys)
        {
            return Err(bad());
        }
    }

    if !tile.detail_meshes.is_empty() && tile.detail_meshes.len() < tile.header.off_mesh_base as usize {
        return Err(bad());
    }
    for (i, d) in tile.detail_meshes.iter().enumerate() {
        let verts_end = d.vert_base.checked_add(d.vert_count as u32).ok_or_else(bad)?;
        let tris_end = d.tri_base.checked_add(d.tri_count as u32).ok_or_else(bad)?;
        if verts_end as usize > tile.detail_verts.len() || tris_end as usize > tile.detail_tris.len() {
            return Err(bad());
        }
        let Some(poly) = tile.polys.get(i) else {
            continue;
        };
        let limit = poly.vert_count as usize + d.vert_count as usize;
        let tris = &tile.detail_tris[d.tri_base as usize..tris_end as usize];
        if tris.iter().any(|t| t[..3].iter().any(|&v| v as usize >= limit)) {
            return Err(bad());
        }
    }

    let nnodes = tile.bv_tree.len();
    for (i, node) in tile.bv_tree.iter().enumerate() {
        let ok = if node.i >= 0 {
            (node.i as usize) < npolys
        } else {
            node.i != i32::MIN && i + (-node.i) as usize <= nnodes
        };
        if !ok {
            return Err(bad());
        }
    }

    for c in &tile.off_mesh_cons {
        if c.poly as usize >= npolys {
            return Err(bad());
        }
    }
    Ok(())
}

/// Writes every live tile of `mesh` as a mesh set.
pub fn save_nav_mesh_set<W: Write>(mesh: &NavMesh, mut w: W) -> Result<()> {
    let params = mesh.params();
    let tiles: Vec<(PolyRef, Vec<u8>)> = mesh
        .tiles()
        .filter_map(|(i, t)| t.to_data().map(|d| (mesh.get_tile_ref(i), encode_tile(&d))))
        .collect();

    w.write_u32::<LittleEndian>(DT_NAVMESH_SET_MAGIC)?;
    w.write_u32::<LittleEndian>(DT_NAVMESH_SET_VERSION)?;
    w.write_u32::<LittleEndian>(tiles.len() as u32)?;
    write_vec3(&mut w, params.origin)?;
    w.write_f32::<LittleEndian>(params.tile_width)?;
    w.write_f32::<LittleEndian>(params.tile_height)?;
    w.write_u32::<LittleEndian>(params.max_tiles)?;
    w.write_u32::<LittleEndian>(params.max_polys_per_tile)?;

    for (tile_ref, blob) in &tiles {
        w.write_u32::<LittleEndian>(tile_ref.id())?;
        w.write_u32::<LittleEndian>(blob.len() as u32)?;
        w.write_all(blob)?;
    }
    w.flush()?;
    debug!("saved mesh set with {} tiles", tiles.len());
    Ok(())
}

/// Reads a mesh set, restoring every tile under its saved reference.
pub fn load_nav_mesh_set<R: Read>(mut r: R) -> Result<NavMesh> {
    if r.read_u32::<LittleEndian>()? != DT_NAVMESH_SET_MAGIC {
        return Err(Status::failure(Status::WRONG_MAGIC));
    }
    if r.read_u32::<LittleEndian>()? != DT_NAVMESH_SET_VERSION {
        return Err(Status::failure(Status::WRONG_VERSION));
    }
    let num_tiles = r.read_u32::<LittleEndian>()?;
    let params = NavMeshParams {
        origin: read_vec3(&mut r)?,
        tile_width: r.read_f32::<LittleEndian>()?,
        tile_height: r.read_f32::<LittleEndian>()?,
        max_tiles: r.read_u32::<LittleEndian>()?,
        max_polys_per_tile: r.read_u32::<LittleEndian>()?,
    };
    let mut mesh = NavMesh::new(params)?;

    for _ in 0..num_tiles {
        let tile_ref = PolyRef::new(r.read_u32::<LittleEndian>()?);
        let size = r.read_u32::<LittleEndian>()?;
        if !tile_ref.is_valid() || size == 0 {
            warn!("mesh set ends early at an empty tile record");
            break;
        }
        // Grown as bytes arrive.
        let mut blob = Vec::new();
        (&mut r).take(size as u64).read_to_end(&mut blob)?;
        if blob.len() != size as usize {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        mesh.add_tile_from_bytes(&blob, Some(tile_ref))?;
    }
    debug!("loaded mesh set with {} tiles", mesh.tile_count());
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_mesh_helpers::{grid_tile, two_tile_navmesh};

    #[test]
    fn test_magic_values() {
        assert_eq!(DT_NAVMESH_MAGIC.to_be_bytes(), *b"DNAV");
        assert_eq!(DT_NAVMESH_SET_MAGIC.to_be_bytes(), *b"MSET");
    }

    #[test]
    fn test_tile_blob_round_trip() {
        let tile = grid_tile(2, 1, 3);
        let back = TileData::from_bytes(&tile.to_bytes()).unwrap();
        assert_eq!(back, tile);
    }

    #[test]
    fn test_wrong_magic_and_version() {
        let mut blob = grid_tile(0, 0, 3).to_bytes();
        blob[4] = 99;
        let err = TileData::from_bytes(&blob).unwrap_err();
        assert!(err.has_detail(Status::WRONG_VERSION));

        blob[0] ^= 0xff;
        let err = TileData::from_bytes(&blob).unwrap_err();
        assert!(err.has_detail(Status::WRONG_MAGIC));
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let blob = grid_tile(0, 0, 3).to_bytes();
        assert!(TileData::from_bytes(&blob[..blob.len() - 3]).is_err());
        assert!(TileData::from_bytes(&blob[..6]).is_err());
    }

    #[test]
    fn test_mesh_set_keeps_tile_refs() {
        let mesh = two_tile_navmesh();
        let mut buf = Vec::new();
        save_nav_mesh_set(&mesh, &mut buf).unwrap();

        let loaded = load_nav_mesh_set(buf.as_slice()).unwrap();
        assert_eq!(loaded.tile_count(), 2);
        assert_eq!(loaded.get_tile_ref_at(1, 0, 0), mesh.get_tile_ref_at(1, 0, 0));
        let left = loaded.get_tile_at(0, 0, 0).unwrap();
        assert_eq!(left.link_count(), mesh.get_tile_at(0, 0, 0).unwrap().link_count());
    }

    #[test]
    fn test_mesh_set_wrong_magic() {
        let err = load_nav_mesh_set(&b"NOPE\x01\x00\x00\x00"[..]).unwrap_err();
        assert!(err.has_detail(Status::WRONG_MAGIC));
    }
}
