//! Navigation mesh implementation for Detour
//!
//! The navigation mesh is a fixed pool of tile slots. Each live tile owns its
//! polygons, vertices, detail triangles and a pool of links. Links form an
//! intrusive singly linked list per polygon, allocated from a per-tile free
//! list; they connect polygons inside a tile, across tile borders and through
//! off-mesh connections.

use glam::Vec3;
use log::debug;
use recast_common::{
    closest_height_point_triangle, dist_pt_seg_sqr_2d, next_pow2, overlap_bounds, overlap_quant_bounds,
    point_in_polygon, sqr,
};

use crate::binary_format;
use crate::{
    opposite_tile, NavMeshParams, PolyFlags, PolyRef, PolyType, Result, Status, TileRef, DT_DETAIL_EDGE_BOUNDARY,
    DT_EXT_LINK, DT_NULL_LINK, DT_OFFMESH_CON_BIDIR, MAX_VERTS_PER_POLY,
};

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// Neighbour polygon
    pub reference: PolyRef,
    /// Next link of the same polygon
    pub next: u32,
    /// Edge of the polygon the link leaves through
    pub edge: u8,
    /// Tile side for border links, 0xff for links inside the tile
    pub side: u8,
    /// Start of the portal along the edge, 0..=255
    pub bmin: u8,
    /// End of the portal along the edge, 0..=255
    pub bmax: u8,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            reference: PolyRef::NULL,
            next: DT_NULL_LINK,
            edge: 0,
            side: 0xff,
            bmin: 0,
            bmax: 0,
        }
    }
}

/// Polygon in the navigation mesh
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Poly {
    /// First link in the tile link pool
    pub first_link: u32,
    /// Indices into the tile vertices
    pub verts: [u16; MAX_VERTS_PER_POLY],
    /// Per edge: 0 for a wall, `index + 1` for a neighbour in the same tile,
    /// or `DT_EXT_LINK | side` for a tile border portal
    pub neis: [u16; MAX_VERTS_PER_POLY],
    pub flags: PolyFlags,
    pub vert_count: u8,
    pub area: u8,
    pub poly_type: PolyType,
}

impl Default for Poly {
    fn default() -> Self {
        Self {
            first_link: DT_NULL_LINK,
            verts: [0; MAX_VERTS_PER_POLY],
            neis: [0; MAX_VERTS_PER_POLY],
            flags: PolyFlags::empty(),
            vert_count: 0,
            area: 0,
            poly_type: PolyType::Ground,
        }
    }
}

impl Poly {
    /// Vertex indices in use
    pub fn vert_indices(&self) -> &[u16] {
        &self.verts[..self.vert_count as usize]
    }
}

/// Detail sub-mesh of a polygon
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyDetail {
    /// First extra vertex in `detail_verts`
    pub vert_base: u32,
    /// First triangle in `detail_tris`
    pub tri_base: u32,
    /// Extra vertices on top of the polygon vertices
    pub vert_count: u8,
    pub tri_count: u8,
}

/// Bounding volume node with quantized bounds.
///
/// A non-negative `i` is a leaf holding a polygon index, a negative one is the
/// escape offset past the node's subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct BVNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub i: i32,
}

/// Off-mesh connection stored in the tile that holds its start point
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnection {
    /// Start and end point
    pub pos: [Vec3; 2],
    /// Snap radius of the end points
    pub rad: f32,
    /// Polygon index of the connection in its tile
    pub poly: u16,
    pub flags: u8,
    /// Tile side the end point lies on, 0xff when inside the tile
    pub side: u8,
    pub user_id: u32,
}

impl OffMeshConnection {
    pub fn is_bidirectional(&self) -> bool {
        self.flags & DT_OFFMESH_CON_BIDIR != 0
    }
}

/// Tile header
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileHeader {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub user_id: u32,
    /// Index of the first off-mesh connection polygon
    pub off_mesh_base: u32,
    /// Size of the link pool
    pub max_link_count: u32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Scale from world units to BV tree units
    pub bv_quant_factor: f32,
}

/// Immutable content of a tile, as built or loaded from a blob
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileData {
    pub header: TileHeader,
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<Vec3>,
    /// Vertex indices then edge flags, two bits per edge
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
}

impl TileData {
    /// Serializes the tile into a `DNAV` blob
    pub fn to_bytes(&self) -> Vec<u8> {
        binary_format::encode_tile(self)
    }

    /// Parses a `DNAV` blob, rejecting wrong magic or version
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        binary_format::decode_tile(data)
    }
}

/// Tile slot of the navigation mesh
#[derive(Debug, Clone, Default)]
pub struct MeshTile {
    /// Bumped every time the slot is freed, never zero
    pub salt: u32,
    /// `None` while the slot is free
    pub header: Option<TileHeader>,
    pub polys: Vec<Poly>,
    pub verts: Vec<Vec3>,
    pub links: Vec<Link>,
    pub detail_meshes: Vec<PolyDetail>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 4]>,
    pub bv_tree: Vec<BVNode>,
    pub off_mesh_cons: Vec<OffMeshConnection>,
    links_free_list: u32,
    /// Next tile in the free list or in a position bucket
    next: Option<usize>,
}

impl MeshTile {
    pub fn is_active(&self) -> bool {
        self.header.is_some()
    }

    /// Iterates the links of `poly`
    pub fn links_of<'a>(&'a self, poly: &Poly) -> LinkIter<'a> {
        LinkIter {
            links: &self.links,
            cur: poly.first_link,
        }
    }

    /// Copies the polygon's vertex positions into `out`, returning the count.
    pub fn poly_verts(&self, poly: &Poly, out: &mut [Vec3; MAX_VERTS_PER_POLY]) -> usize {
        let nv = poly.vert_count as usize;
        for (o, &v) in out.iter_mut().zip(poly.vert_indices()) {
            *o = self.verts[v as usize];
        }
        nv
    }

    /// Number of links currently in use
    pub fn link_count(&self) -> usize {
        self.polys.iter().map(|p| self.links_of(p).count()).sum()
    }

    /// Copies the tile content out of the slot
    pub fn to_data(&self) -> Option<TileData> {
        let header = self.header.clone()?;
        Some(TileData {
            header,
            verts: self.verts.clone(),
            polys: self
                .polys
                .iter()
                .map(|p| Poly {
                    first_link: DT_NULL_LINK,
                    ..p.clone()
                })
                .collect(),
            detail_meshes: self.detail_meshes.clone(),
            detail_verts: self.detail_verts.clone(),
            detail_tris: self.detail_tris.clone(),
            bv_tree: self.bv_tree.clone(),
            off_mesh_cons: self.off_mesh_cons.clone(),
        })
    }

    fn alloc_link(&mut self) -> Option<u32> {
        if self.links_free_list == DT_NULL_LINK {
            return None;
        }
        let idx = self.links_free_list;
        self.links_free_list = self.links[idx as usize].next;
        Some(idx)
    }

    fn free_link(&mut self, idx: u32) {
        self.links[idx as usize].next = self.links_free_list;
        self.links_free_list = idx;
    }

    /// Allocates a link and prepends it to the polygon's list. Links that do
    /// not fit the pool are dropped.
    fn push_link(&mut self, poly: usize, mut link: Link) -> bool {
        let Some(idx) = self.alloc_link() else {
            return false;
        };
        link.next = self.polys[poly].first_link;
        self.links[idx as usize] = link;
        self.polys[poly].first_link = idx;
        true
    }

    fn detail_tri_vertex(&self, poly: &Poly, pd: &PolyDetail, index: u8) -> Vec3 {
        if index < poly.vert_count {
            self.verts[poly.verts[index as usize] as usize]
        } else {
            self.detail_verts[pd.vert_base as usize + (index - poly.vert_count) as usize]
        }
    }
}

/// Iterator over the link list of a polygon
pub struct LinkIter<'a> {
    links: &'a [Link],
    cur: u32,
}

impl<'a> Iterator for LinkIter<'a> {
    type Item = &'a Link;

    fn next(&mut self) -> Option<&'a Link> {
        if self.cur == DT_NULL_LINK {
            return None;
        }
        let link = self.links.get(self.cur as usize)?;
        self.cur = link.next;
        Some(link)
    }
}

/// A tiled navigation mesh
#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    tile_lut_mask: usize,
    pos_lookup: Vec<Option<usize>>,
    tiles: Vec<MeshTile>,
    next_free: Option<usize>,
}

impl NavMesh {
    /// Creates an empty mesh with `params.max_tiles` free tile slots
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.max_tiles == 0
            || params.max_tiles > PolyRef::TILE_MASK + 1
            || params.max_polys_per_tile == 0
            || params.max_polys_per_tile > PolyRef::POLY_MASK + 1
            || params.tile_width <= 0.0
            || params.tile_height <= 0.0
        {
            return Err(Status::failure(Status::INVALID_PARAM));
        }

        let lut_size = next_pow2((params.max_tiles / 4).max(1)) as usize;
        let max_tiles = params.max_tiles as usize;

        // Free list in ascending slot order.
        let mut tiles = vec![MeshTile::default(); max_tiles];
        for (i, tile) in tiles.iter_mut().enumerate() {
            tile.salt = 1;
            tile.links_free_list = DT_NULL_LINK;
            tile.next = if i + 1 < max_tiles { Some(i + 1) } else { None };
        }

        Ok(Self {
            params,
            tile_lut_mask: lut_size - 1,
            pos_lookup: vec![None; lut_size],
            tiles,
            next_free: Some(0),
        })
    }

    /// Creates a single tile mesh around one tile of data
    pub fn from_single_tile(data: TileData) -> Result<Self> {
        let h = &data.header;
        let mut mesh = Self::new(NavMeshParams {
            origin: h.bmin,
            tile_width: (h.bmax.x - h.bmin.x).max(f32::EPSILON),
            tile_height: (h.bmax.z - h.bmin.z).max(f32::EPSILON),
            max_tiles: 1,
            max_polys_per_tile: (data.polys.len() as u32).max(1),
        })?;
        mesh.add_tile(data, None)?;
        Ok(mesh)
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Tile slot `i`, live or not
    pub fn tile(&self, i: usize) -> Option<&MeshTile> {
        self.tiles.get(i)
    }

    /// Live tiles with their slot index
    pub fn tiles(&self) -> impl Iterator<Item = (usize, &MeshTile)> {
        self.tiles.iter().enumerate().filter(|(_, t)| t.is_active())
    }

    pub fn tile_count(&self) -> usize {
        self.tiles().count()
    }

    /// Grid location of the tile containing `pos`
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let tx = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let ty = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    /// Reference of polygon zero of tile slot `idx`
    pub fn get_poly_ref_base(&self, idx: usize) -> PolyRef {
        PolyRef::encode(self.tiles[idx].salt, idx as u32, 0)
    }

    pub fn get_tile_ref(&self, idx: usize) -> TileRef {
        self.get_poly_ref_base(idx)
    }

    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tile_index_at(x, y, layer).map(|i| &self.tiles[i])
    }

    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<TileRef> {
        self.tile_index_at(x, y, layer).map(|i| self.get_tile_ref(i))
    }

    /// All layers at grid location `(x, y)`
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_indices_at(x, y).into_iter().map(|i| &self.tiles[i]).collect()
    }

    /// Live tile behind `tile_ref`, if the salt still matches
    pub fn get_tile_by_ref(&self, tile_ref: TileRef) -> Option<&MeshTile> {
        let idx = tile_ref.tile_index() as usize;
        let tile = self.tiles.get(idx)?;
        (tile.is_active() && tile.salt == tile_ref.salt()).then_some(tile)
    }

    fn tile_index_at(&self, x: i32, y: i32, layer: i32) -> Option<usize> {
        let mut cur = self.pos_lookup[compute_tile_hash(x, y, self.tile_lut_mask)];
        while let Some(i) = cur {
            let tile = &self.tiles[i];
            if let Some(h) = &tile.header {
                if h.x == x && h.y == y && h.layer == layer {
                    return Some(i);
                }
            }
            cur = tile.next;
        }
        None
    }

    pub(crate) fn tile_indices_at(&self, x: i32, y: i32) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.pos_lookup[compute_tile_hash(x, y, self.tile_lut_mask)];
        while let Some(i) = cur {
            let tile = &self.tiles[i];
            if let Some(h) = &tile.header {
                if h.x == x && h.y == y {
                    out.push(i);
                }
            }
            cur = tile.next;
        }
        out
    }

    fn neighbour_tile_indices(&self, x: i32, y: i32, side: u8) -> Vec<usize> {
        let (nx, ny) = match side {
            0 => (x + 1, y),
            1 => (x + 1, y + 1),
            2 => (x, y + 1),
            3 => (x - 1, y + 1),
            4 => (x - 1, y),
            5 => (x - 1, y - 1),
            6 => (x, y - 1),
            _ => (x + 1, y - 1),
        };
        self.tile_indices_at(nx, ny)
    }

    /// Adds a tile and links it with its neighbours.
    ///
    /// When `last_ref` is given the tile is restored into that exact slot and
    /// salt, which keeps previously issued references valid.
    pub fn add_tile(&mut self, data: TileData, last_ref: Option<TileRef>) -> Result<TileRef> {
        let (x, y, layer) = (data.header.x, data.header.y, data.header.layer);
        if self.tile_index_at(x, y, layer).is_some() {
            return Err(Status::failure(Status::ALREADY_OCCUPIED));
        }
        if data.polys.len() > self.params.max_polys_per_tile as usize {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        binary_format::validate_tile(&data)?;

        let idx = match last_ref {
            None => {
                let idx = self.next_free.ok_or(Status::failure(Status::OUT_OF_MEMORY))?;
                self.next_free = self.tiles[idx].next;
                idx
            }
            Some(r) => {
                let idx = r.tile_index() as usize;
                if idx >= self.tiles.len() || r.salt() == 0 {
                    return Err(Status::failure(Status::INVALID_PARAM));
                }
                let mut prev: Option<usize> = None;
                let mut cur = self.next_free;
                while let Some(c) = cur {
                    if c == idx {
                        break;
                    }
                    prev = Some(c);
                    cur = self.tiles[c].next;
                }
                if cur != Some(idx) {
                    return Err(Status::failure(Status::OUT_OF_MEMORY));
                }
                match prev {
                    None => self.next_free = self.tiles[idx].next,
                    Some(p) => self.tiles[p].next = self.tiles[idx].next,
                }
                self.tiles[idx].salt = r.salt();
                idx
            }
        };

        let hash = compute_tile_hash(x, y, self.tile_lut_mask);
        let max_links = data.header.max_link_count;
        {
            let tile = &mut self.tiles[idx];
            tile.next = self.pos_lookup[hash];
            tile.verts = data.verts;
            tile.polys = data.polys;
            tile.detail_meshes = data.detail_meshes;
            tile.detail_verts = data.detail_verts;
            tile.detail_tris = data.detail_tris;
            tile.bv_tree = data.bv_tree;
            tile.off_mesh_cons = data.off_mesh_cons;
            tile.header = Some(data.header);
            tile.links = (0..max_links)
                .map(|i| Link {
                    next: if i + 1 < max_links { i + 1 } else { DT_NULL_LINK },
                    ..Link::default()
                })
                .collect();
            tile.links_free_list = if max_links > 0 { 0 } else { DT_NULL_LINK };
        }
        self.pos_lookup[hash] = Some(idx);

        self.connect_int_links(idx);
        self.base_off_mesh_links(idx);
        self.connect_ext_off_mesh_links(idx, idx, None);

        for j in self.tile_indices_at(x, y) {
            if j == idx {
                continue;
            }
            self.connect_ext_links(idx, j, None);
            self.connect_ext_links(j, idx, None);
            self.connect_ext_off_mesh_links(idx, j, None);
            self.connect_ext_off_mesh_links(j, idx, None);
        }

        for side in 0..8u8 {
            for j in self.neighbour_tile_indices(x, y, side) {
                self.connect_ext_links(idx, j, Some(side));
                self.connect_ext_links(j, idx, Some(opposite_tile(side)));
                self.connect_ext_off_mesh_links(idx, j, Some(side));
                self.connect_ext_off_mesh_links(j, idx, Some(opposite_tile(side)));
            }
        }

        debug!(
            "added tile ({}, {}, {}) in slot {} with {} polygons",
            x,
            y,
            layer,
            idx,
            self.tiles[idx].polys.len()
        );
        Ok(self.get_tile_ref(idx))
    }

    /// Adds a tile from a serialized blob
    pub fn add_tile_from_bytes(&mut self, data: &[u8], last_ref: Option<TileRef>) -> Result<TileRef> {
        let tile = TileData::from_bytes(data)?;
        self.add_tile(tile, last_ref)
    }

    /// Removes a tile, unlinks its neighbours and hands its data back.
    ///
    /// The slot salt is bumped so references into the removed tile stop
    /// resolving.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<TileData> {
        let idx = tile_ref.tile_index() as usize;
        let live = self
            .tiles
            .get(idx)
            .is_some_and(|t| t.is_active() && t.salt == tile_ref.salt());
        if !tile_ref.is_valid() || !live {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        let Some(data) = self.tiles[idx].to_data() else {
            return Err(Status::failure(Status::INVALID_PARAM));
        };
        let (x, y) = (data.header.x, data.header.y);

        let hash = compute_tile_hash(x, y, self.tile_lut_mask);
        let mut prev: Option<usize> = None;
        let mut cur = self.pos_lookup[hash];
        while let Some(c) = cur {
            if c == idx {
                match prev {
                    None => self.pos_lookup[hash] = self.tiles[c].next,
                    Some(p) => self.tiles[p].next = self.tiles[c].next,
                }
                break;
            }
            prev = Some(c);
            cur = self.tiles[c].next;
        }

        for j in self.tile_indices_at(x, y) {
            if j != idx {
                self.unconnect_links(j, idx);
            }
        }
        for side in 0..8u8 {
            for j in self.neighbour_tile_indices(x, y, side) {
                self.unconnect_links(j, idx);
            }
        }

        let mut salt = (self.tiles[idx].salt + 1) & PolyRef::SALT_MASK;
        if salt == 0 {
            salt = 1;
        }
        self.tiles[idx] = MeshTile {
            salt,
            links_free_list: DT_NULL_LINK,
            next: self.next_free,
            ..MeshTile::default()
        };
        self.next_free = Some(idx);

        debug!("removed tile ({}, {}) from slot {}", x, y, idx);
        Ok(data)
    }

    /// Tile slot and polygon index behind a reference
    pub(crate) fn decode_ref(&self, r: PolyRef) -> Result<(usize, usize)> {
        if !r.is_valid() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        let (salt, it, ip) = r.decode();
        let tile = self
            .tiles
            .get(it as usize)
            .ok_or(Status::failure(Status::INVALID_PARAM))?;
        if !tile.is_active() || tile.salt != salt || ip as usize >= tile.polys.len() {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        Ok((it as usize, ip as usize))
    }

    pub fn get_tile_and_poly_by_ref(&self, r: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (it, ip) = self.decode_ref(r)?;
        let tile = &self.tiles[it];
        Ok((tile, &tile.polys[ip]))
    }

    pub fn is_valid_poly_ref(&self, r: PolyRef) -> bool {
        self.decode_ref(r).is_ok()
    }

    pub fn set_poly_flags(&mut self, r: PolyRef, flags: PolyFlags) -> Result<()> {
        let (it, ip) = self.decode_ref(r)?;
        self.tiles[it].polys[ip].flags = flags;
        Ok(())
    }

    pub fn get_poly_flags(&self, r: PolyRef) -> Result<PolyFlags> {
        Ok(self.get_tile_and_poly_by_ref(r)?.1.flags)
    }

    pub fn set_poly_area(&mut self, r: PolyRef, area: u8) -> Result<()> {
        let (it, ip) = self.decode_ref(r)?;
        self.tiles[it].polys[ip].area = area;
        Ok(())
    }

    pub fn get_poly_area(&self, r: PolyRef) -> Result<u8> {
        Ok(self.get_tile_and_poly_by_ref(r)?.1.area)
    }

    /// The off-mesh connection behind an off-mesh polygon reference
    pub fn get_off_mesh_connection_by_ref(&self, r: PolyRef) -> Result<&OffMeshConnection> {
        let (it, ip) = self.decode_ref(r)?;
        let tile = &self.tiles[it];
        if tile.polys[ip].poly_type != PolyType::OffMeshConnection {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        let base = tile.header.as_ref().map_or(0, |h| h.off_mesh_base) as usize;
        tile.off_mesh_cons
            .get(ip.wrapping_sub(base))
            .ok_or(Status::failure(Status::INVALID_PARAM))
    }

    /// Start and end of an off-mesh connection as seen when entering it from
    /// `prev_ref`.
    pub fn get_off_mesh_connection_poly_end_points(&self, prev_ref: PolyRef, poly_ref: PolyRef) -> Result<(Vec3, Vec3)> {
        let (tile, poly) = self.get_tile_and_poly_by_ref(poly_ref)?;
        if poly.poly_type != PolyType::OffMeshConnection {
            return Err(Status::FAILURE);
        }

        let mut idx0 = 0;
        let mut idx1 = 1;
        for link in tile.links_of(poly) {
            if link.edge == 0 {
                if link.reference != prev_ref {
                    idx0 = 1;
                    idx1 = 0;
                }
                break;
            }
        }
        Ok((
            tile.verts[poly.verts[idx0] as usize],
            tile.verts[poly.verts[idx1] as usize],
        ))
    }

    /// Closest point on the polygon's detail surface and whether `pos` lies
    /// above or below the polygon.
    pub fn closest_point_on_poly(&self, r: PolyRef, pos: Vec3) -> Result<(Vec3, bool)> {
        let (it, ip) = self.decode_ref(r)?;
        let tile = &self.tiles[it];
        let poly = &tile.polys[ip];

        if let Some(h) = self.poly_height(tile, ip, pos) {
            return Ok((Vec3::new(pos.x, h, pos.z), true));
        }

        if poly.poly_type == PolyType::OffMeshConnection {
            let v0 = tile.verts[poly.verts[0] as usize];
            let v1 = tile.verts[poly.verts[1] as usize];
            let (_, t) = dist_pt_seg_sqr_2d(pos, v0, v1);
            return Ok((v0.lerp(v1, t), false));
        }

        Ok((self.closest_point_on_detail_edges(tile, ip, pos, true), false))
    }

    /// Height of the detail surface at `pos`, if `pos` is over the polygon.
    pub(crate) fn poly_height(&self, tile: &MeshTile, ip: usize, pos: Vec3) -> Option<f32> {
        let poly = &tile.polys[ip];
        if poly.poly_type == PolyType::OffMeshConnection {
            return None;
        }

        let mut verts = [Vec3::ZERO; MAX_VERTS_PER_POLY];
        let nv = tile.poly_verts(poly, &mut verts);
        if !point_in_polygon(pos, &verts[..nv]) {
            return None;
        }

        let pd = tile.detail_meshes.get(ip)?;
        for t in &tile.detail_tris[pd.tri_base as usize..(pd.tri_base + pd.tri_count as u32) as usize] {
            let a = tile.detail_tri_vertex(poly, pd, t[0]);
            let b = tile.detail_tri_vertex(poly, pd, t[1]);
            let c = tile.detail_tri_vertex(poly, pd, t[2]);
            if let Some(h) = closest_height_point_triangle(pos, a, b, c) {
                return Some(h);
            }
        }

        // The point sits on an edge between triangles.
        Some(self.closest_point_on_detail_edges(tile, ip, pos, false).y)
    }

    fn closest_point_on_detail_edges(&self, tile: &MeshTile, ip: usize, pos: Vec3, only_boundary: bool) -> Vec3 {
        const ANY_BOUNDARY_EDGE: u8 =
            DT_DETAIL_EDGE_BOUNDARY | (DT_DETAIL_EDGE_BOUNDARY << 2) | (DT_DETAIL_EDGE_BOUNDARY << 4);

        let poly = &tile.polys[ip];
        let Some(pd) = tile.detail_meshes.get(ip) else {
            return pos;
        };

        let mut dmin = f32::MAX;
        let mut tmin = 0.0;
        let mut pmin = pos;
        let mut pmax = pos;

        for t in &tile.detail_tris[pd.tri_base as usize..(pd.tri_base + pd.tri_count as u32) as usize] {
            if only_boundary && t[3] & ANY_BOUNDARY_EDGE == 0 {
                continue;
            }
            let v = [
                tile.detail_tri_vertex(poly, pd, t[0]),
                tile.detail_tri_vertex(poly, pd, t[1]),
                tile.detail_tri_vertex(poly, pd, t[2]),
            ];
            let mut j = 2;
            for k in 0..3 {
                let edge_flags = (t[3] >> (j * 2)) & 0x3;
                // Inner edges are visited from both triangles; keep one.
                if edge_flags & DT_DETAIL_EDGE_BOUNDARY == 0 && (only_boundary || t[j] < t[k]) {
                    j = k;
                    continue;
                }
                let (d, s) = dist_pt_seg_sqr_2d(pos, v[j], v[k]);
                if d < dmin {
                    dmin = d;
                    tmin = s;
                    pmin = v[j];
                    pmax = v[k];
                }
                j = k;
            }
        }

        pmin.lerp(pmax, tmin)
    }

    /// Polygons of tile slot `idx` whose bounds overlap the query box.
    /// Off-mesh connections are never returned.
    pub fn query_polygons_in_tile(&self, idx: usize, qmin: Vec3, qmax: Vec3) -> Vec<PolyRef> {
        let tile = &self.tiles[idx];
        let Some(header) = &tile.header else {
            return Vec::new();
        };
        let base = self.get_poly_ref_base(idx);
        let mut out = Vec::new();

        if !tile.bv_tree.is_empty() {
            let tbmin = header.bmin;
            let tbmax = header.bmax;
            let qfac = header.bv_quant_factor;
            let lo = qmin.clamp(tbmin, tbmax.max(tbmin)) - tbmin;
            let hi = qmax.clamp(tbmin, tbmax.max(tbmin)) - tbmin;
            let bmin = [
                ((qfac * lo.x) as u16) & 0xfffe,
                ((qfac * lo.y) as u16) & 0xfffe,
                ((qfac * lo.z) as u16) & 0xfffe,
            ];
            let bmax = [
                ((qfac * hi.x + 1.0) as u16) | 1,
                ((qfac * hi.y + 1.0) as u16) | 1,
                ((qfac * hi.z + 1.0) as u16) | 1,
            ];

            let mut i = 0;
            while i < tile.bv_tree.len() {
                let node = &tile.bv_tree[i];
                let overlap = overlap_quant_bounds(&bmin, &bmax, &node.bmin, &node.bmax);
                let is_leaf = node.i >= 0;
                if is_leaf && overlap {
                    out.push(base.with_poly(node.i as u32));
                }
                if overlap || is_leaf {
                    i += 1;
                } else {
                    i += (-node.i) as usize;
                }
            }
            return out;
        }

        for (i, poly) in tile.polys.iter().enumerate() {
            if poly.poly_type == PolyType::OffMeshConnection {
                continue;
            }
            let mut verts = poly.vert_indices().iter().map(|&v| tile.verts[v as usize]);
            let Some(first) = verts.next() else {
                continue;
            };
            let (bmin, bmax) = verts.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
            if overlap_bounds(qmin, qmax, bmin, bmax) {
                out.push(base.with_poly(i as u32));
            }
        }
        out
    }

    /// Nearest polygon of one tile, ignoring query filters.
    pub fn find_nearest_poly_in_tile(&self, idx: usize, center: Vec3, half_extents: Vec3) -> Option<(PolyRef, Vec3)> {
        let climb = self.tiles[idx].header.as_ref()?.walkable_climb;
        let polys = self.query_polygons_in_tile(idx, center - half_extents, center + half_extents);

        let mut nearest = None;
        let mut nearest_dist = f32::MAX;
        for r in polys {
            let Ok((closest, over_poly)) = self.closest_point_on_poly(r, center) else {
                continue;
            };
            let diff = center - closest;
            let d = if over_poly {
                // Directly above the polygon within climb height counts as on it.
                let d = diff.y.abs() - climb;
                if d > 0.0 {
                    d * d
                } else {
                    0.0
                }
            } else {
                diff.length_squared()
            };
            if d < nearest_dist {
                nearest_dist = d;
                nearest = Some((r, closest));
            }
        }
        nearest
    }

    fn connect_int_links(&mut self, idx: usize) {
        let base = self.get_poly_ref_base(idx);
        let tile = &mut self.tiles[idx];
        for i in 0..tile.polys.len() {
            tile.polys[i].first_link = DT_NULL_LINK;
            if tile.polys[i].poly_type == PolyType::OffMeshConnection {
                continue;
            }
            // Reverse order so the links read in edge order.
            let nv = tile.polys[i].vert_count as usize;
            for j in (0..nv).rev() {
                let nei = tile.polys[i].neis[j];
                if nei == 0 || nei & DT_EXT_LINK != 0 {
                    continue;
                }
                tile.push_link(
                    i,
                    Link {
                        reference: base.with_poly((nei - 1) as u32),
                        edge: j as u8,
                        ..Link::default()
                    },
                );
            }
        }
    }

    fn base_off_mesh_links(&mut self, idx: usize) {
        let base = self.get_poly_ref_base(idx);
        let Some(climb) = self.tiles[idx].header.as_ref().map(|h| h.walkable_climb) else {
            return;
        };

        for ci in 0..self.tiles[idx].off_mesh_cons.len() {
            let con = self.tiles[idx].off_mesh_cons[ci];
            let ext = Vec3::new(con.rad, climb, con.rad);
            let p = con.pos[0];
            let Some((land, nearest)) = self.find_nearest_poly_in_tile(idx, p, ext) else {
                continue;
            };
            if sqr(nearest.x - p.x) + sqr(nearest.z - p.z) > sqr(con.rad) {
                continue;
            }

            let tile = &mut self.tiles[idx];
            let v = tile.polys[con.poly as usize].verts[0] as usize;
            tile.verts[v] = nearest;

            tile.push_link(
                con.poly as usize,
                Link {
                    reference: land,
                    edge: 0,
                    ..Link::default()
                },
            );
            // The start is always linked back to the connection.
            tile.push_link(
                land.poly_index() as usize,
                Link {
                    reference: base.with_poly(con.poly as u32),
                    edge: 0xff,
                    ..Link::default()
                },
            );
        }
    }

    /// Links off-mesh connections of `target` whose end lands in `idx`.
    fn connect_ext_off_mesh_links(&mut self, idx: usize, target: usize, side: Option<u8>) {
        let opposite = side.map_or(0xff, opposite_tile);
        let target_base = self.get_poly_ref_base(target);
        let Some(climb) = self.tiles[target].header.as_ref().map(|h| h.walkable_climb) else {
            return;
        };

        for ci in 0..self.tiles[target].off_mesh_cons.len() {
            let con = self.tiles[target].off_mesh_cons[ci];
            if con.side != opposite {
                continue;
            }
            // Skip connections whose start could not be connected.
            if self.tiles[target].polys[con.poly as usize].first_link == DT_NULL_LINK {
                continue;
            }

            let ext = Vec3::new(con.rad, climb, con.rad);
            let p = con.pos[1];
            let Some((land, nearest)) = self.find_nearest_poly_in_tile(idx, p, ext) else {
                continue;
            };
            if sqr(nearest.x - p.x) + sqr(nearest.z - p.z) > sqr(con.rad) {
                continue;
            }

            {
                let tgt = &mut self.tiles[target];
                let v = tgt.polys[con.poly as usize].verts[1] as usize;
                tgt.verts[v] = nearest;
                tgt.push_link(
                    con.poly as usize,
                    Link {
                        reference: land,
                        edge: 1,
                        side: opposite,
                        ..Link::default()
                    },
                );
            }

            if con.is_bidirectional() {
                self.tiles[idx].push_link(
                    land.poly_index() as usize,
                    Link {
                        reference: target_base.with_poly(con.poly as u32),
                        edge: 0xff,
                        side: side.unwrap_or(0xff),
                        ..Link::default()
                    },
                );
            }
        }
    }

    /// Links the border portals of `idx` facing `side` to matching portals of
    /// `target`. `None` connects every side, used for layers of one cell.
    fn connect_ext_links(&mut self, idx: usize, target: usize, side: Option<u8>) {
        let mut new_links = Vec::new();
        {
            let tile = &self.tiles[idx];
            for (i, poly) in tile.polys.iter().enumerate() {
                let nv = poly.vert_count as usize;
                for j in 0..nv {
                    if poly.neis[j] & DT_EXT_LINK == 0 {
                        continue;
                    }
                    let dir = (poly.neis[j] & 0xff) as u8;
                    if side.is_some_and(|s| s != dir) {
                        continue;
                    }

                    let va = tile.verts[poly.verts[j] as usize];
                    let vb = tile.verts[poly.verts[(j + 1) % nv] as usize];
                    for (nei, area) in self.find_connecting_polys(va, vb, target, opposite_tile(dir), 4) {
                        let mut link = Link {
                            reference: nei,
                            edge: j as u8,
                            side: dir,
                            ..Link::default()
                        };
                        // Portal limits along the edge, compressed to a byte.
                        let span = match dir {
                            0 | 4 => Some((va.z, vb.z)),
                            2 | 6 => Some((va.x, vb.x)),
                            _ => None,
                        };
                        if let Some((a, b)) = span {
                            let mut tmin = (area[0] - a) / (b - a);
                            let mut tmax = (area[1] - a) / (b - a);
                            if tmin > tmax {
                                std::mem::swap(&mut tmin, &mut tmax);
                            }
                            link.bmin = (tmin.clamp(0.0, 1.0) * 255.0).round() as u8;
                            link.bmax = (tmax.clamp(0.0, 1.0) * 255.0).round() as u8;
                        }
                        new_links.push((i, link));
                    }
                }
            }
        }

        let tile = &mut self.tiles[idx];
        for (i, link) in new_links {
            tile.push_link(i, link);
        }
    }

    /// Polygons of `target` with a portal on `side` that overlaps the edge
    /// `va vb`, with the overlapping interval along the edge.
    fn find_connecting_polys(&self, va: Vec3, vb: Vec3, target: usize, side: u8, max: usize) -> Vec<(PolyRef, [f32; 2])> {
        let tile = &self.tiles[target];
        let Some(header) = &tile.header else {
            return Vec::new();
        };
        let base = self.get_poly_ref_base(target);

        let (amin, amax) = calc_slab_end_points(va, vb, side);
        let apos = get_slab_coord(va, side);
        let m = DT_EXT_LINK | side as u16;

        let mut out = Vec::new();
        for (i, poly) in tile.polys.iter().enumerate() {
            let nv = poly.vert_count as usize;
            for j in 0..nv {
                if poly.neis[j] != m {
                    continue;
                }
                let vc = tile.verts[poly.verts[j] as usize];
                let vd = tile.verts[poly.verts[(j + 1) % nv] as usize];
                let bpos = get_slab_coord(vc, side);
                if (apos - bpos).abs() > 0.01 {
                    continue;
                }
                let (bmin, bmax) = calc_slab_end_points(vc, vd, side);
                if !overlap_slabs(amin, amax, bmin, bmax, 0.01, header.walkable_climb) {
                    continue;
                }
                if out.len() < max {
                    out.push((base.with_poly(i as u32), [amin[0].max(bmin[0]), amax[0].min(bmax[0])]));
                }
                break;
            }
        }
        out
    }

    /// Removes every link of `idx` pointing into tile slot `target`.
    fn unconnect_links(&mut self, idx: usize, target: usize) {
        let tile = &mut self.tiles[idx];
        for i in 0..tile.polys.len() {
            let mut j = tile.polys[i].first_link;
            let mut pj = DT_NULL_LINK;
            while j != DT_NULL_LINK {
                let link = tile.links[j as usize];
                if link.reference.tile_index() as usize == target {
                    if pj == DT_NULL_LINK {
                        tile.polys[i].first_link = link.next;
                    } else {
                        tile.links[pj as usize].next = link.next;
                    }
                    tile.free_link(j);
                    j = link.next;
                } else {
                    pj = j;
                    j = link.next;
                }
            }
        }
    }
}

fn compute_tile_hash(x: i32, y: i32, mask: usize) -> usize {
    const H1: u32 = 0x8da6_b343;
    const H2: u32 = 0xd816_3841;
    let n = H1.wrapping_mul(x as u32).wrapping_add(H2.wrapping_mul(y as u32));
    n as usize & mask
}

fn get_slab_coord(v: Vec3, side: u8) -> f32 {
    match side {
        0 | 4 => v.x,
        2 | 6 => v.z,
        _ => 0.0,
    }
}

/// Edge end points projected on the tile border plane as `[along, height]`,
/// ordered along the border.
fn calc_slab_end_points(va: Vec3, vb: Vec3, side: u8) -> ([f32; 2], [f32; 2]) {
    match side {
        0 | 4 => {
            if va.z < vb.z {
                ([va.z, va.y], [vb.z, vb.y])
            } else {
                ([vb.z, vb.y], [va.z, va.y])
            }
        }
        2 | 6 => {
            if va.x < vb.x {
                ([va.x, va.y], [vb.x, vb.y])
            } else {
                ([vb.x, vb.y], [va.x, va.y])
            }
        }
        _ => ([0.0; 2], [0.0; 2]),
    }
}

/// Two border segments overlap when their ranges along the border overlap
/// and they cross or stay within `py` of each other vertically.
fn overlap_slabs(amin: [f32; 2], amax: [f32; 2], bmin: [f32; 2], bmax: [f32; 2], px: f32, py: f32) -> bool {
    let minx = (amin[0] + px).max(bmin[0] + px);
    let maxx = (amax[0] - px).min(bmax[0] - px);
    if minx > maxx {
        return false;
    }

    let ad = (amax[1] - amin[1]) / (amax[0] - amin[0]);
    let ak = amin[1] - ad * amin[0];
    let bd = (bmax[1] - bmin[1]) / (bmax[0] - bmin[0]);
    let bk = bmin[1] - bd * bmin[0];
    let aminy = ad * minx + ak;
    let amaxy = ad * maxx + ak;
    let bminy = bd * minx + bk;
    let bmaxy = bd * maxx + bk;
    let dmin = bminy - aminy;
    let dmax = bmaxy - amaxy;

    if dmin * dmax < 0.0 {
        return true;
    }
    let thr = sqr(py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}
