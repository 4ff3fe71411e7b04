//! Polygon mesh generation for Recast
//!
//! Turns a contour set into a mesh of convex polygons with shared, welded
//! vertices and per-edge adjacency.

use glam::Vec3;
use log::{debug, warn};
use recast_common::{Error, Result};

use crate::contour::{ContourSet, RC_BORDER_VERTEX};

/// Vertex bucket count for spatial hashing
const VERTEX_BUCKET_COUNT: usize = 1 << 12;

/// Upper bound on vertices per polygon accepted by the mesh builder
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Null index for polygon vertices and neighbours
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Region id given to polygons merged across region boundaries
pub const RC_MULTIPLE_REGS: u16 = 0;

/// Neighbour flag marking an edge on the tile border; the low bits hold the side
pub const RC_PORTAL_FLAG: u16 = 0x8000;

/// Marks an index as the middle vertex of a valid ear during triangulation
const EAR_FLAG: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// A polygon mesh.
///
/// `polys` holds `2 * nvp` entries per polygon: the vertex indices padded with
/// `MESH_NULL_IDX`, then one neighbour per edge. A neighbour with
/// `RC_PORTAL_FLAG` set is a tile border portal.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyMesh {
    /// Vertices as `[x, y, z]` triplets in voxel units
    pub verts: Vec<u16>,
    pub polys: Vec<u16>,
    pub regs: Vec<u16>,
    pub areas: Vec<u8>,
    /// User flags, zeroed by the builder
    pub flags: Vec<u16>,
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub border_size: i32,
    pub max_edge_error: f32,
}

/// Edge between two polygons found while computing adjacency
#[derive(Debug, Clone, Copy)]
struct IndexedEdge {
    vert: [u16; 2],
    poly_edge: [u16; 2],
    poly: [u16; 2],
}

/// Boundary edge of the hole left behind by a removed vertex
#[derive(Debug, Clone, Copy)]
struct IndexedRegionEdge {
    a: u16,
    b: u16,
    reg: u16,
    area: u8,
}

impl PolyMesh {
    /// Creates an empty mesh
    pub fn new(nvp: usize) -> Self {
        Self {
            nvp,
            ..Default::default()
        }
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len() / 3
    }

    pub fn poly_count(&self) -> usize {
        if self.nvp == 0 {
            0
        } else {
            self.polys.len() / (self.nvp * 2)
        }
    }

    /// Vertex `i` as `[x, y, z]`
    pub fn vert(&self, i: usize) -> [u16; 3] {
        [self.verts[i * 3], self.verts[i * 3 + 1], self.verts[i * 3 + 2]]
    }

    /// The `2 * nvp` entries of polygon `i`
    pub fn poly(&self, i: usize) -> &[u16] {
        &self.polys[i * self.nvp * 2..(i + 1) * self.nvp * 2]
    }

    /// Vertex indices of polygon `i`, without padding
    pub fn poly_verts(&self, i: usize) -> &[u16] {
        let p = self.poly(i);
        &p[..count_poly_verts(p, self.nvp)]
    }

    /// Neighbour entries of polygon `i`, one per vertex slot
    pub fn poly_neighbours(&self, i: usize) -> &[u16] {
        &self.poly(i)[self.nvp..]
    }

    /// Builds a polygon mesh from `cset` with at most `nvp` vertices per polygon.
    pub fn build(cset: &ContourSet, nvp: usize) -> Result<Self> {
        if !(3..=MAX_VERTS_PER_POLY).contains(&nvp) {
            return Err(Error::NavMeshGeneration(format!(
                "vertices per polygon must be in 3..={}, got {}",
                MAX_VERTS_PER_POLY, nvp
            )));
        }

        let mut mesh = PolyMesh {
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
            ..Default::default()
        };

        let max_vertices: usize = cset
            .contours
            .iter()
            .filter(|c| c.verts.len() >= 3)
            .map(|c| c.verts.len())
            .sum();
        if max_vertices >= 0xfffe {
            return Err(Error::NavMeshGeneration(format!(
                "too many vertices {}",
                max_vertices
            )));
        }

        let mut vflags: Vec<bool> = Vec::with_capacity(max_vertices);
        let mut welder = VertexWelder::new(max_vertices);

        for contour in &cset.contours {
            if contour.verts.len() < 3 {
                continue;
            }

            let tverts: Vec<[i32; 3]> = contour.verts.iter().map(|v| [v.x, v.y, v.z]).collect();
            let (tris, complete) = triangulate(&tverts);
            if !complete {
                warn!(
                    "bad triangulation of contour for region {}, {} triangles kept",
                    contour.reg,
                    tris.len()
                );
            }

            let indices: Vec<u16> = contour
                .verts
                .iter()
                .map(|v| {
                    let idx = welder.add_vertex(&mut mesh.verts, v.x as u16, v.y as u16, v.z as u16);
                    if idx as usize >= vflags.len() {
                        vflags.resize(idx as usize + 1, false);
                    }
                    if v.flags & RC_BORDER_VERTEX != 0 {
                        vflags[idx as usize] = true;
                    }
                    idx
                })
                .collect();

            let mut polys: Vec<u16> = Vec::with_capacity(tris.len() * nvp);
            for t in &tris {
                if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                    let start = polys.len();
                    polys.resize(start + nvp, MESH_NULL_IDX);
                    polys[start] = indices[t[0]];
                    polys[start + 1] = indices[t[1]];
                    polys[start + 2] = indices[t[2]];
                }
            }
            if polys.is_empty() {
                continue;
            }

            if nvp > 3 {
                merge_polys(&mut polys, None, &mesh.verts, nvp);
            }

            for q in polys.chunks(nvp) {
                mesh.polys.extend_from_slice(q);
                mesh.polys.extend(std::iter::repeat(MESH_NULL_IDX).take(nvp));
                mesh.regs.push(contour.reg);
                mesh.areas.push(contour.area);
            }
        }

        // Remove vertices sitting on tile border corners.
        let mut i = 0;
        while i < mesh.vert_count() {
            if vflags.get(i).copied().unwrap_or(false) {
                if !mesh.can_remove_vertex(i as u16) {
                    i += 1;
                    continue;
                }
                if mesh.remove_vertex(i as u16)? {
                    vflags.remove(i);
                    continue;
                }
            }
            i += 1;
        }

        mesh.build_adjacency();

        if mesh.border_size > 0 {
            mesh.mark_portal_edges(cset.width, cset.height);
        }

        mesh.flags = vec![0; mesh.poly_count()];

        if mesh.vert_count() > 0xffff {
            return Err(Error::NavMeshGeneration(format!(
                "too many vertices {} (max 65535)",
                mesh.vert_count()
            )));
        }
        if mesh.poly_count() > 0xffff {
            return Err(Error::NavMeshGeneration(format!(
                "too many polygons {} (max 65535)",
                mesh.poly_count()
            )));
        }

        debug!(
            "poly mesh built: {} polygons, {} vertices",
            mesh.poly_count(),
            mesh.vert_count()
        );
        Ok(mesh)
    }

    /// Number of edges not shared with another polygon and not on the tile border.
    pub fn open_edge_count(&self) -> usize {
        (0..self.poly_count())
            .map(|i| {
                let nv = self.poly_verts(i).len();
                self.poly_neighbours(i)[..nv]
                    .iter()
                    .filter(|&&n| n == MESH_NULL_IDX)
                    .count()
            })
            .sum()
    }

    fn can_remove_vertex(&self, rem: u16) -> bool {
        let nvp = self.nvp;

        let mut num_touched_verts = 0;
        let mut num_remaining_edges = 0;
        for i in 0..self.poly_count() {
            let p = self.poly_verts(i);
            let num_removed = p.iter().filter(|&&v| v == rem).count();
            if num_removed > 0 {
                num_touched_verts += num_removed;
                num_remaining_edges += p.len() - (num_removed + 1);
            }
        }

        // Removing the vertex would leave a degenerate hole.
        if num_remaining_edges <= 2 {
            return false;
        }

        // Edges sharing the removed vertex, with their use counts.
        let mut edges: Vec<(u16, u32)> = Vec::with_capacity(num_touched_verts * 2);
        for i in 0..self.poly_count() {
            let p = &self.poly(i)[..nvp];
            let nv = count_poly_verts(p, nvp);
            let mut k = nv - 1;
            for j in 0..nv {
                if p[j] == rem || p[k] == rem {
                    let other = if p[k] == rem { p[j] } else { p[k] };
                    match edges.iter_mut().find(|e| e.0 == other) {
                        Some(e) => e.1 += 1,
                        None => edges.push((other, 1)),
                    }
                }
                k = j;
            }
        }

        // More than two open edges means the vertex connects separate fans.
        let num_open_edges = edges.iter().filter(|e| e.1 < 2).count();
        num_open_edges <= 2
    }

    /// Removes vertex `rem` and retriangulates the hole. Returns `Ok(false)`
    /// without touching the mesh when the hole boundary does not close.
    fn remove_vertex(&mut self, rem: u16) -> Result<bool> {
        let nvp = self.nvp;

        let mut edges: Vec<IndexedRegionEdge> = Vec::new();
        let mut touched: Vec<usize> = Vec::new();
        for i in 0..self.poly_count() {
            let p = self.poly_verts(i);
            if !p.contains(&rem) {
                continue;
            }
            let nv = p.len();
            let mut k = nv - 1;
            for j in 0..nv {
                if p[j] != rem && p[k] != rem {
                    edges.push(IndexedRegionEdge {
                        a: p[k],
                        b: p[j],
                        reg: self.regs[i],
                        area: self.areas[i],
                    });
                }
                k = j;
            }
            touched.push(i);
        }

        // Chain the boundary edges into a single hole outline.
        let mut hole: std::collections::VecDeque<IndexedRegionEdge> = std::collections::VecDeque::new();
        if let Some(first) = edges.first().copied() {
            edges.swap_remove(0);
            hole.push_back(first);
            let mut head = first.a;
            let mut tail = first.b;
            while !edges.is_empty() {
                let mut matched = false;
                let mut i = 0;
                while i < edges.len() {
                    let e = edges[i];
                    if e.b == head {
                        hole.push_front(e);
                        head = e.a;
                    } else if e.a == tail {
                        hole.push_back(e);
                        tail = e.b;
                    } else {
                        i += 1;
                        continue;
                    }
                    edges.swap_remove(i);
                    matched = true;
                }
                if !matched {
                    break;
                }
            }
        }
        if !edges.is_empty() {
            warn!(
                "hole boundary around vertex {} does not close, {} edges left",
                rem,
                edges.len()
            );
            return Ok(false);
        }

        // Drop the polygons around the vertex, last first so indices stay valid.
        for &i in touched.iter().rev() {
            let stride = nvp * 2;
            let last = self.poly_count() - 1;
            if i != last {
                let (head, tail) = self.polys.split_at_mut(last * stride);
                head[i * stride..(i + 1) * stride].copy_from_slice(&tail[..stride]);
                self.regs[i] = self.regs[last];
                self.areas[i] = self.areas[last];
            }
            self.polys.truncate(last * stride);
            self.regs.truncate(last);
            self.areas.truncate(last);
        }

        // Remove the vertex and shift indices above it.
        let r = rem as usize;
        self.verts.drain(r * 3..r * 3 + 3);
        for i in 0..self.poly_count() {
            let base = i * nvp * 2;
            for j in 0..nvp {
                let v = &mut self.polys[base + j];
                if *v == MESH_NULL_IDX {
                    break;
                }
                if *v > rem {
                    *v -= 1;
                }
            }
        }
        let fix = |v: u16| if v > rem { v - 1 } else { v };
        let hole_verts: Vec<u16> = hole.iter().map(|e| fix(e.a)).collect();
        let hole_regs: Vec<u16> = hole.iter().map(|e| e.reg).collect();
        let hole_areas: Vec<u8> = hole.iter().map(|e| e.area).collect();
        if hole_verts.is_empty() {
            return Ok(true);
        }

        let tverts: Vec<[i32; 3]> = hole_verts
            .iter()
            .map(|&v| {
                let p = self.vert(v as usize);
                [p[0] as i32, p[1] as i32, p[2] as i32]
            })
            .collect();
        let (tris, complete) = triangulate(&tverts);
        if !complete {
            warn!("bad triangulation of hole around vertex {}", rem);
        }

        let mut polys: Vec<u16> = Vec::with_capacity((tris.len() + 1) * nvp);
        let mut pregs: Vec<u16> = Vec::with_capacity(tris.len());
        let mut pareas: Vec<u8> = Vec::with_capacity(tris.len());
        for t in &tris {
            if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                let start = polys.len();
                polys.resize(start + nvp, MESH_NULL_IDX);
                polys[start] = hole_verts[t[0]];
                polys[start + 1] = hole_verts[t[1]];
                polys[start + 2] = hole_verts[t[2]];
                if hole_regs[t[0]] != hole_regs[t[1]] || hole_regs[t[1]] != hole_regs[t[2]] {
                    pregs.push(RC_MULTIPLE_REGS);
                } else {
                    pregs.push(hole_regs[t[0]]);
                }
                pareas.push(hole_areas[t[0]]);
            }
        }
        if polys.is_empty() {
            return Ok(true);
        }

        if nvp > 3 {
            merge_polys(&mut polys, Some((&mut pregs, &mut pareas)), &self.verts, nvp);
        }

        for (i, q) in polys.chunks(nvp).enumerate() {
            self.polys.extend_from_slice(q);
            self.polys.extend(std::iter::repeat(MESH_NULL_IDX).take(nvp));
            self.regs.push(pregs[i]);
            self.areas.push(pareas[i]);
        }

        Ok(true)
    }

    /// Fills in the neighbour half of every polygon.
    fn build_adjacency(&mut self) {
        let nvp = self.nvp;
        let npolys = self.poly_count();
        let nverts = self.vert_count();

        let mut first_edge = vec![MESH_NULL_IDX as u32; nverts];
        let mut next_edge: Vec<u32> = Vec::with_capacity(npolys * nvp);
        let mut edges: Vec<IndexedEdge> = Vec::with_capacity(npolys * nvp);

        for i in 0..npolys {
            let t = &self.polys[i * nvp * 2..i * nvp * 2 + nvp];
            let nv = count_poly_verts(t, nvp);
            for j in 0..nv {
                let v0 = t[j];
                let v1 = t[(j + 1) % nv];
                if v0 < v1 {
                    next_edge.push(first_edge[v0 as usize]);
                    first_edge[v0 as usize] = edges.len() as u32;
                    edges.push(IndexedEdge {
                        vert: [v0, v1],
                        poly: [i as u16, i as u16],
                        poly_edge: [j as u16, 0],
                    });
                }
            }
        }

        for i in 0..npolys {
            let t = &self.polys[i * nvp * 2..i * nvp * 2 + nvp];
            let nv = count_poly_verts(t, nvp);
            for j in 0..nv {
                let v0 = t[j];
                let v1 = t[(j + 1) % nv];
                if v0 > v1 {
                    let mut e = first_edge[v1 as usize];
                    while e != MESH_NULL_IDX as u32 {
                        let edge = &mut edges[e as usize];
                        if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                            edge.poly[1] = i as u16;
                            edge.poly_edge[1] = j as u16;
                            break;
                        }
                        e = next_edge[e as usize];
                    }
                }
            }
        }

        for e in &edges {
            if e.poly[0] != e.poly[1] {
                let p0 = e.poly[0] as usize;
                let p1 = e.poly[1] as usize;
                self.polys[p0 * nvp * 2 + nvp + e.poly_edge[0] as usize] = e.poly[1];
                self.polys[p1 * nvp * 2 + nvp + e.poly_edge[1] as usize] = e.poly[0];
            }
        }
    }

    /// Flags unconnected edges lying on the tile border as portals.
    fn mark_portal_edges(&mut self, w: i32, h: i32) {
        let nvp = self.nvp;
        let (w, h) = (w as u16, h as u16);
        for i in 0..self.poly_count() {
            let base = i * nvp * 2;
            let nv = count_poly_verts(&self.polys[base..base + nvp], nvp);
            for j in 0..nv {
                if self.polys[base + nvp + j] != MESH_NULL_IDX {
                    continue;
                }
                let va = self.vert(self.polys[base + j] as usize);
                let vb = self.vert(self.polys[base + (j + 1) % nv] as usize);
                let side = if va[0] == 0 && vb[0] == 0 {
                    Some(0)
                } else if va[2] == h && vb[2] == h {
                    Some(1)
                } else if va[0] == w && vb[0] == w {
                    Some(2)
                } else if va[2] == 0 && vb[2] == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polys[base + nvp + j] = RC_PORTAL_FLAG | side;
                }
            }
        }
    }
}

/// Number of used vertex slots in a polygon
pub fn count_poly_verts(p: &[u16], nvp: usize) -> usize {
    p.iter().take(nvp).position(|&v| v == MESH_NULL_IDX).unwrap_or(nvp)
}

/// Spatial hash welding vertices closer than two height units.
struct VertexWelder {
    first: Vec<i32>,
    next: Vec<i32>,
}

impl VertexWelder {
    fn new(capacity: usize) -> Self {
        Self {
            first: vec![-1; VERTEX_BUCKET_COUNT],
            next: Vec::with_capacity(capacity),
        }
    }

    fn bucket(x: u16, z: u16) -> usize {
        const H1: u32 = 0x8da6_b343;
        const H3: u32 = 0xcb1a_b31f;
        let n = H1.wrapping_mul(x as u32).wrapping_add(H3.wrapping_mul(z as u32));
        (n & (VERTEX_BUCKET_COUNT as u32 - 1)) as usize
    }

    fn add_vertex(&mut self, verts: &mut Vec<u16>, x: u16, y: u16, z: u16) -> u16 {
        let bucket = Self::bucket(x, z);
        let mut i = self.first[bucket];
        while i != -1 {
            let v = &verts[i as usize * 3..i as usize * 3 + 3];
            if v[0] == x && (v[1] as i32 - y as i32).abs() <= 2 && v[2] == z {
                return i as u16;
            }
            i = self.next[i as usize];
        }

        let idx = verts.len() / 3;
        verts.extend_from_slice(&[x, y, z]);
        self.next.push(self.first[bucket]);
        self.first[bucket] = idx as i32;
        idx as u16
    }
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i >= 1 {
        i - 1
    } else {
        n - 1
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 < n {
        i + 1
    } else {
        0
    }
}

#[inline]
fn area2(a: &[i32; 3], b: &[i32; 3], c: &[i32; 3]) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

#[inline]
fn left(a: &[i32; 3], b: &[i32; 3], c: &[i32; 3]) -> bool {
    area2(a, b, c) < 0
}

#[inline]
fn left_on(a: &[i32; 3], b: &[i32; 3], c: &[i32; 3]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
fn collinear(a: &[i32; 3], b: &[i32; 3], c: &[i32; 3]) -> bool {
    area2(a, b, c) == 0
}

#[inline]
fn vequal(a: &[i32; 3], b: &[i32; 3]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

fn intersect_prop(a: &[i32; 3], b: &[i32; 3], c: &[i32; 3], d: &[i32; 3]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

fn between(a: &[i32; 3], b: &[i32; 3], c: &[i32; 3]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

fn intersect(a: &[i32; 3], b: &[i32; 3], c: &[i32; 3], d: &[i32; 3]) -> bool {
    intersect_prop(a, b, c, d) || between(a, b, c) || between(a, b, d) || between(c, d, a) || between(c, d, b)
}

/// Polygon under triangulation: vertex positions plus the live index ring.
struct EarClipper<'a> {
    verts: &'a [[i32; 3]],
    indices: Vec<u32>,
}

impl EarClipper<'_> {
    #[inline]
    fn v(&self, i: usize) -> &[i32; 3] {
        &self.verts[(self.indices[i] & INDEX_MASK) as usize]
    }

    #[inline]
    fn is_ear(&self, i: usize) -> bool {
        self.indices[i] & EAR_FLAG != 0
    }

    fn set_ear(&mut self, i: usize, ear: bool) {
        if ear {
            self.indices[i] |= EAR_FLAG;
        } else {
            self.indices[i] &= INDEX_MASK;
        }
    }

    /// True when no polygon edge properly crosses or touches diagonal `(i, j)`.
    fn diagonalie(&self, i: usize, j: usize) -> bool {
        self.diagonal_clear(i, j, intersect)
    }

    /// Like `diagonalie` but tolerates edges touching the diagonal.
    fn diagonalie_loose(&self, i: usize, j: usize) -> bool {
        self.diagonal_clear(i, j, intersect_prop)
    }

    fn diagonal_clear(&self, i: usize, j: usize, test: fn(&[i32; 3], &[i32; 3], &[i32; 3], &[i32; 3]) -> bool) -> bool {
        let n = self.indices.len();
        let d0 = self.v(i);
        let d1 = self.v(j);
        for k in 0..n {
            let k1 = next(k, n);
            if k == i || k1 == i || k == j || k1 == j {
                continue;
            }
            let p0 = self.v(k);
            let p1 = self.v(k1);
            if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
                continue;
            }
            if test(d0, d1, p0, p1) {
                return false;
            }
        }
        true
    }

    /// True when diagonal `(i, j)` leaves vertex `i` through its interior angle.
    fn in_cone(&self, i: usize, j: usize) -> bool {
        let n = self.indices.len();
        let pi = self.v(i);
        let pj = self.v(j);
        let pi1 = self.v(next(i, n));
        let pin1 = self.v(prev(i, n));
        if left_on(pin1, pi, pi1) {
            return left(pi, pj, pin1) && left(pj, pi, pi1);
        }
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }

    /// Like `in_cone` but accepts diagonals collinear with the adjacent edges.
    fn in_cone_loose(&self, i: usize, j: usize) -> bool {
        let n = self.indices.len();
        let pi = self.v(i);
        let pj = self.v(j);
        let pi1 = self.v(next(i, n));
        let pin1 = self.v(prev(i, n));
        if left_on(pin1, pi, pi1) {
            return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
        }
        !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
    }

    fn diagonal(&self, i: usize, j: usize) -> bool {
        self.in_cone(i, j) && self.diagonalie(i, j)
    }

    fn diagonal_loose(&self, i: usize, j: usize) -> bool {
        self.in_cone_loose(i, j) && self.diagonalie_loose(i, j)
    }

    fn len_sqr_2d(&self, a: usize, b: usize) -> i32 {
        let p0 = self.v(a);
        let p1 = self.v(b);
        let dx = p1[0] - p0[0];
        let dz = p1[2] - p0[2];
        dx * dx + dz * dz
    }
}

/// Ear-clips a simple polygon, always taking the ear with the shortest
/// diagonal. The loose tests are only tried when the strict pass finds no
/// ear. Returns the triangles as indices into `verts` and whether the
/// polygon was fully triangulated.
fn triangulate(verts: &[[i32; 3]]) -> (Vec<[usize; 3]>, bool) {
    let n = verts.len();
    let mut tris = Vec::with_capacity(n.saturating_sub(2));
    if n < 3 {
        return (tris, false);
    }

    let mut poly = EarClipper {
        verts,
        indices: (0..n as u32).collect(),
    };

    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if poly.diagonal(i, i2) {
            poly.set_ear(i1, true);
        }
    }

    while poly.indices.len() > 3 {
        let n = poly.indices.len();
        let mut min_len = -1;
        let mut mini = None;
        for i in 0..n {
            let i1 = next(i, n);
            if poly.is_ear(i1) {
                let len = poly.len_sqr_2d(i, next(i1, n));
                if min_len < 0 || len < min_len {
                    min_len = len;
                    mini = Some(i);
                }
            }
        }

        if mini.is_none() {
            // Overlapping segments near duplicate vertices; retry with loose tests.
            min_len = -1;
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if poly.diagonal_loose(i, i2) {
                    let len = poly.len_sqr_2d(i, next(i2, n));
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        mini = Some(i);
                    }
                }
            }
        }

        let Some(i) = mini else {
            return (tris, false);
        };

        let i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push([
            (poly.indices[i] & INDEX_MASK) as usize,
            (poly.indices[i1] & INDEX_MASK) as usize,
            (poly.indices[i2] & INDEX_MASK) as usize,
        ]);

        poly.indices.remove(i1);
        let n = poly.indices.len();
        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);

        let ear = poly.diagonal(prev(i, n), i1);
        poly.set_ear(i, ear);
        let ear = poly.diagonal(i, next(i1, n));
        poly.set_ear(i1, ear);
    }

    tris.push([
        (poly.indices[0] & INDEX_MASK) as usize,
        (poly.indices[1] & INDEX_MASK) as usize,
        (poly.indices[2] & INDEX_MASK) as usize,
    ]);
    (tris, true)
}

#[inline]
fn uleft(verts: &[u16], a: u16, b: u16, c: u16) -> bool {
    let (a, b, c) = (a as usize * 3, b as usize * 3, c as usize * 3);
    (verts[b] as i32 - verts[a] as i32) * (verts[c + 2] as i32 - verts[a + 2] as i32)
        - (verts[c] as i32 - verts[a] as i32) * (verts[b + 2] as i32 - verts[a + 2] as i32)
        < 0
}

/// Returns the squared length of the shared edge when `pa` and `pb` can be
/// merged into a convex polygon, with the shared edge index in each.
fn get_poly_merge_value(pa: &[u16], pb: &[u16], verts: &[u16], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa, nvp);
    let nb = count_poly_verts(pb, nvp);

    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let mut va0 = pa[i];
        let mut va1 = pa[(i + 1) % na];
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let mut vb0 = pb[j];
            let mut vb1 = pb[(j + 1) % nb];
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    // The merged polygon must stay convex at both ends of the shared edge.
    if !uleft(verts, pa[(ea + na - 1) % na], pa[ea], pb[(eb + 2) % nb]) {
        return None;
    }
    if !uleft(verts, pb[(eb + nb - 1) % nb], pb[eb], pa[(ea + 2) % na]) {
        return None;
    }

    let va = pa[ea] as usize * 3;
    let vb = pa[(ea + 1) % na] as usize * 3;
    let dx = verts[va] as i32 - verts[vb] as i32;
    let dz = verts[va + 2] as i32 - verts[vb + 2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_poly_verts(pa: &[u16], pb: &[u16], ea: usize, eb: usize, nvp: usize) -> Vec<u16> {
    let na = count_poly_verts(pa, nvp);
    let nb = count_poly_verts(pb, nvp);
    let mut tmp = vec![MESH_NULL_IDX; nvp];
    let mut n = 0;
    for i in 0..na - 1 {
        tmp[n] = pa[(ea + 1 + i) % na];
        n += 1;
    }
    for i in 0..nb - 1 {
        tmp[n] = pb[(eb + 1 + i) % nb];
        n += 1;
    }
    tmp
}

/// Greedily merges polygons (stored `nvp` entries each) across their longest
/// shared edge until no merge keeps them convex. Optional per-polygon region
/// and area arrays are kept in step.
fn merge_polys(polys: &mut Vec<u16>, mut attrs: Option<(&mut Vec<u16>, &mut Vec<u8>)>, verts: &[u16], nvp: usize) {
    loop {
        let npolys = polys.len() / nvp;
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..npolys.saturating_sub(1) {
            let pj = &polys[j * nvp..(j + 1) * nvp];
            for k in j + 1..npolys {
                let pk = &polys[k * nvp..(k + 1) * nvp];
                if let Some((v, ea, eb)) = get_poly_merge_value(pj, pk, verts, nvp) {
                    if best.map_or(true, |b| v > b.0) {
                        best = Some((v, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };

        let merged = merge_poly_verts(
            &polys[pa * nvp..(pa + 1) * nvp],
            &polys[pb * nvp..(pb + 1) * nvp],
            ea,
            eb,
            nvp,
        );
        polys[pa * nvp..(pa + 1) * nvp].copy_from_slice(&merged);

        let last = npolys - 1;
        if pb != last {
            polys.copy_within(last * nvp..(last + 1) * nvp, pb * nvp);
        }
        polys.truncate(last * nvp);

        if let Some((regs, areas)) = attrs.as_mut() {
            if regs[pa] != regs[pb] {
                regs[pa] = RC_MULTIPLE_REGS;
            }
            regs.swap_remove(pb);
            areas.swap_remove(pb);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{Contour, ContourVertex};

    fn square_contour(x0: i32, z0: i32, size: i32, reg: u16) -> Contour {
        // Contours wind clockwise when viewed from above (+y).
        let verts = vec![
            ContourVertex { x: x0, y: 0, z: z0, flags: 0 },
            ContourVertex { x: x0, y: 0, z: z0 + size, flags: 0 },
            ContourVertex { x: x0 + size, y: 0, z: z0 + size, flags: 0 },
            ContourVertex { x: x0 + size, y: 0, z: z0, flags: 0 },
        ];
        Contour {
            raw_verts: verts.clone(),
            verts,
            reg,
            area: 63,
        }
    }

    fn cset(contours: Vec<Contour>) -> ContourSet {
        ContourSet {
            contours,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(10.0, 10.0, 10.0),
            cs: 1.0,
            ch: 1.0,
            width: 10,
            height: 10,
            border_size: 0,
            max_error: 1.3,
        }
    }

    #[test]
    fn test_triangulate_square() {
        let verts = [[0, 0, 0], [0, 0, 4], [4, 0, 4], [4, 0, 0]];
        let (tris, complete) = triangulate(&verts);
        assert!(complete);
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn test_triangulate_concave() {
        // L shape
        let verts = [[0, 0, 0], [0, 0, 4], [2, 0, 4], [2, 0, 2], [4, 0, 2], [4, 0, 0]];
        let (tris, complete) = triangulate(&verts);
        assert!(complete);
        assert_eq!(tris.len(), 4);
    }

    #[test]
    fn test_square_becomes_single_quad() {
        let mesh = PolyMesh::build(&cset(vec![square_contour(0, 0, 4, 1)]), 6).unwrap();
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(mesh.vert_count(), 4);
        assert_eq!(mesh.poly_verts(0).len(), 4);
        assert_eq!(mesh.regs[0], 1);
        assert_eq!(mesh.flags, vec![0]);
    }

    #[test]
    fn test_triangles_only_with_nvp_three() {
        let mesh = PolyMesh::build(&cset(vec![square_contour(0, 0, 4, 1)]), 3).unwrap();
        assert_eq!(mesh.poly_count(), 2);
        // The two triangles share the diagonal.
        assert_eq!(mesh.open_edge_count(), 4);
        let n0 = mesh.poly_neighbours(0);
        assert!(n0[..3].contains(&1));
    }

    #[test]
    fn test_adjacent_contours_are_welded() {
        let mesh = PolyMesh::build(
            &cset(vec![square_contour(0, 0, 4, 1), square_contour(4, 0, 4, 2)]),
            6,
        )
        .unwrap();
        assert_eq!(mesh.poly_count(), 2);
        assert_eq!(mesh.vert_count(), 6);
        assert!(mesh.poly_neighbours(0)[..4].contains(&1));
        assert!(mesh.poly_neighbours(1)[..4].contains(&0));
    }

    #[test]
    fn test_portal_edges_marked() {
        let mut set = cset(vec![square_contour(0, 0, 10, 1)]);
        set.border_size = 2;
        let mesh = PolyMesh::build(&set, 6).unwrap();
        let nv = mesh.poly_verts(0).len();
        let portals = mesh.poly_neighbours(0)[..nv]
            .iter()
            .filter(|&&n| n & RC_PORTAL_FLAG != 0 && n != MESH_NULL_IDX)
            .count();
        assert_eq!(portals, 4);
    }

    #[test]
    fn test_rejects_bad_nvp() {
        assert!(PolyMesh::build(&cset(vec![]), 2).is_err());
        assert!(PolyMesh::build(&cset(vec![]), MAX_VERTS_PER_POLY + 1).is_err());
    }

    #[test]
    fn test_merge_value_requires_shared_edge() {
        let verts = vec![0, 0, 0, 0, 0, 4, 4, 0, 4, 4, 0, 0, 8, 0, 0, 8, 0, 4];
        let a = [0u16, 1, 2, MESH_NULL_IDX, MESH_NULL_IDX, MESH_NULL_IDX];
        let b = [0u16, 2, 3, MESH_NULL_IDX, MESH_NULL_IDX, MESH_NULL_IDX];
        let c = [3u16, 4, 5, MESH_NULL_IDX, MESH_NULL_IDX, MESH_NULL_IDX];
        assert!(get_poly_merge_value(&a, &b, &verts, 6).is_some());
        assert!(get_poly_merge_value(&a, &c, &verts, 6).is_none());
    }
}
