//! Detail mesh generation for Recast
//!
//! Adds height detail to each polygon of a `PolyMesh` by sampling the compact
//! heightfield along the polygon edges and inside the polygon, then
//! triangulating the samples. The detail mesh is only used for height queries;
//! connectivity stays on the polygon mesh.

use std::collections::VecDeque;

use glam::Vec3;
use log::{debug, warn};
use recast_common::Result;

use crate::compact_heightfield::CompactHeightfield;
use crate::heightfield::{get_dir_for_offset, get_dir_offset_x, get_dir_offset_z};
use crate::polymesh::{PolyMesh, RC_MULTIPLE_REGS};

const RC_UNSET_HEIGHT: u16 = 0xffff;

const MAX_VERTS: usize = 127;
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

/// Detail triangle edge flag: the edge lies on the polygon boundary
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x01;

/// Per-polygon height detail.
///
/// `meshes[i]` is `[vert_base, vert_count, tri_base, tri_count]` for polygon
/// `i`. Triangle indices are local to the sub-mesh; the fourth byte holds two
/// bits of edge flags per edge.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyMeshDetail {
    pub meshes: Vec<[u32; 4]>,
    /// Vertices in world space
    pub verts: Vec<Vec3>,
    pub tris: Vec<[u8; 4]>,
}

#[derive(Debug, Default)]
struct HeightPatch {
    data: Vec<u16>,
    xmin: i32,
    zmin: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    #[inline]
    fn get(&self, x: i32, z: i32) -> u16 {
        self.data[(x + z * self.width) as usize]
    }

    #[inline]
    fn set(&mut self, x: i32, z: i32, h: u16) {
        self.data[(x + z * self.width) as usize] = h;
    }

    #[inline]
    fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && x < self.width && z < self.height
    }
}

impl PolyMeshDetail {
    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    pub fn tri_count(&self) -> usize {
        self.tris.len()
    }

    /// Vertices and triangles belonging to polygon `i`
    pub fn submesh(&self, i: usize) -> (&[Vec3], &[[u8; 4]]) {
        let [vb, vn, tb, tn] = self.meshes[i];
        (
            &self.verts[vb as usize..(vb + vn) as usize],
            &self.tris[tb as usize..(tb + tn) as usize],
        )
    }

    /// Builds the detail mesh for every polygon of `mesh`.
    ///
    /// `sample_dist` is the world-space sampling distance (0 disables
    /// sampling) and `sample_max_error` the height error tolerated before a
    /// sample is added.
    pub fn build(mesh: &PolyMesh, chf: &CompactHeightfield, sample_dist: f32, sample_max_error: f32) -> Result<Self> {
        let mut dmesh = PolyMeshDetail::default();
        if mesh.vert_count() == 0 || mesh.poly_count() == 0 {
            return Ok(dmesh);
        }

        let cs = mesh.cs;
        let ch = mesh.ch;
        let orig = mesh.bmin;
        let border_size = mesh.border_size;
        let height_search_radius = 1.max((mesh.max_edge_error).ceil() as i32);

        // Height patch bounds per polygon.
        let npolys = mesh.poly_count();
        let mut bounds = vec![[0i32; 4]; npolys];
        let mut max_hw = 0;
        let mut max_hh = 0;
        for (i, b) in bounds.iter_mut().enumerate() {
            let mut xmin = chf.width;
            let mut xmax = 0;
            let mut zmin = chf.height;
            let mut zmax = 0;
            for &v in mesh.poly_verts(i) {
                let p = mesh.vert(v as usize);
                xmin = xmin.min(p[0] as i32);
                xmax = xmax.max(p[0] as i32);
                zmin = zmin.min(p[2] as i32);
                zmax = zmax.max(p[2] as i32);
            }
            *b = [
                0.max(xmin - 1),
                chf.width.min(xmax + 1),
                0.max(zmin - 1),
                chf.height.min(zmax + 1),
            ];
            if b[0] >= b[1] || b[2] >= b[3] {
                continue;
            }
            max_hw = max_hw.max(b[1] - b[0]);
            max_hh = max_hh.max(b[3] - b[2]);
        }

        let mut hp = HeightPatch {
            data: vec![0; (max_hw * max_hh) as usize],
            ..Default::default()
        };
        let mut builder = DetailBuilder::default();

        dmesh.meshes.reserve(npolys);
        for (i, b) in bounds.iter().enumerate() {
            let pverts = mesh.poly_verts(i);
            let poly: Vec<Vec3> = pverts
                .iter()
                .map(|&v| {
                    let p = mesh.vert(v as usize);
                    Vec3::new(p[0] as f32 * cs, p[1] as f32 * ch, p[2] as f32 * cs)
                })
                .collect();

            hp.xmin = b[0];
            hp.zmin = b[2];
            hp.width = (b[1] - b[0]).max(0);
            hp.height = (b[3] - b[2]).max(0);
            if hp.width == 0 || hp.height == 0 {
                dmesh.meshes.push([dmesh.verts.len() as u32, 0, dmesh.tris.len() as u32, 0]);
                continue;
            }
            get_height_data(chf, mesh, pverts, border_size, &mut hp, mesh.regs[i]);

            builder.build_poly_detail(&poly, sample_dist, sample_max_error, height_search_radius, chf, &hp);

            // Move to world space; the detail surface sits one cell above the floor.
            let poly_world: Vec<Vec3> = poly.iter().map(|&p| p + orig).collect();
            let vert_base = dmesh.verts.len() as u32;
            let tri_base = dmesh.tris.len() as u32;
            dmesh.meshes.push([
                vert_base,
                builder.verts.len() as u32,
                tri_base,
                builder.tris.len() as u32,
            ]);
            for v in &builder.verts {
                dmesh.verts.push(*v + orig + Vec3::new(0.0, chf.ch, 0.0));
            }
            for t in &builder.tris {
                let va = builder.verts[t[0] as usize] + orig;
                let vb = builder.verts[t[1] as usize] + orig;
                let vc = builder.verts[t[2] as usize] + orig;
                dmesh.tris.push([
                    t[0] as u8,
                    t[1] as u8,
                    t[2] as u8,
                    get_tri_flags(va, vb, vc, &poly_world),
                ]);
            }
        }

        debug!(
            "detail mesh built: {} vertices, {} triangles",
            dmesh.verts.len(),
            dmesh.tris.len()
        );
        Ok(dmesh)
    }
}

#[inline]
fn vdist2(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    (dx * dx + dz * dz).sqrt()
}

#[inline]
fn vcross2(p1: Vec3, p2: Vec3, p3: Vec3) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

fn circum_circle(p1: Vec3, p2: Vec3, p3: Vec3) -> (Vec3, f32) {
    const EPS: f32 = 1e-6;
    // Relative to p1 for precision.
    let v1 = Vec3::ZERO;
    let v2 = p2 - p1;
    let v3 = p3 - p1;
    let cp = vcross2(v1, v2, v3);
    if cp.abs() > EPS {
        let v1_sq = v1.x * v1.x + v1.z * v1.z;
        let v2_sq = v2.x * v2.x + v2.z * v2.z;
        let v3_sq = v3.x * v3.x + v3.z * v3.z;
        let c = Vec3::new(
            (v1_sq * (v2.z - v3.z) + v2_sq * (v3.z - v1.z) + v3_sq * (v1.z - v2.z)) / (2.0 * cp),
            0.0,
            (v1_sq * (v3.x - v2.x) + v2_sq * (v1.x - v3.x) + v3_sq * (v2.x - v1.x)) / (2.0 * cp),
        );
        let r = vdist2(c, v1);
        return (c + p1, r);
    }
    (p1, 0.0)
}

fn dist_pt_tri(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.x * v0.x + v0.z * v0.z;
    let dot01 = v0.x * v1.x + v0.z * v1.z;
    let dot02 = v0.x * v2.x + v0.z * v2.z;
    let dot11 = v1.x * v1.x + v1.z * v1.z;
    let dot12 = v1.x * v2.x + v1.z * v2.z;

    let denom = dot00 * dot11 - dot01 * dot01;
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let inv_denom = 1.0 / denom;
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    const EPS: f32 = 1e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        return Some((y - p.y).abs());
    }
    None
}

/// Squared distance from `pt` to segment `p`-`q` in 3D
fn distance_pt_seg(pt: Vec3, p: Vec3, q: Vec3) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Squared distance from `pt` to segment `p`-`q` on the xz-plane
fn distance_pt_seg_2d(pt: Vec3, p: Vec3, q: Vec3) -> f32 {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    dx * dx + dz * dz
}

fn dist_to_tri_mesh(p: Vec3, verts: &[Vec3], tris: &[[i32; 4]]) -> Option<f32> {
    tris.iter()
        .filter_map(|t| {
            dist_pt_tri(
                p,
                verts[t[0] as usize],
                verts[t[1] as usize],
                verts[t[2] as usize],
            )
        })
        .fold(None, |acc: Option<f32>, d| Some(acc.map_or(d, |a| a.min(d))))
}

/// Signed squared distance to the polygon outline, negative inside.
fn dist_to_poly(verts: &[Vec3], p: Vec3) -> f32 {
    let n = verts.len();
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > p.z) != (vj.z > p.z)) && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x) {
            inside = !inside;
        }
        dmin = dmin.min(distance_pt_seg_2d(p, vj, vi));
        j = i;
    }
    if inside {
        -dmin
    } else {
        dmin
    }
}

fn poly_min_extent(verts: &[Vec3]) -> f32 {
    let n = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..n {
        let ni = (i + 1) % n;
        let p1 = verts[i];
        let p2 = verts[ni];
        let mut max_edge_dist = 0.0f32;
        for (j, &v) in verts.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            max_edge_dist = max_edge_dist.max(distance_pt_seg_2d(v, p1, p2));
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

fn get_jitter_x(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0x8da6_b343) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

fn get_jitter_z(i: usize) -> f32 {
    (((i as u32).wrapping_mul(0xd816_3841) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

/// Samples the height patch at a world position relative to the mesh origin.
/// Unset cells are resolved by a spiral search up to `radius` cells away.
fn get_height(f: Vec3, ics: f32, ch: f32, radius: i32, hp: &HeightPatch) -> u16 {
    let ix = ((f.x * ics + 0.01).floor() as i32 - hp.xmin).clamp(0, hp.width - 1);
    let iz = ((f.z * ics + 0.01).floor() as i32 - hp.zmin).clamp(0, hp.height - 1);
    let mut h = hp.get(ix, iz);
    if h != RC_UNSET_HEIGHT {
        return h;
    }

    let mut x = 1;
    let mut z = 0;
    let mut dx = 1;
    let mut dz = 0;
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;
    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;
    let mut dmin = f32::MAX;

    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if hp.contains(nx, nz) {
            let nh = hp.get(nx, nz);
            if nh != RC_UNSET_HEIGHT {
                let d = (nh as f32 * ch - f.y).abs();
                if d < dmin {
                    h = nh;
                    dmin = d;
                }
            }
        }

        // Finish the current ring before giving up on a hit.
        if i + 1 == next_ring_iter_start {
            if h != RC_UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            let tmp = dx;
            dx = -dz;
            dz = tmp;
        }
        x += dx;
        z += dz;
    }
    h
}

/// Fills the height patch by flooding out from the spans of the polygon's
/// own region, or from the polygon centre when it has none.
fn get_height_data(
    chf: &CompactHeightfield,
    mesh: &PolyMesh,
    poly: &[u16],
    bs: i32,
    hp: &mut HeightPatch,
    region: u16,
) {
    hp.data.clear();
    hp.data.resize((hp.width * hp.height) as usize, RC_UNSET_HEIGHT);

    let mut queue: VecDeque<(i32, i32, usize)> = VecDeque::with_capacity(512);
    let mut empty = true;

    if region != RC_MULTIPLE_REGS {
        for hz in 0..hp.height {
            let z = hp.zmin + hz + bs;
            if z >= chf.height {
                continue;
            }
            for hx in 0..hp.width {
                let x = hp.xmin + hx + bs;
                if x >= chf.width {
                    continue;
                }
                let c = chf.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    let s = &chf.spans[i];
                    if s.reg != region {
                        continue;
                    }
                    hp.set(hx, hz, s.y);
                    empty = false;
                    let border = (0..4).any(|dir| {
                        chf.neighbour(x, z, i, dir)
                            .is_some_and(|ai| chf.spans[ai].reg != region)
                    });
                    if border {
                        queue.push_back((x, z, i));
                    }
                    break;
                }
            }
        }
    }

    if empty {
        seed_with_poly_center(chf, mesh, poly, bs, hp, &mut queue);
    }

    while let Some((cx, cz, ci)) = queue.pop_front() {
        for dir in 0..4 {
            let Some(ai) = chf.neighbour(cx, cz, ci, dir) else {
                continue;
            };
            let ax = cx + get_dir_offset_x(dir);
            let az = cz + get_dir_offset_z(dir);
            let hx = ax - hp.xmin - bs;
            let hz = az - hp.zmin - bs;
            if !hp.contains(hx, hz) || hp.get(hx, hz) != RC_UNSET_HEIGHT {
                continue;
            }
            hp.set(hx, hz, chf.spans[ai].y);
            queue.push_back((ax, az, ai));
        }
    }
}

/// Walks from the span nearest to a polygon vertex towards the polygon centre
/// and seeds `queue` with the span reached.
fn seed_with_poly_center(
    chf: &CompactHeightfield,
    mesh: &PolyMesh,
    poly: &[u16],
    bs: i32,
    hp: &mut HeightPatch,
    queue: &mut VecDeque<(i32, i32, usize)>,
) {
    const OFFSET: [(i32, i32); 9] = [
        (0, 0),
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    let mut start: Option<(i32, i32, usize)> = None;
    let mut dmin = RC_UNSET_HEIGHT as i32;
    'search: for &pv in poly {
        let v = mesh.vert(pv as usize);
        for &(ox, oz) in &OFFSET {
            let ax = v[0] as i32 + ox;
            let ay = v[1] as i32;
            let az = v[2] as i32 + oz;
            if ax < hp.xmin || ax >= hp.xmin + hp.width || az < hp.zmin || az >= hp.zmin + hp.height {
                continue;
            }
            if ax + bs >= chf.width || az + bs >= chf.height {
                continue;
            }
            let c = chf.cell(ax + bs, az + bs);
            for i in c.index as usize..(c.index + c.count) as usize {
                let d = (ay - chf.spans[i].y as i32).abs();
                if d < dmin {
                    start = Some((ax, az, i));
                    dmin = d;
                }
                if dmin == 0 {
                    break 'search;
                }
            }
        }
    }
    let Some(start) = start else {
        return;
    };

    let (mut pcx, mut pcz) = (0, 0);
    for &pv in poly {
        let v = mesh.vert(pv as usize);
        pcx += v[0] as i32;
        pcz += v[2] as i32;
    }
    pcx /= poly.len() as i32;
    pcz /= poly.len() as i32;

    // Depth first walk, using the patch as the visited set.
    hp.data.fill(0);
    let mut stack = vec![start];
    let mut dirs = [0usize, 1, 2, 3];
    let (mut cx, mut cz, mut ci) = start;
    loop {
        let Some(top) = stack.pop() else {
            warn!("walk towards polygon center failed to reach center");
            break;
        };
        (cx, cz, ci) = top;
        if cx == pcx && cz == pcz {
            break;
        }

        // Prefer the direction straight towards the centre; it is pushed last.
        let direct_dir = if cx == pcx {
            get_dir_for_offset(0, if pcz > cz { 1 } else { -1 })
        } else {
            get_dir_for_offset(if pcx > cx { 1 } else { -1 }, 0)
        }
        .unwrap_or(0);
        dirs.swap(direct_dir, 3);

        for &dir in &dirs {
            let Some(ai) = chf.neighbour(cx + bs, cz + bs, ci, dir) else {
                continue;
            };
            let nx = cx + get_dir_offset_x(dir);
            let nz = cz + get_dir_offset_z(dir);
            let hpx = nx - hp.xmin;
            let hpz = nz - hp.zmin;
            if !hp.contains(hpx, hpz) || hp.get(hpx, hpz) != 0 {
                continue;
            }
            hp.set(hpx, hpz, 1);
            stack.push((nx, nz, ai));
        }

        dirs.swap(direct_dir, 3);
    }

    queue.clear();
    queue.push_back((cx + bs, cz + bs, ci));
    hp.data.fill(RC_UNSET_HEIGHT);
    hp.set(cx - hp.xmin, cz - hp.zmin, chf.spans[ci].y);
}

/// Flags for one triangle edge: boundary when both ends lie on a polygon edge.
fn get_edge_flags(va: Vec3, vb: Vec3, poly: &[Vec3]) -> u8 {
    const THR_SQR: f32 = 0.001 * 0.001;
    let n = poly.len();
    let mut i = n - 1;
    for j in 0..n {
        if distance_pt_seg_2d(va, poly[j], poly[i]) < THR_SQR && distance_pt_seg_2d(vb, poly[j], poly[i]) < THR_SQR {
            return DETAIL_EDGE_BOUNDARY;
        }
        i = j;
    }
    0
}

fn get_tri_flags(va: Vec3, vb: Vec3, vc: Vec3, poly: &[Vec3]) -> u8 {
    get_edge_flags(va, vb, poly) | (get_edge_flags(vb, vc, poly) << 2) | (get_edge_flags(vc, va, poly) << 4)
}

/// Scratch buffers reused across polygons.
#[derive(Debug, Default)]
struct DetailBuilder {
    verts: Vec<Vec3>,
    tris: Vec<[i32; 4]>,
    edges: Vec<[i32; 4]>,
    samples: Vec<(i32, u16, i32, bool)>,
    hull: Vec<usize>,
}

impl DetailBuilder {
    fn build_poly_detail(
        &mut self,
        input: &[Vec3],
        sample_dist: f32,
        sample_max_error: f32,
        height_search_radius: i32,
        chf: &CompactHeightfield,
        hp: &HeightPatch,
    ) {
        let nin = input.len();
        let cs = chf.cs;
        let ics = 1.0 / cs;
        let ch = chf.ch;

        self.verts.clear();
        self.verts.extend_from_slice(input);
        self.tris.clear();
        self.edges.clear();
        self.hull.clear();

        let min_extent = poly_min_extent(input);

        // Tessellate the outline. Edges are always walked in the same order so
        // neighbouring polygons get identical samples.
        let mut edge = [Vec3::ZERO; MAX_VERTS_PER_EDGE + 1];
        let mut j = nin - 1;
        for i in 0..nin {
            self.hull.push(j);
            if sample_dist > 0.0 {
                let (mut vj, mut vi) = (input[j], input[i]);
                let mut swapped = false;
                if (vj.x - vi.x).abs() < 1e-6 {
                    if vj.z > vi.z {
                        std::mem::swap(&mut vj, &mut vi);
                        swapped = true;
                    }
                } else if vj.x > vi.x {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }

                let delta = vi - vj;
                let d = (delta.x * delta.x + delta.z * delta.z).sqrt();
                let mut nn = 1 + (d / sample_dist).floor() as usize;
                if nn >= MAX_VERTS_PER_EDGE {
                    nn = MAX_VERTS_PER_EDGE - 1;
                }
                if self.verts.len() + nn >= MAX_VERTS {
                    nn = (MAX_VERTS - 1).saturating_sub(self.verts.len());
                }

                if nn > 0 {
                    for (k, e) in edge.iter_mut().enumerate().take(nn + 1) {
                        let u = k as f32 / nn as f32;
                        let mut pos = vj + delta * u;
                        pos.y = get_height(pos, ics, ch, height_search_radius, hp) as f32 * ch;
                        *e = pos;
                    }

                    // Keep samples that deviate from the simplified edge.
                    let mut idx = vec![0usize, nn];
                    let mut k = 0;
                    while k + 1 < idx.len() {
                        let a = idx[k];
                        let b = idx[k + 1];
                        let va = edge[a];
                        let vb = edge[b];
                        let mut maxd = 0.0;
                        let mut maxi = None;
                        for (m, &e) in edge.iter().enumerate().take(b).skip(a + 1) {
                            let dev = distance_pt_seg(e, va, vb);
                            if dev > maxd {
                                maxd = dev;
                                maxi = Some(m);
                            }
                        }
                        match maxi {
                            Some(m) if maxd > sample_max_error * sample_max_error => idx.insert(k + 1, m),
                            _ => k += 1,
                        }
                    }

                    let inner = &idx[1..idx.len() - 1];
                    if swapped {
                        for &k in inner.iter().rev() {
                            self.hull.push(self.verts.len());
                            self.verts.push(edge[k]);
                        }
                    } else {
                        for &k in inner {
                            self.hull.push(self.verts.len());
                            self.verts.push(edge[k]);
                        }
                    }
                }
            }
            j = i;
        }

        // Slivers and tiny polygons get no interior samples.
        if min_extent < sample_dist * 2.0 {
            self.triangulate_hull(nin);
            return;
        }

        self.triangulate_hull(nin);
        if self.tris.is_empty() {
            warn!("could not triangulate detail polygon ({} verts)", nin);
            return;
        }

        if sample_dist > 0.0 {
            let mut bmin = input[0];
            let mut bmax = input[0];
            for &v in &input[1..] {
                bmin = bmin.min(v);
                bmax = bmax.max(v);
            }
            let x0 = (bmin.x / sample_dist).floor() as i32;
            let x1 = (bmax.x / sample_dist).ceil() as i32;
            let z0 = (bmin.z / sample_dist).floor() as i32;
            let z1 = (bmax.z / sample_dist).ceil() as i32;

            self.samples.clear();
            for z in z0..z1 {
                for x in x0..x1 {
                    let pt = Vec3::new(x as f32 * sample_dist, (bmax.y + bmin.y) * 0.5, z as f32 * sample_dist);
                    // Stay clear of the polygon edges.
                    if dist_to_poly(input, pt) > -sample_dist / 2.0 {
                        continue;
                    }
                    let h = get_height(pt, ics, ch, height_search_radius, hp);
                    self.samples.push((x, h, z, false));
                }
            }

            // Add the sample with the largest error until the surface is
            // within tolerance.
            for _ in 0..self.samples.len() {
                if self.verts.len() >= MAX_VERTS {
                    break;
                }

                let mut best: Option<(usize, f32, Vec3)> = None;
                for (i, s) in self.samples.iter().enumerate() {
                    if s.3 {
                        continue;
                    }
                    let pt = Vec3::new(
                        s.0 as f32 * sample_dist + get_jitter_x(i) * cs * 0.1,
                        s.1 as f32 * ch,
                        s.2 as f32 * sample_dist + get_jitter_z(i) * cs * 0.1,
                    );
                    let Some(d) = dist_to_tri_mesh(pt, &self.verts, &self.tris) else {
                        continue;
                    };
                    if best.map_or(d > 0.0, |b| d > b.1) {
                        best = Some((i, d, pt));
                    }
                }

                let Some((besti, bestd, bestpt)) = best else {
                    break;
                };
                if bestd <= sample_max_error {
                    break;
                }
                self.samples[besti].3 = true;
                self.verts.push(bestpt);

                self.edges.clear();
                self.tris.clear();
                self.delaunay_hull();
            }
        }

        if self.tris.len() > MAX_TRIS {
            warn!(
                "shrinking detail triangle count from {} to max {}",
                self.tris.len(),
                MAX_TRIS
            );
            self.tris.truncate(MAX_TRIS);
        }
    }

    /// Fan-like triangulation of the hull, growing from the ear with the
    /// shortest perimeter towards whichever side gives the shorter triangle.
    fn triangulate_hull(&mut self, nin: usize) {
        let nhull = self.hull.len();
        if nhull < 3 {
            return;
        }
        let hull = &self.hull;
        let verts = &self.verts;
        let next = |i: usize| (i + 1) % nhull;
        let prev = |i: usize| (i + nhull - 1) % nhull;

        let mut start = 0;
        let mut left = 1;
        let mut right = nhull - 1;
        let mut dmin = f32::MAX;
        for i in 0..nhull {
            // Only original polygon vertices can be ear tips.
            if hull[i] >= nin {
                continue;
            }
            let pi = prev(i);
            let ni = next(i);
            let pv = verts[hull[pi]];
            let cv = verts[hull[i]];
            let nv = verts[hull[ni]];
            let d = vdist2(pv, cv) + vdist2(cv, nv) + vdist2(nv, pv);
            if d < dmin {
                start = i;
                left = ni;
                right = pi;
                dmin = d;
            }
        }

        self.tris.push([hull[start] as i32, hull[left] as i32, hull[right] as i32, 0]);

        while next(left) != right {
            let nleft = next(left);
            let nright = prev(right);

            let cvleft = verts[hull[left]];
            let nvleft = verts[hull[nleft]];
            let cvright = verts[hull[right]];
            let nvright = verts[hull[nright]];
            let dleft = vdist2(cvleft, nvleft) + vdist2(nvleft, cvright);
            let dright = vdist2(cvright, nvright) + vdist2(cvleft, nvright);

            if dleft < dright {
                self.tris.push([hull[left] as i32, hull[nleft] as i32, hull[right] as i32, 0]);
                left = nleft;
            } else {
                self.tris.push([hull[left] as i32, hull[nright] as i32, hull[right] as i32, 0]);
                right = nright;
            }
        }
    }

    fn find_edge(&self, s: i32, t: i32) -> Option<usize> {
        self.edges
            .iter()
            .position(|e| (e[0] == s && e[1] == t) || (e[0] == t && e[1] == s))
    }

    fn add_edge(&mut self, s: i32, t: i32, l: i32, r: i32) {
        let max_edges = self.verts.len() * 10;
        if self.edges.len() >= max_edges {
            warn!("too many detail edges ({}/{})", self.edges.len(), max_edges);
            return;
        }
        if self.find_edge(s, t).is_none() {
            self.edges.push([s, t, l, r]);
        }
    }

    fn update_left_face(&mut self, e: usize, s: i32, t: i32, f: i32) {
        let edge = &mut self.edges[e];
        if edge[0] == s && edge[1] == t && edge[2] == EV_UNDEF {
            edge[2] = f;
        } else if edge[1] == s && edge[0] == t && edge[3] == EV_UNDEF {
            edge[3] = f;
        }
    }

    fn overlap_edges(&self, s1: i32, t1: i32) -> bool {
        let pts = &self.verts;
        self.edges.iter().any(|e| {
            let (s0, t0) = (e[0], e[1]);
            if s0 == s1 || s0 == t1 || t0 == s1 || t0 == t1 {
                return false;
            }
            overlap_seg_seg_2d(
                pts[s0 as usize],
                pts[t0 as usize],
                pts[s1 as usize],
                pts[t1 as usize],
            )
        })
    }

    fn complete_facet(&mut self, e: usize, nfaces: &mut i32) {
        const EPS: f32 = 1e-5;
        let edge = self.edges[e];

        let (s, t) = if edge[2] == EV_UNDEF {
            (edge[0], edge[1])
        } else if edge[3] == EV_UNDEF {
            (edge[1], edge[0])
        } else {
            return;
        };

        let npts = self.verts.len();
        let ps = self.verts[s as usize];
        let pt_t = self.verts[t as usize];

        let mut pt = npts;
        let mut c = Vec3::ZERO;
        let mut r = -1.0f32;
        for u in 0..npts {
            if u as i32 == s || u as i32 == t {
                continue;
            }
            let pu = self.verts[u];
            if vcross2(ps, pt_t, pu) <= EPS {
                continue;
            }
            if r < 0.0 {
                pt = u;
                (c, r) = circum_circle(ps, pt_t, pu);
                continue;
            }
            let d = vdist2(c, pu);
            const TOL: f32 = 0.001;
            if d > r * (1.0 + TOL) {
                continue;
            } else if d < r * (1.0 - TOL) {
                pt = u;
                (c, r) = circum_circle(ps, pt_t, pu);
            } else {
                // On the circle: only accept if the new edges do not overlap existing ones.
                if self.overlap_edges(s, u as i32) || self.overlap_edges(t, u as i32) {
                    continue;
                }
                pt = u;
                (c, r) = circum_circle(ps, pt_t, pu);
            }
        }

        if pt < npts {
            let pt = pt as i32;
            self.update_left_face(e, s, t, *nfaces);

            match self.find_edge(pt, s) {
                None => self.add_edge(pt, s, *nfaces, EV_UNDEF),
                Some(ei) => self.update_left_face(ei, pt, s, *nfaces),
            }
            match self.find_edge(t, pt) {
                None => self.add_edge(t, pt, *nfaces, EV_UNDEF),
                Some(ei) => self.update_left_face(ei, t, pt, *nfaces),
            }
            *nfaces += 1;
        } else {
            self.update_left_face(e, s, t, EV_HULL);
        }
    }

    /// Delaunay triangulation of all vertices constrained to the hull.
    fn delaunay_hull(&mut self) {
        let nhull = self.hull.len();
        let mut nfaces = 0;
        self.edges.clear();

        let mut j = nhull - 1;
        for i in 0..nhull {
            let (a, b) = (self.hull[j] as i32, self.hull[i] as i32);
            self.add_edge(a, b, EV_HULL, EV_UNDEF);
            j = i;
        }

        let mut current = 0;
        while current < self.edges.len() {
            if self.edges[current][2] == EV_UNDEF {
                self.complete_facet(current, &mut nfaces);
            }
            if self.edges[current][3] == EV_UNDEF {
                self.complete_facet(current, &mut nfaces);
            }
            current += 1;
        }

        self.tris.clear();
        self.tris.resize(nfaces as usize, [-1, -1, -1, 0]);
        for e in &self.edges {
            if e[3] >= 0 {
                let t = &mut self.tris[e[3] as usize];
                if t[0] == -1 {
                    t[0] = e[0];
                    t[1] = e[1];
                } else if t[0] == e[1] {
                    t[2] = e[0];
                } else if t[1] == e[0] {
                    t[2] = e[1];
                }
            }
            if e[2] >= 0 {
                let t = &mut self.tris[e[2] as usize];
                if t[0] == -1 {
                    t[0] = e[1];
                    t[1] = e[0];
                } else if t[0] == e[0] {
                    t[2] = e[1];
                } else if t[1] == e[1] {
                    t[2] = e[0];
                }
            }
        }

        let before = self.tris.len();
        self.tris.retain(|t| t[0] != -1 && t[1] != -1 && t[2] != -1);
        if self.tris.len() != before {
            warn!("removed {} dangling detail faces", before - self.tris.len());
        }
    }
}

fn overlap_seg_seg_2d(a: Vec3, b: Vec3, c: Vec3, d: Vec3) -> bool {
    let a1 = vcross2(a, b, d);
    let a2 = vcross2(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = vcross2(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{BuildContoursFlags, ContourSet};
    use crate::distance_field::build_distance_field;
    use crate::heightfield::Heightfield;
    use crate::region::build_regions_watershed;
    use crate::RC_WALKABLE_AREA;

    fn flat_chf(size: i32, floor: u16) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 20.0, size as f32),
            1.0,
            0.5,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, floor, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(2, 1, &hf).unwrap();
        build_distance_field(&mut chf).unwrap();
        build_regions_watershed(&mut chf, 0, 1, 0).unwrap();
        chf
    }

    #[test]
    fn test_triangulate_hull_square() {
        let mut b = DetailBuilder {
            verts: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 4.0),
                Vec3::new(4.0, 0.0, 4.0),
                Vec3::new(4.0, 0.0, 0.0),
            ],
            hull: vec![3, 0, 1, 2],
            ..Default::default()
        };
        b.triangulate_hull(4);
        assert_eq!(b.tris.len(), 2);
    }

    #[test]
    fn test_delaunay_hull_with_interior_point() {
        let mut b = DetailBuilder {
            verts: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 4.0),
                Vec3::new(4.0, 0.0, 4.0),
                Vec3::new(4.0, 0.0, 0.0),
                Vec3::new(2.0, 1.0, 2.0),
            ],
            hull: vec![3, 0, 1, 2],
            ..Default::default()
        };
        b.delaunay_hull();
        assert_eq!(b.tris.len(), 4);
        assert!(b.tris.iter().all(|t| t[..3].contains(&4)));
    }

    #[test]
    fn test_circum_circle() {
        let (c, r) = circum_circle(Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 2.0));
        assert!((c.x - 1.0).abs() < 1e-5 && (c.z - 1.0).abs() < 1e-5);
        assert!((r - 2f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_detail_mesh_on_flat_ground() {
        let chf = flat_chf(12, 4);
        let cset = ContourSet::build(&chf, 1.3, 12, BuildContoursFlags::TESS_WALL_EDGES).unwrap();
        let mesh = PolyMesh::build(&cset, 6).unwrap();
        assert!(mesh.poly_count() > 0);

        let dmesh = PolyMeshDetail::build(&mesh, &chf, 2.0, 0.5).unwrap();
        assert_eq!(dmesh.meshes.len(), mesh.poly_count());
        for i in 0..mesh.poly_count() {
            let (verts, tris) = dmesh.submesh(i);
            assert!(verts.len() >= mesh.poly_verts(i).len());
            assert!(!tris.is_empty());
            for t in tris {
                assert!((t[0] as usize) < verts.len());
                assert!((t[1] as usize) < verts.len());
                assert!((t[2] as usize) < verts.len());
            }
            // Floor top is at 4 voxels * 0.5 plus one cell of offset.
            for v in verts {
                assert!((v.y - 2.5).abs() < 1e-3, "height {}", v.y);
            }
        }
    }

    #[test]
    fn test_empty_mesh_gives_empty_detail() {
        let chf = flat_chf(4, 1);
        let dmesh = PolyMeshDetail::build(&PolyMesh::new(6), &chf, 1.0, 1.0).unwrap();
        assert_eq!(dmesh.vert_count(), 0);
        assert_eq!(dmesh.tri_count(), 0);
    }

    #[test]
    fn test_boundary_edge_flags() {
        let poly = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        let flags = get_tri_flags(poly[0], poly[1], poly[2], &poly);
        // Two edges on the outline, the diagonal inside.
        assert_eq!(flags, DETAIL_EDGE_BOUNDARY | (DETAIL_EDGE_BOUNDARY << 2));
    }
}
