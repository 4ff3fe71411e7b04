//! Contour generation for Recast
//!
//! Traces the outline of every region in a compact heightfield, simplifies
//! it and merges holes into their enclosing outline.

use bitflags::bitflags;
use glam::Vec3;
use log::{debug, warn};
use recast_common::Result;

use crate::compact_heightfield::CompactHeightfield;
use crate::heightfield::{get_dir_offset_x, get_dir_offset_z};
use crate::region::RC_BORDER_REG;

/// Vertex flag: the vertex sits on a tile border corner and may be removed
pub const RC_BORDER_VERTEX: u32 = 0x10000;
/// Vertex flag: the edge starting at this vertex separates two areas
pub const RC_AREA_BORDER: u32 = 0x20000;
/// Mask extracting the neighbour region id from vertex flags
pub const RC_CONTOUR_REG_MASK: u32 = 0xffff;

bitflags! {
    /// Edge tessellation options for `ContourSet::build`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BuildContoursFlags: u32 {
        /// Split long edges facing solid space
        const TESS_WALL_EDGES = 0x01;
        /// Split long edges between areas
        const TESS_AREA_EDGES = 0x02;
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        BuildContoursFlags::TESS_WALL_EDGES
    }
}

/// A vertex in a contour, in voxel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourVertex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Neighbour region id in the low 16 bits plus `RC_BORDER_VERTEX`/`RC_AREA_BORDER`
    pub flags: u32,
}

impl ContourVertex {
    #[inline]
    fn new(x: i32, y: i32, z: i32, flags: u32) -> Self {
        Self { x, y, z, flags }
    }

    /// Region on the other side of the edge starting at this vertex
    #[inline]
    pub fn neighbour_region(&self) -> u16 {
        (self.flags & RC_CONTOUR_REG_MASK) as u16
    }

    #[inline]
    fn same_xz(&self, other: &ContourVertex) -> bool {
        self.x == other.x && self.z == other.z
    }
}

/// Simplified outline of a region
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified vertices
    pub verts: Vec<ContourVertex>,
    /// Raw per-voxel vertices
    pub raw_verts: Vec<ContourVertex>,
    /// Region id
    pub reg: u16,
    /// Area id
    pub area: u8,
}

/// All contours of a compact heightfield
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    /// The minimum bounds in world space, border excluded
    pub bmin: Vec3,
    /// The maximum bounds in world space, border excluded
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Width of the set, border excluded
    pub width: i32,
    /// Height of the set, border excluded
    pub height: i32,
    pub border_size: i32,
    pub max_error: f32,
}

impl ContourSet {
    /// Builds contours for every region of `chf`.
    ///
    /// `max_error` is the allowed deviation from the raw outline and
    /// `max_edge_len` the longest permitted edge (voxels, 0 disables splitting).
    pub fn build(
        chf: &CompactHeightfield,
        max_error: f32,
        max_edge_len: i32,
        build_flags: BuildContoursFlags,
    ) -> Result<Self> {
        let w = chf.width;
        let h = chf.height;
        let border_size = chf.border_size;

        let mut cset = ContourSet {
            contours: Vec::with_capacity((chf.max_regions as usize).max(8)),
            bmin: chf.bmin,
            bmax: chf.bmax,
            cs: chf.cs,
            ch: chf.ch,
            width: w - border_size * 2,
            height: h - border_size * 2,
            border_size,
            max_error,
        };
        if border_size > 0 {
            let pad = border_size as f32 * chf.cs;
            cset.bmin.x += pad;
            cset.bmin.z += pad;
            cset.bmax.x -= pad;
            cset.bmax.z -= pad;
        }

        // Per span bit mask of edges that face another region.
        let mut flags = vec![0u8; chf.span_count()];
        for z in 0..h {
            for x in 0..w {
                let c = chf.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & RC_BORDER_REG != 0 {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0u8;
                    for dir in 0..4 {
                        let r = chf.neighbour(x, z, i, dir).map_or(0, |ai| chf.spans[ai].reg);
                        if r == reg {
                            res |= 1 << dir;
                        }
                    }
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut verts: Vec<ContourVertex> = Vec::with_capacity(256);
        let mut simplified: Vec<ContourVertex> = Vec::with_capacity(64);

        for z in 0..h {
            for x in 0..w {
                let c = chf.cell(x, z);
                for i in c.index as usize..(c.index + c.count) as usize {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let reg = chf.spans[i].reg;
                    if reg == 0 || reg & RC_BORDER_REG != 0 {
                        continue;
                    }
                    let area = chf.areas[i];

                    verts.clear();
                    simplified.clear();
                    walk_contour(x, z, i, chf, &mut flags, &mut verts);
                    simplify_contour(&verts, &mut simplified, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    if simplified.len() >= 3 {
                        let offset = |v: &ContourVertex| {
                            ContourVertex::new(v.x - border_size, v.y, v.z - border_size, v.flags)
                        };
                        cset.contours.push(Contour {
                            verts: simplified.iter().map(offset).collect(),
                            raw_verts: verts.iter().map(offset).collect(),
                            reg,
                            area,
                        });
                    }
                }
            }
        }

        cset.merge_holes(chf.max_regions as usize + 1);
        debug!("built {} contours", cset.contours.len());
        Ok(cset)
    }

    fn merge_holes(&mut self, nregions: usize) {
        if self.contours.is_empty() {
            return;
        }

        let winding: Vec<i32> = self
            .contours
            .iter()
            .map(|c| if calc_area_of_polygon_2d(&c.verts) < 0 { -1 } else { 1 })
            .collect();
        if !winding.iter().any(|&w| w < 0) {
            return;
        }

        let mut outlines: Vec<Option<usize>> = vec![None; nregions];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); nregions];
        for (i, c) in self.contours.iter().enumerate() {
            let reg = c.reg as usize;
            if reg >= nregions {
                continue;
            }
            if winding[i] > 0 {
                if outlines[reg].is_some() {
                    warn!("multiple outlines for region {}", reg);
                }
                outlines[reg] = Some(i);
            } else {
                holes[reg].push(i);
            }
        }

        for reg in 0..nregions {
            if holes[reg].is_empty() {
                continue;
            }
            match outlines[reg] {
                Some(outline) => self.merge_region_holes(outline, &holes[reg]),
                None => warn!(
                    "missing outline for region {}, {} holes dropped",
                    reg,
                    holes[reg].len()
                ),
            }
        }
    }

    fn merge_region_holes(&mut self, outline: usize, hole_ids: &[usize]) {
        // Leftmost vertex of each hole, holes sorted left to right.
        let mut holes: Vec<(usize, i32, i32, usize)> = hole_ids
            .iter()
            .map(|&h| {
                let (minx, minz, leftmost) = find_left_most_vertex(&self.contours[h].verts);
                (h, minx, minz, leftmost)
            })
            .collect();
        holes.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut diags: Vec<(usize, i32)> = Vec::new();
        for i in 0..holes.len() {
            let (hole, _, _, leftmost) = holes[i];
            let hole_len = self.contours[hole].verts.len();
            let mut index = None;
            let mut best_vertex = leftmost;

            for _ in 0..hole_len {
                let outline_verts = &self.contours[outline].verts;
                let corner = self.contours[hole].verts[best_vertex];

                diags.clear();
                for j in 0..outline_verts.len() {
                    if in_cone(j, outline_verts, &corner) {
                        let dx = outline_verts[j].x - corner.x;
                        let dz = outline_verts[j].z - corner.z;
                        diags.push((j, dx * dx + dz * dz));
                    }
                }
                diags.sort_by_key(|d| d.1);

                for &(vert, _) in &diags {
                    let pt = outline_verts[vert];
                    let mut intersect = intersect_seg_contour(&pt, &corner, Some(vert), outline_verts);
                    for &(other, _, _, _) in &holes[i..] {
                        if intersect {
                            break;
                        }
                        intersect |= intersect_seg_contour(&pt, &corner, None, &self.contours[other].verts);
                    }
                    if !intersect {
                        index = Some(vert);
                        break;
                    }
                }
                if index.is_some() {
                    break;
                }
                best_vertex = (best_vertex + 1) % hole_len;
            }

            match index {
                Some(ia) => {
                    let hole_verts = std::mem::take(&mut self.contours[hole].verts);
                    let outline_verts = &mut self.contours[outline].verts;
                    *outline_verts = merge_contours(outline_verts, &hole_verts, ia, best_vertex);
                }
                None => warn!(
                    "failed to find merge points for hole {} in region {}",
                    hole, self.contours[outline].reg
                ),
            }
        }

        // Holes that were merged have no vertices left.
        self.contours.retain(|c| !c.verts.is_empty());
    }
}

fn get_corner_height(x: i32, z: i32, i: usize, dir: usize, chf: &CompactHeightfield) -> (i32, bool) {
    let s = chf.spans[i];
    let mut height = s.y as i32;
    let dirp = (dir + 1) & 0x3;

    let pack = |idx: usize| chf.spans[idx].reg as u32 | ((chf.areas[idx] as u32) << 16);
    let mut regs = [0u32; 4];
    regs[0] = pack(i);

    if let Some(ai) = chf.neighbour(x, z, i, dir) {
        let ax = x + get_dir_offset_x(dir);
        let az = z + get_dir_offset_z(dir);
        height = height.max(chf.spans[ai].y as i32);
        regs[1] = pack(ai);
        if let Some(ai2) = chf.neighbour(ax, az, ai, dirp) {
            height = height.max(chf.spans[ai2].y as i32);
            regs[2] = pack(ai2);
        }
    }
    if let Some(ai) = chf.neighbour(x, z, i, dirp) {
        let ax = x + get_dir_offset_x(dirp);
        let az = z + get_dir_offset_z(dirp);
        height = height.max(chf.spans[ai].y as i32);
        regs[3] = pack(ai);
        if let Some(ai2) = chf.neighbour(ax, az, ai, dir) {
            height = height.max(chf.spans[ai2].y as i32);
            regs[2] = pack(ai2);
        }
    }

    // A vertex is a border vertex when two same exterior cells meet two
    // interior cells of one area.
    let border = RC_BORDER_REG as u32;
    let mut is_border_vertex = false;
    for j in 0..4 {
        let a = j;
        let b = (j + 1) & 0x3;
        let c = (j + 2) & 0x3;
        let d = (j + 3) & 0x3;
        let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
        let two_ints = ((regs[c] | regs[d]) & border) == 0;
        let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
        let no_zeros = regs.iter().all(|&r| r != 0);
        if two_same_exts && two_ints && ints_same_area && no_zeros {
            is_border_vertex = true;
            break;
        }
    }

    (height, is_border_vertex)
}

fn walk_contour(
    mut x: i32,
    mut z: i32,
    mut i: usize,
    chf: &CompactHeightfield,
    flags: &mut [u8],
    points: &mut Vec<ContourVertex>,
) {
    let mut dir = 0usize;
    while flags[i] & (1 << dir) == 0 {
        dir += 1;
    }
    let start_dir = dir;
    let start_i = i;
    let area = chf.areas[i];

    let mut iter = 0;
    loop {
        iter += 1;
        if iter >= 40000 {
            break;
        }
        if flags[i] & (1 << dir) != 0 {
            let (py, is_border_vertex) = get_corner_height(x, z, i, dir, chf);
            let mut px = x;
            let mut pz = z;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let mut r = 0u32;
            let mut is_area_border = false;
            if let Some(ai) = chf.neighbour(x, z, i, dir) {
                r = chf.spans[ai].reg as u32;
                if area != chf.areas[ai] {
                    is_area_border = true;
                }
            }
            if is_border_vertex {
                r |= RC_BORDER_VERTEX;
            }
            if is_area_border {
                r |= RC_AREA_BORDER;
            }
            points.push(ContourVertex::new(px, py, pz, r));

            flags[i] &= !(1 << dir);
            dir = (dir + 1) & 0x3;
        } else {
            let Some(ni) = chf.neighbour(x, z, i, dir) else {
                return;
            };
            x += get_dir_offset_x(dir);
            z += get_dir_offset_z(dir);
            i = ni;
            dir = (dir + 3) & 0x3;
        }

        if start_i == i && start_dir == dir {
            break;
        }
    }
}

fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);
    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;
    dx * dx + dz * dz
}

/// Simplifies a raw contour. The `flags` of each simplified vertex hold the
/// index of the raw vertex it came from until the final pass rewrites them.
fn simplify_contour(
    points: &[ContourVertex],
    simplified: &mut Vec<ContourVertex>,
    max_error: f32,
    max_edge_len: i32,
    build_flags: BuildContoursFlags,
) {
    let pn = points.len();
    if pn == 0 {
        return;
    }

    let has_connections = points.iter().any(|p| p.flags & RC_CONTOUR_REG_MASK != 0);
    if has_connections {
        // Keep every vertex where the neighbour region or area changes.
        for i in 0..pn {
            let ii = (i + 1) % pn;
            let different_regs =
                (points[i].flags & RC_CONTOUR_REG_MASK) != (points[ii].flags & RC_CONTOUR_REG_MASK);
            let area_borders = (points[i].flags & RC_AREA_BORDER) != (points[ii].flags & RC_AREA_BORDER);
            if different_regs || area_borders {
                let p = points[i];
                simplified.push(ContourVertex::new(p.x, p.y, p.z, i as u32));
            }
        }
    }

    if simplified.is_empty() {
        // Seed with the lower-left and upper-right vertices.
        let mut ll = (points[0], 0usize);
        let mut ur = (points[0], 0usize);
        for (i, p) in points.iter().enumerate() {
            if p.x < ll.0.x || (p.x == ll.0.x && p.z < ll.0.z) {
                ll = (*p, i);
            }
            if p.x > ur.0.x || (p.x == ur.0.x && p.z > ur.0.z) {
                ur = (*p, i);
            }
        }
        simplified.push(ContourVertex::new(ll.0.x, ll.0.y, ll.0.z, ll.1 as u32));
        simplified.push(ContourVertex::new(ur.0.x, ur.0.y, ur.0.z, ur.1 as u32));
    }

    // Add points until every raw point is within the error tolerance.
    let max_error_sqr = max_error * max_error;
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let (mut ax, mut az, ai) = (simplified[i].x, simplified[i].z, simplified[i].flags as usize);
        let (mut bx, mut bz, bi) = (simplified[ii].x, simplified[ii].z, simplified[ii].flags as usize);

        // Traverse the segment in lexicographic order so both directions agree.
        let (cinc, mut ci, endi) = if bx > ax || (bx == ax && bz > az) {
            (1, (ai + 1) % pn, bi)
        } else {
            std::mem::swap(&mut ax, &mut bx);
            std::mem::swap(&mut az, &mut bz);
            (pn - 1, (bi + pn - 1) % pn, ai)
        };

        let mut maxd = 0.0f32;
        let mut maxi = None;
        // Only outer edges and area borders are tessellated.
        if points[ci].flags & RC_CONTOUR_REG_MASK == 0 || points[ci].flags & RC_AREA_BORDER != 0 {
            while ci != endi {
                let d = distance_pt_seg(points[ci].x, points[ci].z, ax, az, bx, bz);
                if d > maxd {
                    maxd = d;
                    maxi = Some(ci);
                }
                ci = (ci + cinc) % pn;
            }
        }

        match maxi {
            Some(mi) if maxd > max_error_sqr => {
                let p = points[mi];
                simplified.insert(i + 1, ContourVertex::new(p.x, p.y, p.z, mi as u32));
            }
            _ => i += 1,
        }
    }

    // Split edges that are too long.
    let tess_walls = build_flags.contains(BuildContoursFlags::TESS_WALL_EDGES);
    let tess_areas = build_flags.contains(BuildContoursFlags::TESS_AREA_EDGES);
    if max_edge_len > 0 && (tess_walls || tess_areas) {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();
            let (ax, az, ai) = (simplified[i].x, simplified[i].z, simplified[i].flags as usize);
            let (bx, bz, bi) = (simplified[ii].x, simplified[ii].z, simplified[ii].flags as usize);

            let ci = (ai + 1) % pn;
            let tess = (tess_walls && points[ci].flags & RC_CONTOUR_REG_MASK == 0)
                || (tess_areas && points[ci].flags & RC_AREA_BORDER != 0);

            let mut maxi = None;
            if tess {
                let dx = bx - ax;
                let dz = bz - az;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    let n = if bi < ai { bi + pn - ai } else { bi - ai };
                    if n > 1 {
                        maxi = Some(if bx > ax || (bx == ax && bz > az) {
                            (ai + n / 2) % pn
                        } else {
                            (ai + (n + 1) / 2) % pn
                        });
                    }
                }
            }

            match maxi {
                Some(mi) => {
                    let p = points[mi];
                    simplified.insert(i + 1, ContourVertex::new(p.x, p.y, p.z, mi as u32));
                }
                None => i += 1,
            }
        }
    }

    // The edge flags come from the next raw vertex, the border vertex flag
    // from the current one.
    for v in simplified.iter_mut() {
        let ai = (v.flags as usize + 1) % pn;
        let bi = v.flags as usize;
        v.flags = (points[ai].flags & (RC_CONTOUR_REG_MASK | RC_AREA_BORDER))
            | (points[bi].flags & RC_BORDER_VERTEX);
    }
}

fn remove_degenerate_segments(simplified: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while i < simplified.len() {
        let ni = (i + 1) % simplified.len();
        if simplified.len() > 1 && simplified[i].same_xz(&simplified[ni]) {
            simplified.remove(i);
        } else {
            i += 1;
        }
    }
}

/// Twice the signed area, rounded; negative for holes.
fn calc_area_of_polygon_2d(verts: &[ContourVertex]) -> i32 {
    let n = verts.len();
    let mut area = 0;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        area += vi.x * vj.z - vj.x * vi.z;
        j = i;
    }
    (area + 1) / 2
}

#[inline]
fn area2(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> i32 {
    (b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)
}

#[inline]
fn left(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) < 0
}

#[inline]
fn left_on(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
fn collinear(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    area2(a, b, c) == 0
}

fn intersect_prop(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex, d: &ContourVertex) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

fn between(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

fn intersect(a: &ContourVertex, b: &ContourVertex, c: &ContourVertex, d: &ContourVertex) -> bool {
    intersect_prop(a, b, c, d) || between(a, b, c) || between(a, b, d) || between(c, d, a) || between(c, d, b)
}

fn intersect_seg_contour(d0: &ContourVertex, d1: &ContourVertex, skip: Option<usize>, verts: &[ContourVertex]) -> bool {
    let n = verts.len();
    for k in 0..n {
        let k1 = (k + 1) % n;
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p1 = &verts[k];
        let p2 = &verts[k1];
        if d0.same_xz(p1) || d1.same_xz(p1) || d0.same_xz(p2) || d1.same_xz(p2) {
            continue;
        }
        if intersect(d0, d1, p1, p2) {
            return true;
        }
    }
    false
}

fn in_cone(i: usize, verts: &[ContourVertex], pj: &ContourVertex) -> bool {
    let n = verts.len();
    let pi = &verts[i];
    let pi1 = &verts[(i + 1) % n];
    let pin1 = &verts[(i + n - 1) % n];
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn find_left_most_vertex(verts: &[ContourVertex]) -> (i32, i32, usize) {
    let mut minx = verts[0].x;
    let mut minz = verts[0].z;
    let mut leftmost = 0;
    for (i, v) in verts.iter().enumerate().skip(1) {
        if v.x < minx || (v.x == minx && v.z < minz) {
            minx = v.x;
            minz = v.z;
            leftmost = i;
        }
    }
    (minx, minz, leftmost)
}

/// Splices `hole` into `outline` through the diagonal `outline[ia]`-`hole[ib]`.
/// Both diagonal end points appear twice in the result.
fn merge_contours(outline: &[ContourVertex], hole: &[ContourVertex], ia: usize, ib: usize) -> Vec<ContourVertex> {
    let mut verts = Vec::with_capacity(outline.len() + hole.len() + 2);
    for i in 0..=outline.len() {
        verts.push(outline[(ia + i) % outline.len()]);
    }
    for i in 0..=hole.len() {
        verts.push(hole[(ib + i) % hole.len()]);
    }
    verts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::build_distance_field;
    use crate::heightfield::Heightfield;
    use crate::region::{build_regions_monotone, build_regions_watershed};
    use crate::RC_WALKABLE_AREA;

    fn build(cells: impl Fn(i32, i32) -> bool, w: i32, h: i32, watershed: bool) -> ContourSet {
        let mut hf = Heightfield::new(w, h, Vec3::ZERO, Vec3::new(w as f32, 10.0, h as f32), 1.0, 1.0);
        for z in 0..h {
            for x in 0..w {
                if cells(x, z) {
                    hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
                }
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(2, 1, &hf).unwrap();
        build_distance_field(&mut chf).unwrap();
        if watershed {
            build_regions_watershed(&mut chf, 0, 1, 0).unwrap();
        } else {
            build_regions_monotone(&mut chf, 0, 1, 0).unwrap();
        }
        ContourSet::build(&chf, 1.3, 12, BuildContoursFlags::TESS_WALL_EDGES).unwrap()
    }

    #[test]
    fn test_square_contour() {
        let cset = build(|_, _| true, 6, 6, false);
        assert_eq!(cset.contours.len(), 1);
        let c = &cset.contours[0];
        assert_eq!(c.verts.len(), 4);
        assert!(c.raw_verts.len() >= c.verts.len());
        let xs: Vec<i32> = c.verts.iter().map(|v| v.x).collect();
        assert!(xs.contains(&0) && xs.contains(&6));
        assert!(calc_area_of_polygon_2d(&c.verts) > 0);
    }

    #[test]
    fn test_long_edges_are_split() {
        let cset = build(|_, z| z < 4, 40, 4, false);
        let c = &cset.contours[0];
        for (i, v) in c.verts.iter().enumerate() {
            let n = &c.verts[(i + 1) % c.verts.len()];
            let dx = n.x - v.x;
            let dz = n.z - v.z;
            assert!(dx * dx + dz * dz <= 12 * 12, "edge {:?} -> {:?} too long", v, n);
        }
    }

    #[test]
    fn test_hole_is_merged_into_outline() {
        let cset = build(|x, z| !((4..6).contains(&x) && (4..6).contains(&z)), 10, 10, true);
        // Every contour is an outline after hole merging.
        assert!(cset
            .contours
            .iter()
            .all(|c| calc_area_of_polygon_2d(&c.verts) >= 0));
        assert!(!cset.contours.is_empty());
    }

    #[test]
    fn test_degenerate_segments_removed() {
        let mut verts = vec![
            ContourVertex::new(0, 0, 0, 0),
            ContourVertex::new(0, 1, 0, 0),
            ContourVertex::new(3, 0, 0, 0),
            ContourVertex::new(3, 0, 3, 0),
        ];
        remove_degenerate_segments(&mut verts);
        assert_eq!(verts.len(), 3);
    }
}
