//! Region partitioning for Recast
//!
//! Splits the walkable surface of a compact heightfield into simple regions,
//! either by watershed flooding of the distance field or by monotone row
//! sweeps. Both end with the same merge and filter pass.

use log::{debug, warn};
use recast_common::{Error, Result};

use crate::compact_heightfield::CompactHeightfield;
use crate::heightfield::{get_dir_offset_x, get_dir_offset_z};
use crate::RC_NULL_AREA;

/// Region id flag for the non-navigable border around a tile
pub const RC_BORDER_REG: u16 = 0x8000;

const NB_STACKS: usize = 8;
const EXPAND_ITERS: usize = 8;
const RC_NULL_NEI: u16 = 0xffff;

#[derive(Debug, Clone, Copy)]
struct LevelStackEntry {
    x: i32,
    z: i32,
    index: Option<usize>,
}

#[derive(Debug, Clone)]
struct Region {
    span_count: usize,
    id: u16,
    area_type: u8,
    remap: bool,
    visited: bool,
    overlap: bool,
    connections: Vec<u16>,
    floors: Vec<u16>,
}

impl Region {
    fn new(id: u16) -> Self {
        Self {
            span_count: 0,
            id,
            area_type: 0,
            remap: false,
            visited: false,
            overlap: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }

    fn is_live(&self) -> bool {
        self.id != 0 && self.id & RC_BORDER_REG == 0
    }

    fn remove_adjacent_neighbours(&mut self) {
        let mut i = 0;
        while i < self.connections.len() && self.connections.len() > 1 {
            let ni = (i + 1) % self.connections.len();
            if self.connections[i] == self.connections[ni] {
                self.connections.remove(i);
            } else {
                i += 1;
            }
        }
    }

    fn replace_neighbour(&mut self, old_id: u16, new_id: u16) {
        let mut changed = false;
        for c in self.connections.iter_mut() {
            if *c == old_id {
                *c = new_id;
                changed = true;
            }
        }
        for f in self.floors.iter_mut() {
            if *f == old_id {
                *f = new_id;
            }
        }
        if changed {
            self.remove_adjacent_neighbours();
        }
    }

    fn can_merge_with(&self, other: &Region) -> bool {
        if self.area_type != other.area_type {
            return false;
        }
        let shared = self.connections.iter().filter(|&&c| c == other.id).count();
        if shared > 1 {
            return false;
        }
        !self.floors.contains(&other.id)
    }

    fn add_unique_floor(&mut self, n: u16) {
        if !self.floors.contains(&n) {
            self.floors.push(n);
        }
    }

    fn is_connected_to_border(&self) -> bool {
        self.connections.contains(&0)
    }
}

/// Working state shared by both partitioners
struct RegionBuild<'a> {
    chf: &'a CompactHeightfield,
    src_reg: Vec<u16>,
    src_dist: Vec<u16>,
}

impl<'a> RegionBuild<'a> {
    fn new(chf: &'a CompactHeightfield) -> Self {
        Self {
            chf,
            src_reg: vec![0; chf.span_count()],
            src_dist: vec![0; chf.span_count()],
        }
    }

    fn spans(&self, x: i32, z: i32) -> std::ops::Range<usize> {
        let c = self.chf.cell(x, z);
        c.index as usize..(c.index + c.count) as usize
    }

    fn paint_rect_region(&mut self, minx: i32, maxx: i32, minz: i32, maxz: i32, reg_id: u16) {
        for z in minz..maxz {
            for x in minx..maxx {
                for i in self.spans(x, z) {
                    if self.chf.areas[i] != RC_NULL_AREA {
                        self.src_reg[i] = reg_id;
                    }
                }
            }
        }
    }

    /// Paints the four border strips, returning the next free region id.
    fn paint_border(&mut self, border_size: i32, mut id: u16) -> u16 {
        if border_size <= 0 {
            return id;
        }
        let w = self.chf.width;
        let h = self.chf.height;
        let bw = w.min(border_size);
        let bh = h.min(border_size);
        self.paint_rect_region(0, bw, 0, h, id | RC_BORDER_REG);
        id += 1;
        self.paint_rect_region(w - bw, w, 0, h, id | RC_BORDER_REG);
        id += 1;
        self.paint_rect_region(0, w, 0, bh, id | RC_BORDER_REG);
        id += 1;
        self.paint_rect_region(0, w, h - bh, h, id | RC_BORDER_REG);
        id += 1;
        id
    }

    fn sort_cells_by_level(&self, start_level: u16, stacks: &mut [Vec<LevelStackEntry>]) {
        let start_level = (start_level >> 1) as i32;
        for s in stacks.iter_mut() {
            s.clear();
        }
        for z in 0..self.chf.height {
            for x in 0..self.chf.width {
                for i in self.spans(x, z) {
                    if self.chf.areas[i] == RC_NULL_AREA || self.src_reg[i] != 0 {
                        continue;
                    }
                    let level = (self.chf.dist[i] >> 1) as i32;
                    let s_id = (start_level - level).max(0) as usize;
                    if s_id >= stacks.len() {
                        continue;
                    }
                    stacks[s_id].push(LevelStackEntry { x, z, index: Some(i) });
                }
            }
        }
    }

    fn expand_regions(&mut self, max_iter: usize, level: u16, stack: &mut Vec<LevelStackEntry>, fill_stack: bool) {
        let chf = self.chf;
        if fill_stack {
            stack.clear();
            for z in 0..chf.height {
                for x in 0..chf.width {
                    for i in self.spans(x, z) {
                        if chf.dist[i] >= level && self.src_reg[i] == 0 && chf.areas[i] != RC_NULL_AREA {
                            stack.push(LevelStackEntry { x, z, index: Some(i) });
                        }
                    }
                }
            }
        } else {
            for entry in stack.iter_mut() {
                if let Some(i) = entry.index {
                    if self.src_reg[i] != 0 {
                        entry.index = None;
                    }
                }
            }
        }

        let mut dirty: Vec<(usize, u16, u16)> = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty.clear();

            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut r = self.src_reg[i];
                let mut d2 = 0xffffu16;
                let area = chf.areas[i];
                for dir in 0..4 {
                    let Some(ai) = chf.neighbour(entry.x, entry.z, i, dir) else {
                        continue;
                    };
                    if chf.areas[ai] != area {
                        continue;
                    }
                    let nr = self.src_reg[ai];
                    if nr > 0 && nr & RC_BORDER_REG == 0 && self.src_dist[ai].saturating_add(2) < d2 {
                        r = nr;
                        d2 = self.src_dist[ai] + 2;
                    }
                }
                if r != 0 {
                    entry.index = None;
                    dirty.push((i, r, d2));
                } else {
                    failed += 1;
                }
            }

            for &(i, r, d) in &dirty {
                self.src_reg[i] = r;
                self.src_dist[i] = d;
            }

            if failed == stack.len() {
                break;
            }
            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    fn flood_region(&mut self, start: LevelStackEntry, level: u16, r: u16, stack: &mut Vec<LevelStackEntry>) -> bool {
        let chf = self.chf;
        let Some(si) = start.index else {
            return false;
        };
        let area = chf.areas[si];

        stack.clear();
        stack.push(start);
        self.src_reg[si] = r;
        self.src_dist[si] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(back) = stack.pop() {
            let Some(ci) = back.index else { continue };
            let (cx, cz) = (back.x, back.z);

            // Stop at spans already claimed by another region.
            let mut ar = 0u16;
            for dir in 0..4 {
                let Some(ai) = chf.neighbour(cx, cz, ci, dir) else {
                    continue;
                };
                if chf.areas[ai] != area {
                    continue;
                }
                let nr = self.src_reg[ai];
                if nr & RC_BORDER_REG != 0 {
                    continue;
                }
                if nr != 0 && nr != r {
                    ar = nr;
                    break;
                }
                let ax = cx + get_dir_offset_x(dir);
                let az = cz + get_dir_offset_z(dir);
                let dir2 = (dir + 1) & 0x3;
                if let Some(ai2) = chf.neighbour(ax, az, ai, dir2) {
                    if chf.areas[ai2] != area {
                        continue;
                    }
                    let nr2 = self.src_reg[ai2];
                    if nr2 != 0 && nr2 != r {
                        ar = nr2;
                        break;
                    }
                }
            }
            if ar != 0 {
                self.src_reg[ci] = 0;
                continue;
            }

            count += 1;

            for dir in 0..4 {
                let Some(ai) = chf.neighbour(cx, cz, ci, dir) else {
                    continue;
                };
                if chf.areas[ai] != area {
                    continue;
                }
                if chf.dist[ai] >= lev && self.src_reg[ai] == 0 {
                    self.src_reg[ai] = r;
                    self.src_dist[ai] = 0;
                    stack.push(LevelStackEntry {
                        x: cx + get_dir_offset_x(dir),
                        z: cz + get_dir_offset_z(dir),
                        index: Some(ai),
                    });
                }
            }
        }

        count > 0
    }

    fn is_solid_edge(&self, x: i32, z: i32, i: usize, dir: usize) -> bool {
        let r = self
            .chf
            .neighbour(x, z, i, dir)
            .map_or(0, |ai| self.src_reg[ai]);
        r != self.src_reg[i]
    }

    /// Walks the outline of the region containing span `i`, starting at edge
    /// `dir`, and records the neighbouring region ids in order.
    fn walk_contour(&self, mut x: i32, mut z: i32, mut i: usize, mut dir: usize, cont: &mut Vec<u16>) {
        let start_dir = dir;
        let start_i = i;

        let mut cur_reg = self.chf.neighbour(x, z, i, dir).map_or(0, |ai| self.src_reg[ai]);
        cont.push(cur_reg);

        let mut iter = 0;
        loop {
            iter += 1;
            if iter >= 40000 {
                break;
            }
            if self.is_solid_edge(x, z, i, dir) {
                let r = self.chf.neighbour(x, z, i, dir).map_or(0, |ai| self.src_reg[ai]);
                if r != cur_reg {
                    cur_reg = r;
                    cont.push(cur_reg);
                }
                dir = (dir + 1) & 0x3;
            } else {
                let Some(ni) = self.chf.neighbour(x, z, i, dir) else {
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

        if cont.len() > 1 {
            let mut j = 0;
            while j < cont.len() && cont.len() > 1 {
                let nj = (j + 1) % cont.len();
                if cont[j] == cont[nj] {
                    cont.remove(j);
                } else {
                    j += 1;
                }
            }
        }
    }

    /// Removes regions smaller than `min_region_area`, merges regions smaller
    /// than `merge_region_size` into their smallest compatible neighbour and
    /// compacts the ids. Returns the new exclusive upper region id.
    fn merge_and_filter_regions(&mut self, min_region_area: usize, merge_region_size: usize, max_region_id: u16) -> u16 {
        let chf = self.chf;
        let nreg = max_region_id as usize + 1;
        let mut regions: Vec<Region> = (0..nreg).map(|i| Region::new(i as u16)).collect();

        for z in 0..chf.height {
            for x in 0..chf.width {
                let span_range = self.spans(x, z);
                for i in span_range.clone() {
                    let r = self.src_reg[i] as usize;
                    if r == 0 || r >= nreg {
                        continue;
                    }
                    regions[r].span_count += 1;

                    // Regions stacked in the same column become floors of each other.
                    for j in span_range.clone() {
                        if i == j {
                            continue;
                        }
                        let floor_id = self.src_reg[j];
                        if floor_id == 0 || floor_id as usize >= nreg {
                            continue;
                        }
                        if floor_id as usize == r {
                            regions[r].overlap = true;
                        }
                        regions[r].add_unique_floor(floor_id);
                    }

                    if !regions[r].connections.is_empty() {
                        continue;
                    }
                    regions[r].area_type = chf.areas[i];

                    if let Some(ndir) = (0..4).find(|&dir| self.is_solid_edge(x, z, i, dir)) {
                        let mut cont = Vec::new();
                        self.walk_contour(x, z, i, ndir, &mut cont);
                        regions[r].connections = cont;
                    }
                }
            }
        }

        // Drop islands that are too small and do not touch the tile border.
        let mut stack: Vec<usize> = Vec::new();
        let mut trace: Vec<usize> = Vec::new();
        for i in 0..nreg {
            let reg = &regions[i];
            if !reg.is_live() || reg.span_count == 0 || reg.visited {
                continue;
            }

            let mut connects_to_border = false;
            let mut span_count = 0;
            stack.clear();
            trace.clear();

            regions[i].visited = true;
            stack.push(i);
            while let Some(ri) = stack.pop() {
                span_count += regions[ri].span_count;
                trace.push(ri);
                let connections = regions[ri].connections.clone();
                for c in connections {
                    if c & RC_BORDER_REG != 0 {
                        connects_to_border = true;
                        continue;
                    }
                    let nei = &mut regions[c as usize];
                    if nei.visited || !nei.is_live() {
                        continue;
                    }
                    stack.push(nei.id as usize);
                    nei.visited = true;
                }
            }

            if span_count < min_region_area && !connects_to_border {
                for &t in &trace {
                    regions[t].span_count = 0;
                    regions[t].id = 0;
                }
            }
        }

        // Merge small regions into neighbours.
        loop {
            let mut merge_count = 0;
            for i in 0..nreg {
                let reg = &regions[i];
                if !reg.is_live() || reg.overlap || reg.span_count == 0 {
                    continue;
                }
                if reg.span_count > merge_region_size && reg.is_connected_to_border() {
                    continue;
                }

                let mut smallest = usize::MAX;
                let mut merge_id = reg.id;
                for &c in &reg.connections {
                    if c & RC_BORDER_REG != 0 {
                        continue;
                    }
                    let mreg = &regions[c as usize];
                    if !mreg.is_live() || mreg.overlap {
                        continue;
                    }
                    if mreg.span_count < smallest && reg.can_merge_with(mreg) && mreg.can_merge_with(reg) {
                        smallest = mreg.span_count;
                        merge_id = mreg.id;
                    }
                }

                if merge_id != reg.id {
                    let old_id = reg.id;
                    if merge_regions(&mut regions, merge_id as usize, i) {
                        for r in regions.iter_mut() {
                            if !r.is_live() {
                                continue;
                            }
                            if r.id == old_id {
                                r.id = merge_id;
                            }
                            r.replace_neighbour(old_id, merge_id);
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compact ids.
        for r in regions.iter_mut() {
            r.remap = r.is_live();
        }
        let mut reg_id_gen: u16 = 0;
        for i in 0..nreg {
            if !regions[i].remap {
                continue;
            }
            let old_id = regions[i].id;
            reg_id_gen += 1;
            let new_id = reg_id_gen;
            for r in regions[i..].iter_mut() {
                if r.id == old_id {
                    r.id = new_id;
                    r.remap = false;
                }
            }
        }

        for reg in self.src_reg.iter_mut() {
            if *reg & RC_BORDER_REG == 0 {
                *reg = regions[*reg as usize].id;
            }
        }

        let overlaps = regions.iter().filter(|r| r.overlap).count();
        if overlaps > 0 {
            warn!("{} overlapping regions after merge", overlaps);
        }

        reg_id_gen + 1
    }

    fn into_regions(self) -> Vec<u16> {
        self.src_reg
    }
}

/// Merges region `b` into region `a` when they share exactly one boundary.
fn merge_regions(regions: &mut [Region], a: usize, b: usize) -> bool {
    let aid = regions[a].id;
    let bid = regions[b].id;

    let acon = regions[a].connections.clone();
    let bcon = regions[b].connections.clone();

    let Some(insa) = acon.iter().position(|&c| c == bid) else {
        return false;
    };
    let Some(insb) = bcon.iter().position(|&c| c == aid) else {
        return false;
    };

    let mut merged = Vec::with_capacity(acon.len() + bcon.len());
    for i in 0..acon.len() - 1 {
        merged.push(acon[(insa + 1 + i) % acon.len()]);
    }
    for i in 0..bcon.len() - 1 {
        merged.push(bcon[(insb + 1 + i) % bcon.len()]);
    }

    let b_floors = regions[b].floors.clone();
    let b_spans = regions[b].span_count;

    let rega = &mut regions[a];
    rega.connections = merged;
    rega.remove_adjacent_neighbours();
    for f in b_floors {
        rega.add_unique_floor(f);
    }
    rega.span_count += b_spans;

    let regb = &mut regions[b];
    regb.span_count = 0;
    regb.connections.clear();
    true
}

/// Partitions the walkable surface with a watershed flood of the distance
/// field. `build_distance_field` must have been run first.
pub fn build_regions_watershed(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let mut build = RegionBuild::new(chf);
    let mut lvl_stacks: Vec<Vec<LevelStackEntry>> = vec![Vec::with_capacity(256); NB_STACKS];
    let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

    let mut region_id = build.paint_border(border_size, 1);
    let mut level = (chf.max_distance + 1) & !1;
    let mut s_id: usize = NB_STACKS - 1;

    while level > 0 {
        level = level.saturating_sub(2);
        s_id = (s_id + 1) & (NB_STACKS - 1);

        if s_id == 0 {
            build.sort_cells_by_level(level, &mut lvl_stacks);
        } else {
            let (prev, cur) = lvl_stacks.split_at_mut(s_id);
            for entry in &prev[s_id - 1] {
                if let Some(i) = entry.index {
                    if build.src_reg[i] == 0 {
                        cur[0].push(*entry);
                    }
                }
            }
        }

        build.expand_regions(EXPAND_ITERS, level, &mut lvl_stacks[s_id], false);

        let entries = lvl_stacks[s_id].clone();
        for entry in entries {
            let Some(i) = entry.index else { continue };
            if build.src_reg[i] == 0 && build.flood_region(entry, level, region_id, &mut stack) {
                if region_id == 0xffff {
                    return Err(Error::Recast("region id overflow".to_string()));
                }
                region_id += 1;
            }
        }
    }

    build.expand_regions(EXPAND_ITERS * 8, 0, &mut stack, true);

    let max_regions = build.merge_and_filter_regions(
        min_region_area.max(0) as usize,
        merge_region_area.max(0) as usize,
        region_id,
    );
    let src_reg = build.into_regions();
    for (span, reg) in chf.spans.iter_mut().zip(src_reg) {
        span.reg = reg;
    }
    chf.border_size = border_size;
    chf.max_regions = max_regions;
    debug!("watershed produced {} regions", max_regions.saturating_sub(1));
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct SweepSpan {
    id: u16,
    ns: u16,
    nei: u16,
}

/// Partitions the walkable surface by sweeping rows and stitching row
/// segments that share a single neighbour in the previous row.
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
    merge_region_area: i32,
) -> Result<()> {
    let w = chf.width;
    let h = chf.height;
    let mut build = RegionBuild::new(chf);
    let mut id = build.paint_border(border_size, 1);

    let mut sweeps: Vec<SweepSpan> = vec![SweepSpan::default(); (w.max(h) + 1) as usize];
    let mut prev: Vec<u16> = Vec::new();

    for z in border_size..h - border_size {
        prev.clear();
        prev.resize(id as usize + 1, 0);
        let mut rid: u16 = 1;

        for x in border_size..w - border_size {
            for i in build.spans(x, z) {
                if chf.areas[i] == RC_NULL_AREA {
                    continue;
                }

                // -x
                let mut previd = 0u16;
                if let Some(ai) = chf.neighbour(x, z, i, 0) {
                    if build.src_reg[ai] & RC_BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        previd = build.src_reg[ai];
                    }
                }
                if previd == 0 {
                    previd = rid;
                    rid += 1;
                    if previd as usize >= sweeps.len() {
                        sweeps.resize(previd as usize + 1, SweepSpan::default());
                    }
                    sweeps[previd as usize] = SweepSpan::default();
                }

                // -z
                if let Some(ai) = chf.neighbour(x, z, i, 3) {
                    let nr = build.src_reg[ai];
                    if nr != 0 && nr & RC_BORDER_REG == 0 && chf.areas[i] == chf.areas[ai] {
                        let sweep = &mut sweeps[previd as usize];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            if nr as usize >= prev.len() {
                                prev.resize(nr as usize + 1, 0);
                            }
                            prev[nr as usize] += 1;
                        } else {
                            sweep.nei = RC_NULL_NEI;
                        }
                    }
                }

                build.src_reg[i] = previd;
            }
        }

        // Row segments continue the region above when they are its only child.
        for sweep in sweeps.iter_mut().take(rid as usize).skip(1) {
            if sweep.nei != RC_NULL_NEI && sweep.nei != 0 && prev[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if id == 0xffff {
                    return Err(Error::Recast("region id overflow".to_string()));
                }
                sweep.id = id;
                id += 1;
            }
        }

        for x in border_size..w - border_size {
            for i in build.spans(x, z) {
                let r = build.src_reg[i];
                if r > 0 && r < rid {
                    build.src_reg[i] = sweeps[r as usize].id;
                }
            }
        }
    }

    let max_regions = build.merge_and_filter_regions(
        min_region_area.max(0) as usize,
        merge_region_area.max(0) as usize,
        id,
    );
    let src_reg = build.into_regions();
    for (span, reg) in chf.spans.iter_mut().zip(src_reg) {
        span.reg = reg;
    }
    chf.border_size = border_size;
    chf.max_regions = max_regions;
    debug!("monotone partition produced {} regions", max_regions.saturating_sub(1));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance_field::build_distance_field;
    use crate::heightfield::Heightfield;
    use crate::RC_WALKABLE_AREA;
    use glam::Vec3;
    use std::collections::HashSet;

    /// Two 8x8 floors joined by nothing, separated by a solid gap.
    fn two_islands() -> CompactHeightfield {
        let mut hf = Heightfield::new(20, 8, Vec3::ZERO, Vec3::new(20.0, 10.0, 8.0), 1.0, 1.0);
        for z in 0..8 {
            for x in (0..8).chain(12..20) {
                hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(2, 1, &hf).unwrap()
    }

    fn region_ids(chf: &CompactHeightfield) -> HashSet<u16> {
        chf.spans.iter().map(|s| s.reg).filter(|&r| r != 0).collect()
    }

    #[test]
    fn test_watershed_separates_islands() {
        let mut chf = two_islands();
        build_distance_field(&mut chf).unwrap();
        build_regions_watershed(&mut chf, 0, 4, 20).unwrap();

        let left = chf.spans[chf.cell(3, 3).index as usize].reg;
        let right = chf.spans[chf.cell(15, 3).index as usize].reg;
        assert_ne!(left, 0);
        assert_ne!(right, 0);
        assert_ne!(left, right);
        assert!(chf.spans.iter().all(|s| s.reg != 0));
        assert!(region_ids(&chf).iter().all(|&r| r < chf.max_regions));
    }

    #[test]
    fn test_monotone_separates_islands() {
        let mut chf = two_islands();
        build_regions_monotone(&mut chf, 0, 4, 20).unwrap();
        let left = chf.spans[chf.cell(3, 3).index as usize].reg;
        let right = chf.spans[chf.cell(15, 3).index as usize].reg;
        assert_ne!(left, 0);
        assert_ne!(right, 0);
        assert_ne!(left, right);
        assert_eq!(region_ids(&chf).len(), 2);
    }

    #[test]
    fn test_small_islands_are_removed() {
        let mut chf = two_islands();
        build_distance_field(&mut chf).unwrap();
        build_regions_watershed(&mut chf, 0, 100, 20).unwrap();
        assert!(chf.spans.iter().all(|s| s.reg == 0));
    }

    #[test]
    fn test_border_regions_are_flagged() {
        let mut chf = two_islands();
        build_distance_field(&mut chf).unwrap();
        build_regions_watershed(&mut chf, 2, 4, 20).unwrap();
        let corner = chf.spans[chf.cell(0, 0).index as usize].reg;
        assert_ne!(corner & RC_BORDER_REG, 0);
        let inner = chf.spans[chf.cell(4, 4).index as usize].reg;
        assert_eq!(inner & RC_BORDER_REG, 0);
        assert_ne!(inner, 0);
        assert_eq!(chf.border_size, 2);
    }
}
