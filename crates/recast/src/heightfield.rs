//! Solid heightfield for Recast
//!
//! A heightfield is a grid of columns, each holding a bottom-up list of solid
//! spans. Spans live in a single pool and are chained by index; freed spans
//! are recycled through a free list, so column lists never own each other.

use glam::Vec3;
use recast_common::{Error, Result};

use crate::RC_NULL_AREA;

/// Marks the end of a span chain
pub const NULL_SPAN: u32 = u32::MAX;

/// Ceiling used for the topmost span of a column
const OPEN_CEILING: i32 = 0xffff;

/// Direction offsets shared by the voxel stages (0 = -x, 1 = +z, 2 = +x, 3 = -z)
const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// Offset in x for the given direction
#[inline]
pub fn get_dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 0x3]
}

/// Offset in z for the given direction
#[inline]
pub fn get_dir_offset_z(dir: usize) -> i32 {
    DIR_OFFSET_Z[dir & 0x3]
}

/// Direction matching a unit offset, if any
#[inline]
pub fn get_dir_for_offset(x: i32, z: i32) -> Option<usize> {
    (0..4).find(|&d| DIR_OFFSET_X[d] == x && DIR_OFFSET_Z[d] == z)
}

/// A solid span within a heightfield column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Lower limit of the span (voxels)
    pub smin: u16,
    /// Upper limit of the span (voxels)
    pub smax: u16,
    /// Area id, `RC_NULL_AREA` when not walkable
    pub area: u8,
    /// Next span up in the column, `NULL_SPAN` at the top
    pub next: u32,
}

/// Heightfield of solid spans
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,
    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    columns: Vec<u32>,
    pool: Vec<Span>,
    free_list: u32,
}

impl Heightfield {
    /// Creates an empty heightfield
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        let cells = (width.max(0) as usize) * (height.max(0) as usize);
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![NULL_SPAN; cells],
            pool: Vec::new(),
            free_list: NULL_SPAN,
        }
    }

    #[inline]
    fn column_index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    #[inline]
    fn in_bounds(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && x < self.width && z < self.height
    }

    /// Index of the lowest span in a column
    pub fn column_head(&self, x: i32, z: i32) -> Option<u32> {
        if !self.in_bounds(x, z) {
            return None;
        }
        let head = self.columns[self.column_index(x, z)];
        (head != NULL_SPAN).then_some(head)
    }

    #[inline]
    pub fn span(&self, idx: u32) -> &Span {
        &self.pool[idx as usize]
    }

    #[inline]
    pub fn span_mut(&mut self, idx: u32) -> &mut Span {
        &mut self.pool[idx as usize]
    }

    /// Iterates the spans of a column bottom-up as `(index, span)`
    pub fn column(&self, x: i32, z: i32) -> ColumnIter<'_> {
        ColumnIter {
            hf: self,
            cur: self.column_head(x, z).unwrap_or(NULL_SPAN),
        }
    }

    fn column_indices(&self, x: i32, z: i32) -> Vec<u32> {
        self.column(x, z).map(|(i, _)| i).collect()
    }

    /// Ceiling above the given span, the next span's floor or an open ceiling
    #[inline]
    pub fn span_ceiling(&self, span: &Span) -> i32 {
        if span.next != NULL_SPAN {
            self.pool[span.next as usize].smin as i32
        } else {
            OPEN_CEILING
        }
    }

    fn alloc_span(&mut self, span: Span) -> u32 {
        if self.free_list != NULL_SPAN {
            let idx = self.free_list;
            self.free_list = self.pool[idx as usize].next;
            self.pool[idx as usize] = span;
            idx
        } else {
            self.pool.push(span);
            (self.pool.len() - 1) as u32
        }
    }

    fn free_span(&mut self, idx: u32) {
        let span = &mut self.pool[idx as usize];
        span.area = RC_NULL_AREA;
        span.next = self.free_list;
        self.free_list = idx;
    }

    /// Inserts a span into a column, merging it with every span it overlaps.
    ///
    /// When the merged tops are within `flag_merge_threshold` of each other the
    /// larger area id wins, so a walkable top survives a nearby unwalkable one.
    /// Columns outside the grid are ignored.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if smin > smax {
            return Err(Error::Recast(format!(
                "span minimum {} above maximum {}",
                smin, smax
            )));
        }
        if !self.in_bounds(x, z) {
            return Ok(());
        }
        let col = self.column_index(x, z);

        let mut new_span = Span {
            smin,
            smax,
            area,
            next: NULL_SPAN,
        };

        let mut prev = NULL_SPAN;
        let mut cur = self.columns[col];
        while cur != NULL_SPAN {
            let s = self.pool[cur as usize];
            if s.smin > new_span.smax {
                break;
            }
            if s.smax < new_span.smin {
                prev = cur;
                cur = s.next;
                continue;
            }

            // Overlap, absorb the existing span.
            new_span.smin = new_span.smin.min(s.smin);
            new_span.smax = new_span.smax.max(s.smax);
            if (new_span.smax as i32 - s.smax as i32).abs() <= flag_merge_threshold {
                new_span.area = new_span.area.max(s.area);
            }

            let next = s.next;
            self.free_span(cur);
            if prev != NULL_SPAN {
                self.pool[prev as usize].next = next;
            } else {
                self.columns[col] = next;
            }
            cur = next;
        }

        if prev != NULL_SPAN {
            new_span.next = self.pool[prev as usize].next;
            let idx = self.alloc_span(new_span);
            self.pool[prev as usize].next = idx;
        } else {
            new_span.next = self.columns[col];
            let idx = self.alloc_span(new_span);
            self.columns[col] = idx;
        }
        Ok(())
    }

    /// Number of live spans in the heightfield
    pub fn span_count(&self) -> usize {
        (0..self.height)
            .flat_map(|z| (0..self.width).map(move |x| (x, z)))
            .map(|(x, z)| self.column(x, z).count())
            .sum()
    }

    /// Number of spans with a walkable area
    pub fn walkable_span_count(&self) -> usize {
        (0..self.height)
            .flat_map(|z| (0..self.width).map(move |x| (x, z)))
            .map(|(x, z)| {
                self.column(x, z)
                    .filter(|(_, s)| s.area != RC_NULL_AREA)
                    .count()
            })
            .sum()
    }

    /// Lets unwalkable spans that sit just above a walkable one inherit its area,
    /// so curbs and stair steps stay walkable.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut prev_walkable = false;
                let mut prev_area = RC_NULL_AREA;
                let mut prev_smax = 0i32;
                for idx in self.column_indices(x, z) {
                    let span = &mut self.pool[idx as usize];
                    let walkable = span.area != RC_NULL_AREA;
                    if !walkable && prev_walkable && span.smax as i32 - prev_smax <= walkable_climb {
                        span.area = prev_area;
                    }
                    prev_walkable = walkable;
                    prev_area = span.area;
                    prev_smax = span.smax as i32;
                }
            }
        }
    }

    /// Marks spans unwalkable when a neighbour drops away by more than
    /// `walkable_climb`, or when the traversable neighbours are too uneven.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                for idx in self.column_indices(x, z) {
                    let span = self.pool[idx as usize];
                    if span.area == RC_NULL_AREA {
                        continue;
                    }

                    let floor = span.smax as i32;
                    let ceiling = self.span_ceiling(&span);

                    let mut lowest_neighbor_floor_diff = OPEN_CEILING;
                    let mut lowest_traversable = floor;
                    let mut highest_traversable = floor;

                    for dir in 0..4 {
                        let nx = x + get_dir_offset_x(dir);
                        let nz = z + get_dir_offset_z(dir);
                        if !self.in_bounds(nx, nz) {
                            lowest_neighbor_floor_diff = -walkable_climb - 1;
                            break;
                        }

                        // Open space below the first neighbour span counts as a drop.
                        let neighbor_ceiling = self
                            .column_head(nx, nz)
                            .map_or(OPEN_CEILING, |h| self.pool[h as usize].smin as i32);
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor_diff = -walkable_climb - 1;
                            break;
                        }

                        for (_, ns) in self.column(nx, nz) {
                            let neighbor_floor = ns.smax as i32;
                            let neighbor_ceiling = self.span_ceiling(ns);
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                continue;
                            }

                            let diff = neighbor_floor - floor;
                            lowest_neighbor_floor_diff = lowest_neighbor_floor_diff.min(diff);

                            if diff.abs() <= walkable_climb {
                                lowest_traversable = lowest_traversable.min(neighbor_floor);
                                highest_traversable = highest_traversable.max(neighbor_floor);
                            } else if diff < -walkable_climb {
                                break;
                            }
                        }
                    }

                    if lowest_neighbor_floor_diff < -walkable_climb
                        || highest_traversable - lowest_traversable > walkable_climb
                    {
                        self.pool[idx as usize].area = RC_NULL_AREA;
                    }
                }
            }
        }
    }

    /// Marks spans unwalkable when the clearance above them is below `walkable_height`.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                for idx in self.column_indices(x, z) {
                    let span = self.pool[idx as usize];
                    if self.span_ceiling(&span) - (span.smax as i32) < walkable_height {
                        self.pool[idx as usize].area = RC_NULL_AREA;
                    }
                }
            }
        }
    }
}

/// Bottom-up iterator over a heightfield column
pub struct ColumnIter<'a> {
    hf: &'a Heightfield,
    cur: u32,
}

impl<'a> Iterator for ColumnIter<'a> {
    type Item = (u32, &'a Span);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NULL_SPAN {
            return None;
        }
        let idx = self.cur;
        let span = &self.hf.pool[idx as usize];
        self.cur = span.next;
        Some((idx, span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RC_WALKABLE_AREA;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32, 10.0, h as f32),
            1.0,
            1.0,
        )
    }

    fn column(hf: &Heightfield, x: i32, z: i32) -> Vec<(u16, u16, u8)> {
        hf.column(x, z).map(|(_, s)| (s.smin, s.smax, s.area)).collect()
    }

    #[test]
    fn test_add_span_keeps_order() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 20, 25, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 0, 5, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 10, 12, RC_NULL_AREA, 1).unwrap();
        assert_eq!(
            column(&hf, 0, 0),
            vec![(0, 5, 63), (10, 12, 0), (20, 25, 63)]
        );
    }

    #[test]
    fn test_add_span_merges_overlaps() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 5, RC_NULL_AREA, 1).unwrap();
        hf.add_span(0, 0, 10, 15, RC_NULL_AREA, 1).unwrap();
        hf.add_span(0, 0, 4, 11, RC_WALKABLE_AREA, 1).unwrap();
        // The merged top matches the upper span's top, so the larger area wins.
        assert_eq!(column(&hf, 0, 0), vec![(0, 15, RC_WALKABLE_AREA)]);
        assert_eq!(hf.span_count(), 1);
    }

    #[test]
    fn test_merge_threshold_area() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 10, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 5, 20, RC_NULL_AREA, 1).unwrap();
        // The walkable top is 10 voxels below the new top, beyond the threshold.
        assert_eq!(column(&hf, 0, 0), vec![(0, 20, RC_NULL_AREA)]);

        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 10, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 5, 11, RC_NULL_AREA, 1).unwrap();
        assert_eq!(column(&hf, 0, 0), vec![(0, 11, RC_WALKABLE_AREA)]);
    }

    #[test]
    fn test_free_list_reuse() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 2, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 4, 6, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 1, 5, RC_WALKABLE_AREA, 1).unwrap();
        let pool_len = hf.pool.len();
        hf.add_span(0, 0, 8, 9, RC_WALKABLE_AREA, 1).unwrap();
        assert_eq!(hf.pool.len(), pool_len);
        assert_eq!(hf.span_count(), 2);
    }

    #[test]
    fn test_out_of_bounds_span_is_ignored() {
        let mut hf = field(2, 2);
        hf.add_span(-1, 0, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 5, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
        assert_eq!(hf.span_count(), 0);
        assert!(hf.add_span(0, 0, 5, 1, RC_WALKABLE_AREA, 1).is_err());
    }

    #[test]
    fn test_low_hanging_obstacle_becomes_walkable() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 10, RC_WALKABLE_AREA, 0).unwrap();
        hf.add_span(0, 0, 11, 12, RC_NULL_AREA, 0).unwrap();
        hf.filter_low_hanging_walkable_obstacles(2);
        assert_eq!(column(&hf, 0, 0)[1].2, RC_WALKABLE_AREA);
    }

    #[test]
    fn test_low_height_filter() {
        let mut hf = field(1, 1);
        hf.add_span(0, 0, 0, 10, RC_WALKABLE_AREA, 0).unwrap();
        hf.add_span(0, 0, 12, 14, RC_WALKABLE_AREA, 0).unwrap();
        hf.filter_walkable_low_height_spans(5);
        let col = column(&hf, 0, 0);
        assert_eq!(col[0].2, RC_NULL_AREA);
        assert_eq!(col[1].2, RC_WALKABLE_AREA);
    }

    #[test]
    fn test_ledge_filter_marks_edges() {
        let mut hf = field(5, 5);
        for z in 0..5 {
            for x in 0..5 {
                hf.add_span(x, z, 0, 10, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        hf.filter_ledge_spans(10, 2);
        // Border cells drop off the grid, the interior stays walkable.
        assert_eq!(column(&hf, 0, 2)[0].2, RC_NULL_AREA);
        assert_eq!(column(&hf, 2, 2)[0].2, RC_WALKABLE_AREA);
    }
}
