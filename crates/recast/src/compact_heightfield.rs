//! Compact heightfield representation for Recast
//!
//! The compact heightfield stores the open space above walkable spans
//! together with the 4-connected neighbour links used by the region and
//! contour stages.

use glam::Vec3;
use log::warn;
use recast_common::{Error, Result};

use crate::heightfield::{get_dir_offset_x, get_dir_offset_z, Heightfield};
use crate::RC_NULL_AREA;

/// Neighbour slot value meaning "no connection"
pub const RC_NOT_CONNECTED: u32 = 0x3f;

/// Highest layer index a connection can encode
const MAX_LAYERS: u32 = RC_NOT_CONNECTED - 1;

/// A compact cell in the heightfield
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactCell {
    /// Index of the first span in the cell
    pub index: u32,
    /// Number of spans in the cell
    pub count: u32,
}

/// Open space above a walkable surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactSpan {
    /// Floor of the open space (voxels)
    pub y: u16,
    /// Region id, 0 when unassigned
    pub reg: u16,
    /// Packed neighbour layers, 6 bits per direction
    pub con: u32,
    /// Clearance above the floor (voxels)
    pub h: u8,
}

impl Default for CompactSpan {
    fn default() -> Self {
        Self {
            y: 0,
            reg: 0,
            con: 0x00ff_ffff,
            h: 0,
        }
    }
}

impl CompactSpan {
    /// Neighbour layer in the given direction, `RC_NOT_CONNECTED` if none
    #[inline]
    pub fn get_con(&self, dir: usize) -> u32 {
        (self.con >> (dir * 6)) & 0x3f
    }

    #[inline]
    pub fn set_con(&mut self, dir: usize, layer: u32) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | ((layer & 0x3f) << shift);
    }

    #[inline]
    pub fn is_connected(&self, dir: usize) -> bool {
        self.get_con(dir) != RC_NOT_CONNECTED
    }
}

/// Compact heightfield structure
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CompactHeightfield {
    /// Width of the heightfield along the x-axis
    pub width: i32,
    /// Height (depth) of the heightfield along the z-axis
    pub height: i32,
    /// Walkable height used during the build (voxels)
    pub walkable_height: i32,
    /// Walkable climb used during the build (voxels)
    pub walkable_climb: i32,
    /// Border size used during region building
    pub border_size: i32,
    /// Maximum distance value in the distance field
    pub max_distance: u16,
    /// Number of region ids handed out, exclusive upper bound
    pub max_regions: u16,

    /// The minimum bounds of the heightfield's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the heightfield's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,

    /// Grid of compact cells
    pub cells: Vec<CompactCell>,
    /// Array of compact spans
    pub spans: Vec<CompactSpan>,
    /// Distance to the nearest border per span
    pub dist: Vec<u16>,
    /// Area id per span
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds a compact heightfield from the walkable spans of `hf` and links
    /// neighbouring spans.
    pub fn build_from_heightfield(walkable_height: i32, walkable_climb: i32, hf: &Heightfield) -> Result<Self> {
        let w = hf.width;
        let h = hf.height;
        let span_count = hf.walkable_span_count();

        let mut chf = Self::empty(w, h, walkable_height, walkable_climb, hf.bmin, hf.bmax, hf.cs, hf.ch);
        chf.bmax.y += walkable_height as f32 * hf.ch;
        chf.spans.reserve(span_count);
        chf.areas.reserve(span_count);

        for z in 0..h {
            for x in 0..w {
                let cell = &mut chf.cells[(x + z * w) as usize];
                cell.index = chf.spans.len() as u32;
                for (_, s) in hf.column(x, z) {
                    if s.area == RC_NULL_AREA {
                        continue;
                    }
                    let bot = s.smax as i32;
                    let top = hf.span_ceiling(s);
                    chf.spans.push(CompactSpan {
                        y: bot.clamp(0, 0xffff) as u16,
                        h: (top - bot).clamp(0, 0xff) as u8,
                        ..CompactSpan::default()
                    });
                    chf.areas.push(s.area);
                    cell.count += 1;
                }
            }
        }
        chf.dist = vec![0; chf.spans.len()];

        chf.build_connections()?;
        Ok(chf)
    }

    /// Rebuilds a compact heightfield from per-cell span columns, each entry
    /// `(floor, clearance, area)`. Columns are row-major, `width * height` long.
    #[allow(clippy::too_many_arguments)]
    pub fn from_columns(
        width: i32,
        height: i32,
        walkable_height: i32,
        walkable_climb: i32,
        bmin: Vec3,
        bmax: Vec3,
        cs: f32,
        ch: f32,
        columns: &[Vec<(u16, u8, u8)>],
    ) -> Result<Self> {
        if columns.len() != (width.max(0) * height.max(0)) as usize {
            return Err(Error::Recast(format!(
                "expected {} columns, got {}",
                width * height,
                columns.len()
            )));
        }
        let mut chf = Self::empty(width, height, walkable_height, walkable_climb, bmin, bmax, cs, ch);
        for (cell, col) in chf.cells.iter_mut().zip(columns) {
            cell.index = chf.spans.len() as u32;
            cell.count = col.len() as u32;
            for &(y, h, area) in col {
                chf.spans.push(CompactSpan {
                    y,
                    h,
                    ..CompactSpan::default()
                });
                chf.areas.push(area);
            }
        }
        chf.dist = vec![0; chf.spans.len()];
        chf.build_connections()?;
        Ok(chf)
    }

    #[allow(clippy::too_many_arguments)]
    fn empty(
        width: i32,
        height: i32,
        walkable_height: i32,
        walkable_climb: i32,
        bmin: Vec3,
        bmax: Vec3,
        cs: f32,
        ch: f32,
    ) -> Self {
        Self {
            width,
            height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_regions: 0,
            bmin,
            bmax,
            cs,
            ch,
            cells: vec![CompactCell::default(); (width.max(0) * height.max(0)) as usize],
            spans: Vec::new(),
            dist: Vec::new(),
            areas: Vec::new(),
        }
    }

    /// Links every span to the neighbour span it can step onto in each of the
    /// four directions. Among several candidates the one with the closest
    /// floor wins; steps above the climb limit are never linked.
    pub fn build_connections(&mut self) -> Result<()> {
        let w = self.width;
        let h = self.height;
        let mut too_high_neighbour = 0u32;

        for z in 0..h {
            for x in 0..w {
                let c = self.cells[(x + z * w) as usize];
                for i in c.index..c.index + c.count {
                    let s = self.spans[i as usize];
                    let mut con = s;
                    for dir in 0..4 {
                        con.set_con(dir, RC_NOT_CONNECTED);
                        let nx = x + get_dir_offset_x(dir);
                        let nz = z + get_dir_offset_z(dir);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }

                        let nc = self.cells[(nx + nz * w) as usize];
                        let mut best: Option<(u32, i32)> = None;
                        for k in nc.index..nc.index + nc.count {
                            let ns = &self.spans[k as usize];
                            let bot = s.y.max(ns.y) as i32;
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);
                            let step = (ns.y as i32 - s.y as i32).abs();
                            if top - bot >= self.walkable_height && step <= self.walkable_climb {
                                let layer = k - nc.index;
                                if layer > MAX_LAYERS {
                                    too_high_neighbour = too_high_neighbour.max(layer);
                                    continue;
                                }
                                if best.map_or(true, |(_, d)| step < d) {
                                    best = Some((layer, step));
                                }
                            }
                        }
                        if let Some((layer, _)) = best {
                            con.set_con(dir, layer);
                        }
                    }
                    self.spans[i as usize].con = con.con;
                }
            }
        }

        if too_high_neighbour > MAX_LAYERS {
            warn!(
                "compact heightfield has too many layers {} (max: {})",
                too_high_neighbour, MAX_LAYERS
            );
        }
        Ok(())
    }

    #[inline]
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Total number of spans
    #[inline]
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Index of the neighbour of span `i` at `(x, z)` in direction `dir`, if linked
    #[inline]
    pub fn neighbour(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let s = &self.spans[i];
        if !s.is_connected(dir) {
            return None;
        }
        let nx = x + get_dir_offset_x(dir);
        let nz = z + get_dir_offset_z(dir);
        Some((self.cell(nx, nz).index + s.get_con(dir)) as usize)
    }

    /// Per-cell `(floor, clearance, area)` columns, the inverse of `from_columns`
    pub fn to_columns(&self) -> Vec<Vec<(u16, u8, u8)>> {
        self.cells
            .iter()
            .map(|c| {
                (c.index..c.index + c.count)
                    .map(|i| {
                        let s = &self.spans[i as usize];
                        (s.y, s.h, self.areas[i as usize])
                    })
                    .collect()
            })
            .collect()
    }
}
