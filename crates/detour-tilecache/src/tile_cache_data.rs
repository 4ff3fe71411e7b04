//! Compressed tile layers
//!
//! A layer keeps the walkable spans of one tile after heightfield filtering
//! but before erosion, so obstacles can be painted in and the tile rebuilt
//! without touching the input geometry again.
//!
//! Layout, little-endian: an uncompressed header (`DTLR` magic, version, tile
//! location, bounds, grid size) followed by an LZ4 block holding, per cell,
//! the span count and `(floor, clearance, area)` for each span.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use detour::{Result, Status};
use glam::Vec3;
use log::{error, warn};
use recast::CompactHeightfield;

/// Layer blob magic ('DTLR')
pub const DT_TILECACHE_MAGIC: u32 = (b'D' as u32) << 24 | (b'T' as u32) << 16 | (b'L' as u32) << 8 | b'R' as u32;
/// Layer blob version
pub const DT_TILECACHE_VERSION: u32 = 1;

/// Size of the uncompressed header in bytes
pub const LAYER_HEADER_SIZE: usize = 62;

/// Location and grid of a tile layer
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheLayerHeader {
    pub tx: i32,
    pub ty: i32,
    pub tlayer: i32,
    /// Bounds of the grid including the border
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub width: u16,
    pub height: u16,
    /// Cells on each side that belong to the neighbouring tiles
    pub border_size: u16,
    /// Agent height in voxels the connections were built for
    pub walkable_height: u16,
    /// Agent climb in voxels the connections were built for
    pub walkable_climb: u16,
}

impl TileCacheLayerHeader {
    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(DT_TILECACHE_MAGIC)?;
        w.write_u32::<LittleEndian>(DT_TILECACHE_VERSION)?;
        w.write_i32::<LittleEndian>(self.tx)?;
        w.write_i32::<LittleEndian>(self.ty)?;
        w.write_i32::<LittleEndian>(self.tlayer)?;
        for v in [self.bmin, self.bmax] {
            w.write_f32::<LittleEndian>(v.x)?;
            w.write_f32::<LittleEndian>(v.y)?;
            w.write_f32::<LittleEndian>(v.z)?;
        }
        w.write_f32::<LittleEndian>(self.cs)?;
        w.write_f32::<LittleEndian>(self.ch)?;
        w.write_u16::<LittleEndian>(self.width)?;
        w.write_u16::<LittleEndian>(self.height)?;
        w.write_u16::<LittleEndian>(self.border_size)?;
        w.write_u16::<LittleEndian>(self.walkable_height)?;
        w.write_u16::<LittleEndian>(self.walkable_climb)
    }

    /// Parses the header at the front of a layer blob.
    pub fn read(data: &[u8]) -> Result<Self> {
        if data.len() < LAYER_HEADER_SIZE {
            return Err(Status::failure(Status::INVALID_PARAM));
        }
        let mut r = Cursor::new(data);
        if r.read_u32::<LittleEndian>()? != DT_TILECACHE_MAGIC {
            return Err(Status::failure(Status::WRONG_MAGIC));
        }
        if r.read_u32::<LittleEndian>()? != DT_TILECACHE_VERSION {
            return Err(Status::failure(Status::WRONG_VERSION));
        }
        let tx = r.read_i32::<LittleEndian>()?;
        let ty = r.read_i32::<LittleEndian>()?;
        let tlayer = r.read_i32::<LittleEndian>()?;
        let mut bounds = [Vec3::ZERO; 2];
        for b in &mut bounds {
            *b = Vec3::new(
                r.read_f32::<LittleEndian>()?,
                r.read_f32::<LittleEndian>()?,
                r.read_f32::<LittleEndian>()?,
            );
        }
        Ok(Self {
            tx,
            ty,
            tlayer,
            bmin: bounds[0],
            bmax: bounds[1],
            cs: r.read_f32::<LittleEndian>()?,
            ch: r.read_f32::<LittleEndian>()?,
            width: r.read_u16::<LittleEndian>()?,
            height: r.read_u16::<LittleEndian>()?,
            border_size: r.read_u16::<LittleEndian>()?,
            walkable_height: r.read_u16::<LittleEndian>()?,
            walkable_climb: r.read_u16::<LittleEndian>()?,
        })
    }

    /// Number of cells in the grid
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Walkable span of a layer cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerSpan {
    /// Floor height in voxels
    pub floor: u16,
    /// Free space above the floor in voxels
    pub clearance: u8,
    pub area: u8,
}

/// Decompressed tile layer
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCacheLayer {
    pub header: TileCacheLayerHeader,
    /// Span count per cell, row-major
    pub counts: Vec<u16>,
    /// Spans of all cells in cell order, bottom-up within a cell
    pub spans: Vec<LayerSpan>,
}

impl TileCacheLayer {
    /// Captures the spans of a compact heightfield as the layer of tile
    /// `(tx, ty, tlayer)`.
    pub fn from_compact(tx: i32, ty: i32, tlayer: i32, chf: &CompactHeightfield) -> Self {
        let header = TileCacheLayerHeader {
            tx,
            ty,
            tlayer,
            bmin: chf.bmin,
            bmax: chf.bmax,
            cs: chf.cs,
            ch: chf.ch,
            width: chf.width.clamp(0, u16::MAX as i32) as u16,
            height: chf.height.clamp(0, u16::MAX as i32) as u16,
            border_size: chf.border_size.clamp(0, u16::MAX as i32) as u16,
            walkable_height: chf.walkable_height.clamp(0, u16::MAX as i32) as u16,
            walkable_climb: chf.walkable_climb.clamp(0, u16::MAX as i32) as u16,
        };
        let counts = chf.cells.iter().map(|c| c.count.min(u16::MAX as u32) as u16).collect();
        let spans = chf
            .cells
            .iter()
            .flat_map(|c| c.index..c.index + c.count.min(u16::MAX as u32))
            .map(|i| {
                let s = &chf.spans[i as usize];
                LayerSpan {
                    floor: s.y,
                    clearance: s.h,
                    area: chf.areas[i as usize],
                }
            })
            .collect();
        Self { header, counts, spans }
    }

    /// Rebuilds the compact heightfield the layer was captured from, with
    /// fresh neighbour connections and no regions.
    pub fn to_compact(&self) -> recast_common::Result<CompactHeightfield> {
        let h = &self.header;
        let mut spans = self.spans.iter();
        let columns: Vec<Vec<(u16, u8, u8)>> = self
            .counts
            .iter()
            .map(|&n| {
                spans
                    .by_ref()
                    .take(n as usize)
                    .map(|s| (s.floor, s.clearance, s.area))
                    .collect()
            })
            .collect();
        let mut chf = CompactHeightfield::from_columns(
            h.width as i32,
            h.height as i32,
            h.walkable_height as i32,
            h.walkable_climb as i32,
            h.bmin,
            h.bmax,
            h.cs,
            h.ch,
            &columns,
        )?;
        chf.border_size = h.border_size as i32;
        Ok(chf)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    /// Serializes and compresses the layer.
    pub fn compress(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.counts.len() * 2 + self.spans.len() * 4);
        for &n in &self.counts {
            payload.extend_from_slice(&n.to_le_bytes());
        }
        for s in &self.spans {
            payload.extend_from_slice(&s.floor.to_le_bytes());
            payload.push(s.clearance);
            payload.push(s.area);
        }

        let mut out = Vec::with_capacity(LAYER_HEADER_SIZE + payload.len() / 2);
        // Writing into a Vec cannot fail.
        let _ = self.header.write(&mut out);
        out.extend_from_slice(&lz4_flex::compress_prepend_size(&payload));
        out
    }

    /// Parses a compressed layer blob.
    pub fn decompress(data: &[u8]) -> Result<Self> {
        let header = TileCacheLayerHeader::read(data)?;
        let payload = lz4_flex::decompress_size_prepended(&data[LAYER_HEADER_SIZE..]).map_err(|e| {
            error!("failed to decompress layer ({}, {}): {}", header.tx, header.ty, e);
            Status::failure(Status::INVALID_PARAM)
        })?;

        let cells = header.cell_count();
        let mut r = Cursor::new(payload.as_slice());
        let mut counts = Vec::with_capacity(cells);
        for _ in 0..cells {
            counts.push(r.read_u16::<LittleEndian>()?);
        }
        let total: usize = counts.iter().map(|&n| n as usize).sum();
        let mut spans = Vec::with_capacity(total);
        let mut raw = [0u8; 4];
        for _ in 0..total {
            r.read_exact(&mut raw)?;
            spans.push(LayerSpan {
                floor: u16::from_le_bytes([raw[0], raw[1]]),
                clearance: raw[2],
                area: raw[3],
            });
        }
        if (r.position() as usize) != payload.len() {
            warn!(
                "layer ({}, {}) has {} trailing bytes",
                header.tx,
                header.ty,
                payload.len() - r.position() as usize
            );
        }
        Ok(Self { header, counts, spans })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recast::{Heightfield, RC_NULL_AREA, RC_WALKABLE_AREA};

    /// 6x4 field with a raised 2x2 step and a hole
    fn stepped_chf() -> CompactHeightfield {
        let mut hf = Heightfield::new(6, 4, Vec3::ZERO, Vec3::new(6.0, 10.0, 4.0), 1.0, 0.5);
        for z in 0..4 {
            for x in 0..6 {
                if (x, z) == (5, 3) {
                    continue;
                }
                let top = if x >= 3 && z < 2 { 2 } else { 1 };
                hf.add_span(x, z, 0, top, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(3, 1, &hf).unwrap();
        chf.areas[0] = RC_NULL_AREA;
        chf
    }

    #[test]
    fn test_layer_keeps_spans_and_connections() {
        let chf = stepped_chf();
        let layer = TileCacheLayer::from_compact(2, 3, 0, &chf);
        assert_eq!(layer.counts.len(), 24);
        assert_eq!(layer.span_count(), 23);

        let blob = layer.compress();
        assert_eq!(TileCacheLayerHeader::read(&blob).unwrap(), layer.header);
        let back = TileCacheLayer::decompress(&blob).unwrap();
        assert_eq!(back, layer);

        let rebuilt = back.to_compact().unwrap();
        assert_eq!(rebuilt.cells, chf.cells);
        assert_eq!(rebuilt.areas, chf.areas);
        for (a, b) in rebuilt.spans.iter().zip(&chf.spans) {
            assert_eq!((a.y, a.h, a.con), (b.y, b.h, b.con));
        }
    }

    #[test]
    fn test_compression_is_deterministic() {
        let layer = TileCacheLayer::from_compact(0, 0, 0, &stepped_chf());
        assert_eq!(layer.compress(), layer.compress());
    }

    #[test]
    fn test_rejects_foreign_blobs() {
        let blob = TileCacheLayer::from_compact(0, 0, 0, &stepped_chf()).compress();

        let mut bad = blob.clone();
        bad[0] ^= 0xff;
        assert!(TileCacheLayer::decompress(&bad).unwrap_err().has_detail(Status::WRONG_MAGIC));

        let mut bad = blob.clone();
        bad[4] = 9;
        assert!(TileCacheLayer::decompress(&bad).unwrap_err().has_detail(Status::WRONG_VERSION));

        assert!(TileCacheLayer::decompress(&blob[..LAYER_HEADER_SIZE - 1]).is_err());
        assert!(TileCacheLayer::decompress(&blob[..blob.len() - 3]).is_err());
    }
}
