//! Triangle rasterization for Recast
//!
//! Triangles are clipped row by row and then column by column into per-cell
//! polygons. The vertical extent of each cell polygon becomes a solid span.

use glam::Vec3;
use recast_common::{deg_to_rad, Result};

use crate::heightfield::Heightfield;
use crate::{RC_NULL_AREA, RC_WALKABLE_AREA, SPAN_MAX_HEIGHT};

/// A span produced by rasterizing a single triangle, before it is merged
/// into a heightfield column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSpan {
    pub x: i32,
    pub z: i32,
    pub smin: u16,
    pub smax: u16,
    pub area: u8,
    pub flag_merge_threshold: i32,
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Splits a convex polygon by an axis-aligned line. `below` receives the part
/// with coordinates under `axis_offset`, `above` the remainder. Vertices on
/// the line go to both.
fn divide_poly(input: &[Vec3], below: &mut Vec<Vec3>, above: &mut Vec<Vec3>, axis_offset: f32, axis: Axis) {
    below.clear();
    above.clear();
    let n = input.len();
    if n == 0 {
        return;
    }

    let delta: Vec<f32> = input.iter().map(|v| axis_offset - axis.of(*v)).collect();

    let mut b = n - 1;
    for a in 0..n {
        let same_side = (delta[a] >= 0.0) == (delta[b] >= 0.0);
        if !same_side {
            let s = delta[b] / (delta[b] - delta[a]);
            let p = input[b] + (input[a] - input[b]) * s;
            below.push(p);
            above.push(p);
            if delta[a] > 0.0 {
                below.push(input[a]);
            } else if delta[a] < 0.0 {
                above.push(input[a]);
            }
        } else {
            if delta[a] >= 0.0 {
                below.push(input[a]);
                if delta[a] != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(input[a]);
        }
        b = a;
    }
}

/// Rasterizes one triangle against the heightfield grid and appends the
/// resulting spans to `out`. Nothing is emitted for triangles outside the
/// field bounds or with no area after clipping.
pub fn rasterize_triangle_spans(
    hf: &Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
    out: &mut Vec<RasterSpan>,
) {
    let tri_min = v0.min(v1).min(v2);
    let tri_max = v0.max(v1).max(v2);
    if !recast_common::overlap_bounds(tri_min, tri_max, hf.bmin, hf.bmax) {
        return;
    }

    let w = hf.width;
    let h = hf.height;
    let by = hf.bmax.y - hf.bmin.y;
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;

    let z0 = (((tri_min.z - hf.bmin.z) * ics) as i32).clamp(-1, h - 1);
    let z1 = (((tri_max.z - hf.bmin.z) * ics) as i32).clamp(0, h - 1);

    let mut remaining = vec![v0, v1, v2];
    let mut row = Vec::with_capacity(7);
    let mut rest = Vec::with_capacity(7);
    let mut cell = Vec::with_capacity(7);
    let mut row_rest = Vec::with_capacity(7);

    for z in z0..=z1 {
        let cell_z = hf.bmin.z + z as f32 * hf.cs;
        divide_poly(&remaining, &mut row, &mut rest, cell_z + hf.cs, Axis::Z);
        std::mem::swap(&mut remaining, &mut rest);
        if row.len() < 3 || z < 0 {
            continue;
        }

        let (min_x, max_x) = row
            .iter()
            .fold((row[0].x, row[0].x), |(mn, mx), v| (mn.min(v.x), mx.max(v.x)));
        let x0 = ((min_x - hf.bmin.x) * ics) as i32;
        let x1 = ((max_x - hf.bmin.x) * ics) as i32;
        if x1 < 0 || x0 >= w {
            continue;
        }
        let x0 = x0.clamp(-1, w - 1);
        let x1 = x1.clamp(0, w - 1);

        for x in x0..=x1 {
            let cell_x = hf.bmin.x + x as f32 * hf.cs;
            divide_poly(&row, &mut cell, &mut row_rest, cell_x + hf.cs, Axis::X);
            std::mem::swap(&mut row, &mut row_rest);
            if cell.len() < 3 || x < 0 {
                continue;
            }

            let (mut span_min, mut span_max) = cell
                .iter()
                .fold((cell[0].y, cell[0].y), |(mn, mx), v| (mn.min(v.y), mx.max(v.y)));
            span_min -= hf.bmin.y;
            span_max -= hf.bmin.y;
            if span_max < 0.0 || span_min > by {
                continue;
            }
            span_min = span_min.max(0.0);
            span_max = span_max.min(by);

            let smin = ((span_min * ich).floor() as i32).clamp(0, SPAN_MAX_HEIGHT as i32);
            let smax = ((span_max * ich).ceil() as i32).clamp(smin + 1, SPAN_MAX_HEIGHT as i32);

            out.push(RasterSpan {
                x,
                z,
                smin: smin as u16,
                smax: smax as u16,
                area,
                flag_merge_threshold,
            });
        }
    }
}

/// Rasterizes a triangle into the heightfield.
pub fn rasterize_triangle(
    hf: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
) -> Result<()> {
    let mut spans = Vec::new();
    rasterize_triangle_spans(hf, v0, v1, v2, area, flag_merge_threshold, &mut spans);
    for s in spans {
        hf.add_span(s.x, s.z, s.smin, s.smax, s.area, s.flag_merge_threshold)?;
    }
    Ok(())
}

/// Rasterizes an indexed triangle list, one area id per triangle.
pub fn rasterize_triangles(
    hf: &mut Heightfield,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &[u8],
    flag_merge_threshold: i32,
) -> Result<()> {
    let mut spans = Vec::new();
    for (tri, &area) in tris.iter().zip(areas) {
        spans.clear();
        rasterize_triangle_spans(
            hf,
            verts[tri[0] as usize],
            verts[tri[1] as usize],
            verts[tri[2] as usize],
            area,
            flag_merge_threshold,
            &mut spans,
        );
        for s in &spans {
            hf.add_span(s.x, s.z, s.smin, s.smax, s.area, s.flag_merge_threshold)?;
        }
    }
    Ok(())
}

#[inline]
fn tri_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

/// Sets the area of every triangle whose slope is below `walkable_slope_angle`
/// to `RC_WALKABLE_AREA`. A triangle exactly at the limit is not walkable.
pub fn mark_walkable_triangles(walkable_slope_angle: f32, verts: &[Vec3], tris: &[[u32; 3]], areas: &mut [u8]) {
    let walkable_thr = deg_to_rad(walkable_slope_angle).cos();
    for (tri, area) in tris.iter().zip(areas.iter_mut()) {
        let n = tri_normal(verts[tri[0] as usize], verts[tri[1] as usize], verts[tri[2] as usize]);
        if n.y > walkable_thr {
            *area = RC_WALKABLE_AREA;
        }
    }
}

/// Clears the area of every triangle that is too steep to walk on.
pub fn clear_unwalkable_triangles(walkable_slope_angle: f32, verts: &[Vec3], tris: &[[u32; 3]], areas: &mut [u8]) {
    let walkable_thr = deg_to_rad(walkable_slope_angle).cos();
    for (tri, area) in tris.iter().zip(areas.iter_mut()) {
        let n = tri_normal(verts[tri[0] as usize], verts[tri[1] as usize], verts[tri[2] as usize]);
        if n.y <= walkable_thr {
            *area = RC_NULL_AREA;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Heightfield {
        Heightfield::new(10, 10, Vec3::ZERO, Vec3::new(10.0, 10.0, 10.0), 1.0, 0.5)
    }

    #[test]
    fn test_flat_triangle_covers_cells() {
        let hf = field();
        let mut spans = Vec::new();
        rasterize_triangle_spans(
            &hf,
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 4.0),
            Vec3::new(4.0, 1.0, 0.0),
            RC_WALKABLE_AREA,
            1,
            &mut spans,
        );
        assert!(!spans.is_empty());
        for s in &spans {
            assert!(s.x >= 0 && s.x < 4 && s.z >= 0 && s.z < 4);
            assert_eq!(s.smin, 2);
            assert_eq!(s.smax, 3);
        }
        assert!(spans.iter().any(|s| s.x == 0 && s.z == 0));
    }

    #[test]
    fn test_triangle_outside_bounds_emits_nothing() {
        let hf = field();
        let mut spans = Vec::new();
        rasterize_triangle_spans(
            &hf,
            Vec3::new(20.0, 1.0, 20.0),
            Vec3::new(20.0, 1.0, 24.0),
            Vec3::new(24.0, 1.0, 20.0),
            RC_WALKABLE_AREA,
            1,
            &mut spans,
        );
        assert!(spans.is_empty());

        // Below the field
        rasterize_triangle_spans(
            &hf,
            Vec3::new(0.0, -5.0, 0.0),
            Vec3::new(0.0, -5.0, 4.0),
            Vec3::new(4.0, -5.0, 0.0),
            RC_WALKABLE_AREA,
            1,
            &mut spans,
        );
        assert!(spans.is_empty());
    }

    #[test]
    fn test_degenerate_triangle_emits_nothing() {
        let hf = field();
        let mut spans = Vec::new();
        let p = Vec3::new(2.5, 1.0, 2.5);
        rasterize_triangle_spans(&hf, p, p, p, RC_WALKABLE_AREA, 1, &mut spans);
        assert!(spans.is_empty());
    }

    #[test]
    fn test_partially_outside_triangle_is_clipped() {
        let mut hf = field();
        rasterize_triangle(
            &mut hf,
            Vec3::new(-5.0, 1.0, -5.0),
            Vec3::new(-5.0, 1.0, 15.0),
            Vec3::new(15.0, 1.0, -5.0),
            RC_WALKABLE_AREA,
            1,
        )
        .unwrap();
        assert!(hf.span_count() > 0);
        assert!(hf.column_head(0, 0).is_some());
        assert!(hf.column_head(9, 9).is_none());
    }

    #[test]
    fn test_slope_classification() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
            // Vertical wall
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
        ];
        let tris = vec![[0, 1, 2], [3, 4, 5]];
        let mut areas = vec![RC_NULL_AREA; 2];
        mark_walkable_triangles(45.0, &verts, &tris, &mut areas);
        assert_eq!(areas, vec![RC_WALKABLE_AREA, RC_NULL_AREA]);

        clear_unwalkable_triangles(45.0, &verts, &tris, &mut areas);
        assert_eq!(areas, vec![RC_WALKABLE_AREA, RC_NULL_AREA]);
    }

    #[test]
    fn test_slope_at_threshold_is_not_walkable() {
        // A flat floor has normal.y == cos(0) exactly.
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        ];
        let tris = vec![[0, 1, 2]];
        let mut areas = vec![RC_NULL_AREA];
        mark_walkable_triangles(0.0, &verts, &tris, &mut areas);
        assert_eq!(areas[0], RC_NULL_AREA);

        let mut areas = vec![RC_WALKABLE_AREA];
        clear_unwalkable_triangles(0.0, &verts, &tris, &mut areas);
        assert_eq!(areas[0], RC_NULL_AREA);
    }

    #[test]
    fn test_span_height_clamped_to_field() {
        let hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 2.0, 4.0), 1.0, 0.5);
        let mut spans = Vec::new();
        rasterize_triangle_spans(
            &hf,
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::new(0.0, 5.0, 4.0),
            Vec3::new(4.0, 5.0, 0.0),
            RC_WALKABLE_AREA,
            1,
            &mut spans,
        );
        assert!(!spans.is_empty());
        assert!(spans.iter().all(|s| s.smax <= 4 && s.smin < s.smax));
    }
}
