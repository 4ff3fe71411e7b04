//! Area marking operations for Recast
//!
//! Erosion, median filtering and shape-based area painting on a compact
//! heightfield. Shapes are given in world units.

use glam::Vec3;
use log::debug;
use recast_common::point_in_polygon;

use crate::compact_heightfield::CompactHeightfield;
use crate::heightfield::{get_dir_offset_x, get_dir_offset_z};
use crate::RC_NULL_AREA;

/// Removes walkable area within `radius` voxels of any unwalkable span or
/// unlinked edge. Distances use a 2-3 chamfer metric in half voxels.
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) {
    let w = chf.width;
    let h = chf.height;
    let mut dist = vec![0xffu8; chf.span_count()];

    // Boundary spans start at zero.
    for z in 0..h {
        for x in 0..w {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] == RC_NULL_AREA {
                    dist[i] = 0;
                    continue;
                }
                let walkable_neighbours = (0..4)
                    .filter_map(|dir| chf.neighbour(x, z, i, dir))
                    .filter(|&ni| chf.areas[ni] != RC_NULL_AREA)
                    .count();
                if walkable_neighbours != 4 {
                    dist[i] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut [u8], i: usize, from: usize, cost: u8| {
        let nd = dist[from].saturating_add(cost);
        if nd < dist[i] {
            dist[i] = nd;
        }
    };

    // Pass 1: (-1,0), (-1,-1), (0,-1), (1,-1)
    for z in 0..h {
        for x in 0..w {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if let Some(ai) = chf.neighbour(x, z, i, 0) {
                    relax(&mut dist, i, ai, 2);
                    let ax = x + get_dir_offset_x(0);
                    if let Some(aai) = chf.neighbour(ax, z, ai, 3) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbour(x, z, i, 3) {
                    relax(&mut dist, i, ai, 2);
                    let az = z + get_dir_offset_z(3);
                    if let Some(aai) = chf.neighbour(x, az, ai, 2) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    // Pass 2: (1,0), (1,1), (0,1), (-1,1)
    for z in (0..h).rev() {
        for x in (0..w).rev() {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if let Some(ai) = chf.neighbour(x, z, i, 2) {
                    relax(&mut dist, i, ai, 2);
                    let ax = x + get_dir_offset_x(2);
                    if let Some(aai) = chf.neighbour(ax, z, ai, 1) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbour(x, z, i, 1) {
                    relax(&mut dist, i, ai, 2);
                    let az = z + get_dir_offset_z(1);
                    if let Some(aai) = chf.neighbour(x, az, ai, 0) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    let thr = (radius * 2).clamp(0, 255) as u8;
    let mut eroded = 0usize;
    for (area, d) in chf.areas.iter_mut().zip(&dist) {
        if *d < thr && *area != RC_NULL_AREA {
            *area = RC_NULL_AREA;
            eroded += 1;
        }
    }
    debug!("erosion radius {} cleared {} spans", radius, eroded);
}

/// Replaces each walkable area id with the median of its 3x3 neighbourhood.
pub fn median_filter_walkable_area(chf: &mut CompactHeightfield) {
    let w = chf.width;
    let h = chf.height;
    let mut areas = vec![0xffu8; chf.span_count()];

    for z in 0..h {
        for x in 0..w {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if chf.areas[i] == RC_NULL_AREA {
                    areas[i] = chf.areas[i];
                    continue;
                }

                let mut nei = [chf.areas[i]; 9];
                for dir in 0..4 {
                    let Some(ai) = chf.neighbour(x, z, i, dir) else {
                        continue;
                    };
                    if chf.areas[ai] != RC_NULL_AREA {
                        nei[dir * 2] = chf.areas[ai];
                    }
                    let ax = x + get_dir_offset_x(dir);
                    let az = z + get_dir_offset_z(dir);
                    let dir2 = (dir + 1) & 0x3;
                    if let Some(ai2) = chf.neighbour(ax, az, ai, dir2) {
                        if chf.areas[ai2] != RC_NULL_AREA {
                            nei[dir * 2 + 1] = chf.areas[ai2];
                        }
                    }
                }
                nei.sort_unstable();
                areas[i] = nei[4];
            }
        }
    }

    chf.areas = areas;
}

/// Voxel-space box covered by world bounds, clipped to the grid. `None` when
/// the box misses the grid.
fn voxel_bounds(chf: &CompactHeightfield, bmin: Vec3, bmax: Vec3) -> Option<(i32, i32, i32, i32, i32, i32)> {
    let minx = ((bmin.x - chf.bmin.x) / chf.cs) as i32;
    let miny = ((bmin.y - chf.bmin.y) / chf.ch) as i32;
    let minz = ((bmin.z - chf.bmin.z) / chf.cs) as i32;
    let maxx = ((bmax.x - chf.bmin.x) / chf.cs) as i32;
    let maxy = ((bmax.y - chf.bmin.y) / chf.ch) as i32;
    let maxz = ((bmax.z - chf.bmin.z) / chf.cs) as i32;

    if maxx < 0 || minx >= chf.width || maxz < 0 || minz >= chf.height {
        return None;
    }
    Some((
        minx.max(0),
        miny,
        minz.max(0),
        maxx.min(chf.width - 1),
        maxy,
        maxz.min(chf.height - 1),
    ))
}

fn paint_column(chf: &mut CompactHeightfield, x: i32, z: i32, miny: i32, maxy: i32, area_id: u8) {
    let c = chf.cell(x, z);
    for i in c.index as usize..(c.index + c.count) as usize {
        let y = chf.spans[i].y as i32;
        if y >= miny && y <= maxy && chf.areas[i] != RC_NULL_AREA {
            chf.areas[i] = area_id;
        }
    }
}

/// Sets the area id of every walkable span whose floor lies inside the box.
pub fn mark_box_area(chf: &mut CompactHeightfield, bmin: Vec3, bmax: Vec3, area_id: u8) {
    let Some((minx, miny, minz, maxx, maxy, maxz)) = voxel_bounds(chf, bmin, bmax) else {
        return;
    };
    for z in minz..=maxz {
        for x in minx..=maxx {
            paint_column(chf, x, z, miny, maxy, area_id);
        }
    }
}

/// Sets the area id of every walkable span inside a vertical cylinder whose
/// base centre is `pos`.
pub fn mark_cylinder_area(chf: &mut CompactHeightfield, pos: Vec3, radius: f32, height: f32, area_id: u8) {
    let bmin = Vec3::new(pos.x - radius, pos.y, pos.z - radius);
    let bmax = Vec3::new(pos.x + radius, pos.y + height, pos.z + radius);
    let Some((minx, miny, minz, maxx, maxy, maxz)) = voxel_bounds(chf, bmin, bmax) else {
        return;
    };
    let r2 = radius * radius;
    for z in minz..=maxz {
        for x in minx..=maxx {
            let sx = chf.bmin.x + (x as f32 + 0.5) * chf.cs;
            let sz = chf.bmin.z + (z as f32 + 0.5) * chf.cs;
            let dx = sx - pos.x;
            let dz = sz - pos.z;
            if dx * dx + dz * dz < r2 {
                paint_column(chf, x, z, miny, maxy, area_id);
            }
        }
    }
}

/// Sets the area id of every walkable span inside a convex polygon extruded
/// from `hmin` to `hmax`.
pub fn mark_convex_poly_area(chf: &mut CompactHeightfield, verts: &[Vec3], hmin: f32, hmax: f32, area_id: u8) {
    if verts.len() < 3 {
        return;
    }
    let mut bmin = verts[0];
    let mut bmax = verts[0];
    for v in &verts[1..] {
        bmin = bmin.min(*v);
        bmax = bmax.max(*v);
    }
    bmin.y = hmin;
    bmax.y = hmax;

    let Some((minx, miny, minz, maxx, maxy, maxz)) = voxel_bounds(chf, bmin, bmax) else {
        return;
    };
    for z in minz..=maxz {
        for x in minx..=maxx {
            let p = Vec3::new(
                chf.bmin.x + (x as f32 + 0.5) * chf.cs,
                0.0,
                chf.bmin.z + (z as f32 + 0.5) * chf.cs,
            );
            if point_in_polygon(p, verts) {
                paint_column(chf, x, z, miny, maxy, area_id);
            }
        }
    }
}

/// Sets the area id of every walkable span inside a box rotated about the
/// Y axis by `y_radians`.
pub fn mark_rotated_box_area(
    chf: &mut CompactHeightfield,
    center: Vec3,
    half_extents: Vec3,
    y_radians: f32,
    area_id: u8,
) {
    let (sin, cos) = y_radians.sin_cos();
    let corner = |sx: f32, sz: f32| {
        let lx = sx * half_extents.x;
        let lz = sz * half_extents.z;
        Vec3::new(
            center.x + lx * cos + lz * sin,
            center.y,
            center.z - lx * sin + lz * cos,
        )
    };
    let verts = [
        corner(-1.0, -1.0),
        corner(-1.0, 1.0),
        corner(1.0, 1.0),
        corner(1.0, -1.0),
    ];
    mark_convex_poly_area(
        chf,
        &verts,
        center.y - half_extents.y,
        center.y + half_extents.y,
        area_id,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::RC_WALKABLE_AREA;

    fn flat_chf(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 10.0, size as f32),
            1.0,
            1.0,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build_from_heightfield(2, 1, &hf).unwrap()
    }

    fn area_at(chf: &CompactHeightfield, x: i32, z: i32) -> u8 {
        chf.areas[chf.cell(x, z).index as usize]
    }

    #[test]
    fn test_erode_clears_border() {
        let mut chf = flat_chf(10);
        erode_walkable_area(&mut chf, 2);
        assert_eq!(area_at(&chf, 0, 5), RC_NULL_AREA);
        assert_eq!(area_at(&chf, 1, 5), RC_NULL_AREA);
        assert_eq!(area_at(&chf, 5, 5), RC_WALKABLE_AREA);
    }

    #[test]
    fn test_mark_box_and_cylinder() {
        let mut chf = flat_chf(10);
        mark_box_area(&mut chf, Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.5, 5.0, 2.5), 7);
        assert_eq!(area_at(&chf, 1, 1), 7);
        assert_eq!(area_at(&chf, 5, 5), RC_WALKABLE_AREA);

        mark_cylinder_area(&mut chf, Vec3::new(7.0, 0.0, 7.0), 1.2, 3.0, 9);
        assert_eq!(area_at(&chf, 6, 6), 9);
        assert_eq!(area_at(&chf, 9, 9), RC_WALKABLE_AREA);
    }

    #[test]
    fn test_mark_rotated_box() {
        let mut chf = flat_chf(10);
        mark_rotated_box_area(
            &mut chf,
            Vec3::new(5.0, 0.0, 5.0),
            Vec3::new(3.0, 2.0, 0.6),
            std::f32::consts::FRAC_PI_2,
            RC_NULL_AREA,
        );
        // Rotated a quarter turn, the long side runs along z.
        assert_eq!(area_at(&chf, 5, 3), RC_NULL_AREA);
        assert_eq!(area_at(&chf, 3, 5), RC_WALKABLE_AREA);
    }

    #[test]
    fn test_median_filter_removes_speck() {
        let mut chf = flat_chf(5);
        let i = chf.cell(2, 2).index as usize;
        chf.areas[i] = 5;
        median_filter_walkable_area(&mut chf);
        assert_eq!(area_at(&chf, 2, 2), RC_WALKABLE_AREA);
    }
}
