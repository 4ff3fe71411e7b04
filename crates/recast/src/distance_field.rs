//! Distance field generation for watershed partitioning

use log::debug;
use recast_common::Result;

use crate::compact_heightfield::CompactHeightfield;
use crate::heightfield::{get_dir_offset_x, get_dir_offset_z};

/// Computes the distance of every span to the nearest region boundary
/// (unlinked edge or area change), smooths it with a 3x3 box blur and stores
/// the result in `chf.dist`.
pub fn build_distance_field(chf: &mut CompactHeightfield) -> Result<()> {
    let (src, max_dist) = calculate_distance_field(chf);
    chf.max_distance = max_dist;
    chf.dist = box_blur(chf, 1, &src);
    debug!("distance field built, max distance {}", max_dist);
    Ok(())
}

fn calculate_distance_field(chf: &CompactHeightfield) -> (Vec<u16>, u16) {
    let w = chf.width;
    let h = chf.height;
    let mut src = vec![0xffffu16; chf.span_count()];

    for z in 0..h {
        for x in 0..w {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                let area = chf.areas[i];
                let same_area = (0..4)
                    .filter_map(|dir| chf.neighbour(x, z, i, dir))
                    .filter(|&ai| chf.areas[ai] == area)
                    .count();
                if same_area != 4 {
                    src[i] = 0;
                }
            }
        }
    }

    let relax = |src: &mut [u16], i: usize, from: usize, cost: u16| {
        let nd = src[from].saturating_add(cost);
        if nd < src[i] {
            src[i] = nd;
        }
    };

    for z in 0..h {
        for x in 0..w {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if let Some(ai) = chf.neighbour(x, z, i, 0) {
                    relax(&mut src, i, ai, 2);
                    if let Some(aai) = chf.neighbour(x + get_dir_offset_x(0), z, ai, 3) {
                        relax(&mut src, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbour(x, z, i, 3) {
                    relax(&mut src, i, ai, 2);
                    if let Some(aai) = chf.neighbour(x, z + get_dir_offset_z(3), ai, 2) {
                        relax(&mut src, i, aai, 3);
                    }
                }
            }
        }
    }

    for z in (0..h).rev() {
        for x in (0..w).rev() {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                if let Some(ai) = chf.neighbour(x, z, i, 2) {
                    relax(&mut src, i, ai, 2);
                    if let Some(aai) = chf.neighbour(x + get_dir_offset_x(2), z, ai, 1) {
                        relax(&mut src, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbour(x, z, i, 1) {
                    relax(&mut src, i, ai, 2);
                    if let Some(aai) = chf.neighbour(x, z + get_dir_offset_z(1), ai, 0) {
                        relax(&mut src, i, aai, 3);
                    }
                }
            }
        }
    }

    let max_dist = src.iter().copied().max().unwrap_or(0);
    (src, max_dist)
}

fn box_blur(chf: &CompactHeightfield, thr: u16, src: &[u16]) -> Vec<u16> {
    let w = chf.width;
    let h = chf.height;
    let thr = thr * 2;
    let mut dst = vec![0u16; src.len()];

    for z in 0..h {
        for x in 0..w {
            let c = chf.cell(x, z);
            for i in c.index as usize..(c.index + c.count) as usize {
                let cd = src[i];
                if cd <= thr {
                    dst[i] = cd;
                    continue;
                }

                let mut d = cd as u32;
                for dir in 0..4 {
                    if let Some(ai) = chf.neighbour(x, z, i, dir) {
                        d += src[ai] as u32;
                        let ax = x + get_dir_offset_x(dir);
                        let az = z + get_dir_offset_z(dir);
                        let dir2 = (dir + 1) & 0x3;
                        match chf.neighbour(ax, az, ai, dir2) {
                            Some(ai2) => d += src[ai2] as u32,
                            None => d += cd as u32,
                        }
                    } else {
                        d += cd as u32 * 2;
                    }
                }
                dst[i] = ((d + 5) / 9) as u16;
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::RC_WALKABLE_AREA;
    use glam::Vec3;

    #[test]
    fn test_distance_peaks_in_center() {
        let mut hf = Heightfield::new(9, 9, Vec3::ZERO, Vec3::new(9.0, 10.0, 9.0), 1.0, 1.0);
        for z in 0..9 {
            for x in 0..9 {
                hf.add_span(x, z, 0, 1, RC_WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(2, 1, &hf).unwrap();
        build_distance_field(&mut chf).unwrap();

        let d = |x: i32, z: i32| chf.dist[chf.cell(x, z).index as usize];
        assert_eq!(d(0, 0), 0);
        assert_eq!(d(0, 4), 0);
        assert!(d(4, 4) > d(2, 4));
        assert!(d(2, 4) > d(0, 4));
        assert_eq!(chf.max_distance, 8);
    }
}
