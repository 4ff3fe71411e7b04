//! 2D geometry operations on the XZ plane.
//!
//! Navigation data is Y-up, so most predicates here ignore the Y component.
//! Build-side code works on voxel integers and keeps its own helpers; these
//! functions serve the runtime and the detail mesh builder.

use glam::Vec3;

/// Twice the signed area of the triangle `abc` projected on the XZ plane.
///
/// Positive when the triangle winds clockwise seen from above.
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Perp-dot of `u` and `v` on the XZ plane.
#[inline]
pub fn perp_2d(u: Vec3, v: Vec3) -> f32 {
    u.z * v.x - u.x * v.z
}

#[inline]
pub fn dist_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz
}

#[inline]
pub fn dist_2d(a: Vec3, b: Vec3) -> f32 {
    dist_sqr_2d(a, b).sqrt()
}

/// Checks if two axis-aligned bounding boxes overlap.
#[inline]
pub fn overlap_bounds(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.x <= bmax.x
        && amax.x >= bmin.x
        && amin.y <= bmax.y
        && amax.y >= bmin.y
        && amin.z <= bmax.z
        && amax.z >= bmin.z
}

/// Checks if two quantized bounding boxes overlap.
#[inline]
pub fn overlap_quant_bounds(amin: &[u16; 3], amax: &[u16; 3], bmin: &[u16; 3], bmax: &[u16; 3]) -> bool {
    amin[0] <= bmax[0]
        && amax[0] >= bmin[0]
        && amin[1] <= bmax[1]
        && amax[1] >= bmin[1]
        && amin[2] <= bmax[2]
        && amax[2] >= bmin[2]
}

/// Squared XZ distance from `pt` to the segment `pq`, together with the
/// segment parameter of the closest point.
pub fn dist_pt_seg_sqr_2d(pt: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
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
    (dx * dx + dz * dz, t)
}

/// Squared 3D distance from `pt` to the segment `pq`.
pub fn dist_pt_seg_sqr(pt: Vec3, p: Vec3, q: Vec3) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (p + pq * t - pt).length_squared()
}

/// Closest point on triangle `abc` to `p`.
pub fn closest_pt_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Height of triangle `abc` below or above `p`, if `p` projects inside it.
pub fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// Even-odd point in polygon test on the XZ plane. Boundary points are
/// not guaranteed to be inside.
pub fn point_in_polygon(pt: Vec3, verts: &[Vec3]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Point in polygon test that also reports the squared distance and segment
/// parameter to every edge. Edge `j` runs from `verts[j]` to `verts[j + 1]`.
pub fn distance_pt_poly_edges_sqr(pt: Vec3, verts: &[Vec3], ed: &mut [f32], et: &mut [f32]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        let (d, t) = dist_pt_seg_sqr_2d(pt, vj, vi);
        ed[j] = d;
        et[j] = t;
        j = i;
    }
    inside
}

/// Result of clipping a segment against a convex polygon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPolyHit {
    pub tmin: f32,
    pub tmax: f32,
    /// Edge the segment enters through, if it starts outside.
    pub seg_min: Option<usize>,
    /// Edge the segment leaves through, if it ends outside.
    pub seg_max: Option<usize>,
}

/// Clips the segment `p0 p1` against a convex polygon on the XZ plane.
pub fn intersect_segment_poly_2d(p0: Vec3, p1: Vec3, verts: &[Vec3]) -> Option<SegmentPolyHit> {
    const EPS: f32 = 1e-8;
    let mut hit = SegmentPolyHit {
        tmin: 0.0,
        tmax: 1.0,
        seg_min: None,
        seg_max: None,
    };
    let dir = p1 - p0;
    let n = verts.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let edge = verts[i] - verts[j];
        let diff = p0 - verts[j];
        let num = perp_2d(edge, diff);
        let den = perp_2d(dir, edge);
        if den.abs() < EPS {
            // Parallel to this edge.
            if num < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = num / den;
        if den < 0.0 {
            if t > hit.tmin {
                hit.tmin = t;
                hit.seg_min = Some(j);
                if hit.tmin > hit.tmax {
                    return None;
                }
            }
        } else if t < hit.tmax {
            hit.tmax = t;
            hit.seg_max = Some(j);
            if hit.tmax < hit.tmin {
                return None;
            }
        }
        j = i;
    }
    Some(hit)
}

/// Intersects the infinite lines through `ap aq` and `bp bq`, returning the
/// parameters along each.
pub fn intersect_seg_seg_2d(ap: Vec3, aq: Vec3, bp: Vec3, bq: Vec3) -> Option<(f32, f32)> {
    let u = aq - ap;
    let v = bq - bp;
    let w = ap - bp;
    let d = u.x * v.z - u.z * v.x;
    if d.abs() < 1e-6 {
        return None;
    }
    let s = (v.x * w.z - v.z * w.x) / d;
    let t = (u.x * w.z - u.z * w.x) / d;
    Some((s, t))
}

fn project_poly(axis: Vec3, poly: &[Vec3]) -> (f32, f32) {
    let mut rmin = axis.x * poly[0].x + axis.z * poly[0].z;
    let mut rmax = rmin;
    for p in &poly[1..] {
        let d = axis.x * p.x + axis.z * p.z;
        rmin = rmin.min(d);
        rmax = rmax.max(d);
    }
    (rmin, rmax)
}

/// Separating axis overlap test for two convex polygons on the XZ plane.
pub fn overlap_poly_poly_2d(polya: &[Vec3], polyb: &[Vec3]) -> bool {
    const EPS: f32 = 1e-4;
    for poly in [polya, polyb] {
        let n = poly.len();
        let mut j = n.wrapping_sub(1);
        for i in 0..n {
            let va = poly[j];
            let vb = poly[i];
            let axis = Vec3::new(vb.z - va.z, 0.0, -(vb.x - va.x));
            let (amin, amax) = project_poly(axis, polya);
            let (bmin, bmax) = project_poly(axis, polyb);
            if amin + EPS > bmax || amax - EPS < bmin {
                return false;
            }
            j = i;
        }
    }
    true
}

/// Average of the polygon vertices.
pub fn calc_poly_center(verts: &[Vec3]) -> Vec3 {
    if verts.is_empty() {
        return Vec3::ZERO;
    }
    verts.iter().copied().sum::<Vec3>() / verts.len() as f32
}

/// Area of a convex polygon on the XZ plane.
pub fn poly_area_2d(verts: &[Vec3]) -> f32 {
    let mut area = 0.0;
    for i in 2..verts.len() {
        area += tri_area_2d(verts[0], verts[i - 1], verts[i]);
    }
    area * 0.5
}

/// Picks a point in a convex polygon from two uniform samples in `[0, 1)`.
///
/// The fan triangle is chosen proportionally to its area, then the point is
/// placed inside it with a square-root barycentric mapping.
pub fn random_point_in_convex_poly(pts: &[Vec3], s: f32, t: f32) -> Vec3 {
    let npts = pts.len();
    if npts < 3 {
        return calc_poly_center(pts);
    }

    let mut areas = vec![0.0f32; npts];
    let mut area_sum = 0.0;
    for i in 2..npts {
        areas[i] = tri_area_2d(pts[0], pts[i - 1], pts[i]);
        area_sum += areas[i].max(0.001);
    }

    let thr = s * area_sum;
    let mut acc = 0.0;
    let mut u = 1.0;
    let mut tri = npts - 1;
    for (i, &dacc) in areas.iter().enumerate().skip(2) {
        if thr >= acc && thr < acc + dacc {
            u = (thr - acc) / dacc;
            tri = i;
            break;
        }
        acc += dacc;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    pts[0] * a + pts[tri - 1] * b + pts[tri] * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn test_tri_area_winding() {
        let a = Vec3::ZERO;
        let b = Vec3::new(0.0, 0.0, 1.0);
        let c = Vec3::new(1.0, 0.0, 0.0);
        assert!(tri_area_2d(a, b, c) > 0.0);
        assert!(tri_area_2d(a, c, b) < 0.0);
        assert_eq!(tri_area_2d(a, a, c), 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let poly = square();
        assert!(point_in_polygon(Vec3::new(0.5, 3.0, 0.5), &poly));
        assert!(!point_in_polygon(Vec3::new(1.5, 0.0, 0.5), &poly));
    }

    #[test]
    fn test_dist_pt_seg() {
        let (d, t) = dist_pt_seg_sqr_2d(
            Vec3::new(0.5, 0.0, 1.0),
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
        );
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_closest_height() {
        let a = Vec3::new(0.0, 1.0, 0.0);
        let b = Vec3::new(0.0, 1.0, 1.0);
        let c = Vec3::new(1.0, 1.0, 0.0);
        let h = closest_height_point_triangle(Vec3::new(0.2, 5.0, 0.2), a, b, c);
        assert_eq!(h, Some(1.0));
        assert!(closest_height_point_triangle(Vec3::new(2.0, 0.0, 2.0), a, b, c).is_none());
    }

    #[test]
    fn test_segment_poly_clip() {
        let poly = square();
        let hit = intersect_segment_poly_2d(
            Vec3::new(-1.0, 0.0, 0.5),
            Vec3::new(2.0, 0.0, 0.5),
            &poly,
        )
        .unwrap();
        assert!((hit.tmin - 1.0 / 3.0).abs() < 1e-5);
        assert!((hit.tmax - 2.0 / 3.0).abs() < 1e-5);
        assert!(hit.seg_min.is_some());
        assert!(hit.seg_max.is_some());

        let miss = intersect_segment_poly_2d(
            Vec3::new(-1.0, 0.0, 2.0),
            Vec3::new(2.0, 0.0, 2.0),
            &poly,
        );
        assert!(miss.is_none());
    }

    #[test]
    fn test_random_point_stays_inside() {
        let poly = square();
        for i in 0..10 {
            for j in 0..10 {
                let p = random_point_in_convex_poly(&poly, i as f32 / 10.0, j as f32 / 10.0);
                assert!(p.x >= -1e-5 && p.x <= 1.0 + 1e-5);
                assert!(p.z >= -1e-5 && p.z <= 1.0 + 1e-5);
            }
        }
    }

    #[test]
    fn test_poly_overlap() {
        let a = square();
        let b: Vec<Vec3> = square().iter().map(|v| *v + Vec3::new(0.5, 0.0, 0.5)).collect();
        let c: Vec<Vec3> = square().iter().map(|v| *v + Vec3::new(3.0, 0.0, 0.0)).collect();
        assert!(overlap_poly_poly_2d(&a, &b));
        assert!(!overlap_poly_poly_2d(&a, &c));
    }
}
