//! Triangle soup fed to the build

use std::path::Path;

use glam::Vec3;
use recast_common::{Error, Result, TriMesh};

/// Positions and triangle indices of the walkable world
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputGeometry {
    positions: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    /// Per-triangle xz bounds, parallel to `triangles`
    tri_bounds: Vec<(Vec3, Vec3)>,
}

impl InputGeometry {
    /// Fails when a triangle indexes past the end of `positions`.
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Result<Self> {
        if let Some(bad) = triangles.iter().flatten().find(|&&i| i as usize >= positions.len()) {
            return Err(Error::InvalidMesh(format!(
                "triangle index {} out of bounds ({} vertices)",
                bad,
                positions.len()
            )));
        }
        let tri_bounds = triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|i| positions[i as usize]);
                (a.min(b).min(c), a.max(b).max(c))
            })
            .collect();
        Ok(Self {
            positions,
            triangles,
            tri_bounds,
        })
    }

    /// Builds geometry from flat `[x, y, z, ...]` positions and index triples.
    pub fn from_flat(positions: &[f32], indices: &[u32]) -> Result<Self> {
        TriMesh::from_slices(positions, indices)?.try_into()
    }

    /// Loads geometry from a Wavefront OBJ file.
    pub fn from_obj(path: impl AsRef<Path>) -> Result<Self> {
        TriMesh::from_obj(path)?.try_into()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Bounds of the vertices referenced by triangles
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        self.tri_bounds
            .iter()
            .copied()
            .reduce(|(amin, amax), (bmin, bmax)| (amin.min(bmin), amax.max(bmax)))
    }

    /// Triangles whose bounds overlap `[bmin, bmax]` on the xz plane
    pub fn triangles_in(&self, bmin: Vec3, bmax: Vec3) -> Vec<[u32; 3]> {
        self.triangles
            .iter()
            .zip(&self.tri_bounds)
            .filter(|(_, (tmin, tmax))| {
                tmin.x <= bmax.x && tmax.x >= bmin.x && tmin.z <= bmax.z && tmax.z >= bmin.z
            })
            .map(|(t, _)| *t)
            .collect()
    }
}

impl TryFrom<TriMesh> for InputGeometry {
    type Error = Error;

    fn try_from(mesh: TriMesh) -> Result<Self> {
        Self::new(mesh.vertices, mesh.triangles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_indices() {
        let err = InputGeometry::new(vec![Vec3::ZERO; 3], vec![[0, 1, 3]]).unwrap_err();
        assert!(matches!(err, Error::InvalidMesh(_)));
        assert!(InputGeometry::from_flat(&[0.0; 8], &[0, 1, 2]).is_err());
    }

    #[test]
    fn test_bounds_and_gathering() {
        let geom = InputGeometry::from_flat(
            &[
                0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, //
                10.0, 2.0, 10.0, 11.0, 2.0, 10.0, 10.0, 2.0, 11.0, //
                50.0, 9.0, 50.0,
            ],
            &[0, 2, 1, 3, 5, 4],
        )
        .unwrap();

        // The unreferenced vertex does not widen the bounds.
        assert_eq!(
            geom.bounds(),
            Some((Vec3::ZERO, Vec3::new(11.0, 2.0, 11.0)))
        );
        assert_eq!(geom.triangles_in(Vec3::splat(-1.0), Vec3::splat(0.5)), vec![[0, 2, 1]]);
        assert_eq!(geom.triangles_in(Vec3::splat(5.0), Vec3::splat(10.5)), vec![[3, 5, 4]]);
        assert_eq!(geom.triangles_in(Vec3::ZERO, Vec3::splat(20.0)).len(), 2);
        assert!(InputGeometry::default().bounds().is_none());
    }

    #[test]
    fn test_loads_obj() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        std::fs::write(&path, "v 0 0 0\nv 0 0 4\nv 4 0 4\nv 4 0 0\nf 1 2 3 4\n").unwrap();
        let geom = InputGeometry::from_obj(&path).unwrap();
        assert_eq!(geom.triangles().len(), 2);
        assert_eq!(geom.bounds(), Some((Vec3::ZERO, Vec3::new(4.0, 0.0, 4.0))));
        assert!(InputGeometry::from_obj(dir.path().join("missing.obj")).is_err());
    }
}
