//! Triangle soup input

use crate::{Error, Result};
use glam::Vec3;
use std::path::Path;

/// A triangle mesh given as positions plus index triples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriMesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mesh from flat position and index slices, validating indices.
    pub fn from_slices(positions: &[f32], indices: &[u32]) -> Result<Self> {
        if positions.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "position array length {} is not a multiple of 3",
                positions.len()
            )));
        }
        if indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "index array length {} is not a multiple of 3",
                indices.len()
            )));
        }
        let vertices: Vec<Vec3> = positions
            .chunks_exact(3)
            .map(|p| Vec3::new(p[0], p[1], p[2]))
            .collect();
        let triangles: Vec<[u32; 3]> = indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();
        let mesh = Self { vertices, triangles };
        mesh.validate()?;
        Ok(mesh)
    }

    /// Loads a mesh from a Wavefront OBJ file. Only `v` and `f` records are
    /// read; polygons are fanned into triangles.
    pub fn from_obj<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_obj_str(&content)
    }

    /// Parses OBJ content already held in memory.
    ///
    /// # Example
    ///
    /// ```
    /// use recast_common::TriMesh;
    ///
    /// let mesh = TriMesh::from_obj_str("v 0 0 0\nv 1 0 0\nv 0 0 1\nf 1 2 3\n").unwrap();
    /// assert_eq!(mesh.vertices.len(), 3);
    /// assert_eq!(mesh.triangles.len(), 1);
    /// ```
    pub fn from_obj_str(content: &str) -> Result<Self> {
        let mut mesh = Self::new();
        for (line_no, line) in content.lines().enumerate() {
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("v") => {
                    let mut coords = [0.0f32; 3];
                    for c in coords.iter_mut() {
                        *c = tokens
                            .next()
                            .and_then(|t| t.parse::<f32>().ok())
                            .ok_or_else(|| {
                                Error::InvalidMesh(format!("line {}: malformed vertex", line_no + 1))
                            })?;
                    }
                    mesh.vertices.push(Vec3::from_array(coords));
                }
                Some("f") => {
                    let mut face = Vec::with_capacity(4);
                    for token in tokens {
                        let idx = token
                            .split('/')
                            .next()
                            .and_then(|t| t.parse::<i64>().ok())
                            .ok_or_else(|| {
                                Error::InvalidMesh(format!("line {}: malformed face", line_no + 1))
                            })?;
                        // OBJ indices are 1-based, negative values count from the end.
                        let resolved = if idx < 0 {
                            mesh.vertices.len() as i64 + idx
                        } else {
                            idx - 1
                        };
                        if resolved < 0 {
                            return Err(Error::InvalidMesh(format!(
                                "line {}: face index {} out of range",
                                line_no + 1,
                                idx
                            )));
                        }
                        face.push(resolved as u32);
                    }
                    if face.len() < 3 {
                        return Err(Error::InvalidMesh(format!(
                            "line {}: face has fewer than 3 vertices",
                            line_no + 1
                        )));
                    }
                    for i in 2..face.len() {
                        mesh.triangles.push([face[0], face[i - 1], face[i]]);
                    }
                }
                _ => {}
            }
        }
        mesh.validate()?;
        Ok(mesh)
    }

    /// Checks that every triangle references an existing vertex.
    pub fn validate(&self) -> Result<()> {
        let n = self.vertices.len() as u32;
        if let Some(t) = self.triangles.iter().find(|t| t.iter().any(|&i| i >= n)) {
            return Err(Error::InvalidMesh(format!(
                "triangle {:?} references a vertex beyond {}",
                t, n
            )));
        }
        Ok(())
    }

    pub fn add_triangle(&mut self, a: Vec3, b: Vec3, c: Vec3) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&[a, b, c]);
        self.triangles.push([base, base + 1, base + 2]);
    }

    #[inline]
    pub fn triangle(&self, i: usize) -> [Vec3; 3] {
        let [a, b, c] = self.triangles[i];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Axis-aligned bounds of the vertices, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.vertices.first()?;
        Some(
            self.vertices
                .iter()
                .fold((first, first), |(mn, mx), v| (mn.min(*v), mx.max(*v))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obj_quad_is_fanned() {
        let mesh = TriMesh::from_obj_str(
            "# plane\nv 0 0 0\nv 1 0 0\nv 1 0 1\nv 0 0 1\nvn 0 1 0\nf 1//1 2//1 3//1 4//1\n",
        )
        .unwrap();
        assert_eq!(mesh.triangles, vec![[0, 1, 2], [0, 2, 3]]);
        let (mn, mx) = mesh.bounds().unwrap();
        assert_eq!(mn, Vec3::ZERO);
        assert_eq!(mx, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_obj_rejects_bad_index() {
        assert!(TriMesh::from_obj_str("v 0 0 0\nf 1 2 3\n").is_err());
        assert!(TriMesh::from_obj_str("v 0 x 0\n").is_err());
    }

    #[test]
    fn test_obj_file_round_trip() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "v 0 0 0\nv 2 0 0\nv 0 0 2\nf 1 2 3").unwrap();
        let mesh = TriMesh::from_obj(file.path()).unwrap();
        assert_eq!(mesh.triangles.len(), 1);
        assert_eq!(mesh.triangle(0)[1], Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_from_slices() {
        let mesh = TriMesh::from_slices(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0], &[0, 1, 2]).unwrap();
        assert_eq!(mesh.vertices.len(), 3);
        assert!(TriMesh::from_slices(&[0.0, 0.0], &[]).is_err());
    }
}
