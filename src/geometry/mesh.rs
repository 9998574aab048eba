// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Mesh representation and utilities

use super::BoundingBox;
use crate::error::{Error, Result};
use ahash::AHashMap;
use nalgebra::{Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Triangle defined by three vertex indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triangle {
    pub indices: [usize; 3],
}

impl Triangle {
    pub fn new(indices: [usize; 3]) -> Self {
        Self { indices }
    }

    /// Same triangle with reversed winding
    pub fn flipped(&self) -> Self {
        Self::new([self.indices[0], self.indices[2], self.indices[1]])
    }
}

/// Triangular mesh
///
/// Triangles are wound counter-clockwise when seen from outside the solid.
/// `baked` marks a mesh whose vertices are already in world space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Point3<f64>>,
    pub triangles: Vec<Triangle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<Vector3<f64>>>,
    #[serde(default)]
    pub baked: bool,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self::new()
    }

    pub fn with_capacity(vertex_count: usize, triangle_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            triangles: Vec::with_capacity(triangle_count),
            normals: None,
            baked: false,
        }
    }

    /// Add a vertex and return its index
    pub fn add_vertex(&mut self, position: Point3<f64>) -> usize {
        let index = self.vertices.len();
        self.vertices.push(position);
        index
    }

    /// Add a triangle
    pub fn add_triangle(&mut self, triangle: Triangle) {
        self.triangles.push(triangle);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Compute bounding box
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.vertices)
    }

    /// Check that every triangle index refers to an existing vertex
    pub fn validate_indices(&self) -> Result<()> {
        let count = self.vertices.len();
        for (i, triangle) in self.triangles.iter().enumerate() {
            if let Some(bad) = triangle.indices.iter().find(|&&idx| idx >= count) {
                return Err(Error::Serialization(format!(
                    "triangle {} references vertex {} but mesh has {} vertices",
                    i, bad, count
                )));
            }
        }
        Ok(())
    }

    /// Corner positions of a triangle
    pub fn triangle_positions(&self, triangle: &Triangle) -> [Point3<f64>; 3] {
        [
            self.vertices[triangle.indices[0]],
            self.vertices[triangle.indices[1]],
            self.vertices[triangle.indices[2]],
        ]
    }

    /// Transform all vertices (and normals, if present) by a matrix
    pub fn transform(&mut self, matrix: &Matrix4<f64>) {
        for position in &mut self.vertices {
            *position = matrix.transform_point(position);
        }

        if let Some(normals) = &mut self.normals {
            // Normals use the inverse transpose
            let normal_matrix = matrix
                .try_inverse()
                .map(|m| m.transpose())
                .unwrap_or(*matrix);
            for normal in normals.iter_mut() {
                let transformed = normal_matrix.transform_vector(normal);
                *normal = transformed.try_normalize(f64::EPSILON).unwrap_or(transformed);
            }
        }
    }

    /// Reverse the winding of every triangle
    pub fn flip_winding(&mut self) {
        for triangle in &mut self.triangles {
            *triangle = triangle.flipped();
        }
        if let Some(normals) = &mut self.normals {
            for normal in normals.iter_mut() {
                *normal = -*normal;
            }
        }
    }

    /// Merge with another mesh (simple union without CSG)
    pub fn merge(&mut self, other: Mesh) {
        let offset = self.vertices.len();
        match (&mut self.normals, other.normals) {
            (Some(own), Some(theirs)) => own.extend(theirs),
            _ => self.normals = None,
        }
        self.vertices.extend(other.vertices);
        self.triangles.extend(other.triangles.into_iter().map(|t| {
            Triangle::new([
                t.indices[0] + offset,
                t.indices[1] + offset,
                t.indices[2] + offset,
            ])
        }));
    }

    /// Area-weighted per-vertex normals
    pub fn recompute_normals(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for triangle in &self.triangles {
            let [a, b, c] = self.triangle_positions(triangle);
            let face = (b - a).cross(&(c - a));
            for &idx in &triangle.indices {
                normals[idx] += face;
            }
        }
        for normal in &mut normals {
            *normal = normal.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros);
        }
        self.normals = Some(normals);
    }

    /// Weld vertices with bit-identical positions and drop triangles that
    /// collapse as a result. Returns the number of vertices removed.
    pub fn weld_vertices(&mut self) -> usize {
        let original_count = self.vertices.len();
        let mut lookup: AHashMap<[u64; 3], usize> = AHashMap::with_capacity(original_count);
        let mut remap = Vec::with_capacity(original_count);
        let mut welded = Vec::with_capacity(original_count);

        for position in &self.vertices {
            // Fold -0.0 into 0.0 so both map to the same key
            let key = [
                (position.x + 0.0).to_bits(),
                (position.y + 0.0).to_bits(),
                (position.z + 0.0).to_bits(),
            ];
            let index = *lookup.entry(key).or_insert_with(|| {
                welded.push(*position);
                welded.len() - 1
            });
            remap.push(index);
        }

        for triangle in &mut self.triangles {
            for idx in &mut triangle.indices {
                *idx = remap[*idx];
            }
        }
        self.triangles.retain(|t| {
            t.indices[0] != t.indices[1] && t.indices[1] != t.indices[2] && t.indices[0] != t.indices[2]
        });
        self.vertices = welded;
        self.normals = None;

        original_count - self.vertices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> Mesh {
        let mut mesh = Mesh::new();
        let a = mesh.add_vertex(Point3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Point3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Point3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(Triangle::new([a, b, c]));
        mesh
    }

    #[test]
    fn test_merge_offsets_indices() {
        let mut mesh = unit_triangle();
        mesh.merge(unit_triangle());
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangles[1].indices, [3, 4, 5]);
        assert!(mesh.validate_indices().is_ok());
    }

    #[test]
    fn test_validate_indices_rejects_out_of_range() {
        let mut mesh = unit_triangle();
        mesh.add_triangle(Triangle::new([0, 1, 7]));
        assert!(matches!(mesh.validate_indices(), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_weld_vertices() {
        let mut mesh = unit_triangle();
        mesh.merge(unit_triangle());
        let removed = mesh.weld_vertices();
        assert_eq!(removed, 3);
        assert_eq!(mesh.triangles[1].indices, [0, 1, 2]);
    }

    #[test]
    fn test_recompute_normals_points_up() {
        let mut mesh = unit_triangle();
        mesh.recompute_normals();
        let normals = mesh.normals.as_ref().unwrap();
        assert!((normals[0] - Vector3::z()).norm() < 1e-12);
    }

    #[test]
    fn test_flip_winding() {
        let mut mesh = unit_triangle();
        mesh.flip_winding();
        assert_eq!(mesh.triangles[0].indices, [0, 2, 1]);
    }
}
