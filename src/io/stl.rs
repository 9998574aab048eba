// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! STL exporter

use crate::error::Result;
use crate::geometry::Mesh;
use crate::utils::math::triangle_normal;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use stl_io::{Normal, Triangle as StlTriangle, Vertex as StlVertex};

/// Output encoding and solid name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StlOptions {
    pub binary: bool,
    pub name: String,
}

impl Default for StlOptions {
    fn default() -> Self {
        Self {
            binary: false,
            name: "polyforge".to_string(),
        }
    }
}

impl StlOptions {
    pub fn ascii(name: impl Into<String>) -> Self {
        Self {
            binary: false,
            name: name.into(),
        }
    }

    pub fn binary() -> Self {
        Self {
            binary: true,
            ..Self::default()
        }
    }
}

/// Serialized STL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StlOutput {
    Text(String),
    Binary(Vec<u8>),
}

impl StlOutput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(_) => None,
            Self::Binary(bytes) => Some(bytes),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Raw bytes of either encoding
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Serialize meshes as one STL solid.
///
/// Meshes with out-of-range indices cannot be written; in that case an empty
/// solid is returned and a warning is logged. Use [`try_to_stl`] to observe
/// the error instead.
pub fn to_stl(meshes: &[Mesh], options: &StlOptions) -> StlOutput {
    match try_to_stl(meshes, options) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(error = %err, "STL export failed, writing an empty solid");
            if options.binary {
                StlOutput::Binary(write_binary(std::iter::empty()))
            } else {
                StlOutput::Text(write_ascii(std::iter::empty(), &options.name))
            }
        }
    }
}

/// Serialize meshes as one STL solid, failing on malformed meshes
pub fn try_to_stl(meshes: &[Mesh], options: &StlOptions) -> Result<StlOutput> {
    for mesh in meshes {
        mesh.validate_indices()?;
    }

    let facets = meshes.iter().flat_map(|mesh| {
        mesh.triangles.iter().map(move |triangle| mesh.triangle_positions(triangle))
    });

    Ok(if options.binary {
        StlOutput::Binary(write_binary(facets))
    } else {
        StlOutput::Text(write_ascii(facets, &options.name))
    })
}

/// Export meshes to an STL file
pub fn write_stl(meshes: &[Mesh], options: &StlOptions, path: impl AsRef<Path>) -> Result<()> {
    let output = try_to_stl(meshes, options)?;
    std::fs::write(path.as_ref(), output.into_bytes())?;
    tracing::debug!(path = ?path.as_ref(), "STL written");
    Ok(())
}

type Facet = [nalgebra::Point3<f64>; 3];

fn write_ascii(facets: impl Iterator<Item = Facet>, name: &str) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "solid {name}");
    for [v0, v1, v2] in facets {
        let n = triangle_normal(&v0, &v1, &v2);
        let _ = writeln!(out, "  facet normal {} {} {}", n.x, n.y, n.z);
        out.push_str("    outer loop\n");
        for v in [v0, v1, v2] {
            let _ = writeln!(out, "      vertex {} {} {}", v.x, v.y, v.z);
        }
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }
    let _ = writeln!(out, "endsolid {name}");
    out
}

fn write_binary(facets: impl Iterator<Item = Facet>) -> Vec<u8> {
    let triangles: Vec<StlTriangle> = facets
        .map(|[v0, v1, v2]| {
            let n = triangle_normal(&v0, &v1, &v2);
            StlTriangle {
                normal: Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [v0, v1, v2].map(|v| StlVertex::new([v.x as f32, v.y as f32, v.z as f32])),
            }
        })
        .collect();

    let mut buffer = Vec::with_capacity(84 + triangles.len() * 50);
    if let Err(err) = stl_io::write_stl(&mut buffer, triangles.iter()) {
        // Only reachable if the in-memory writer fails
        tracing::warn!(error = %err, "binary STL encoding failed");
        return empty_binary();
    }
    buffer
}

fn empty_binary() -> Vec<u8> {
    let mut buffer = vec![0u8; 84];
    buffer[80..84].copy_from_slice(&0u32.to_le_bytes());
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::geometry::{PrimitiveDescriptor, Synthesizer, Triangle};
    use nalgebra::Point3;
    use std::io::Cursor;

    fn cube() -> Mesh {
        Synthesizer::default()
            .synthesize(&PrimitiveDescriptor::cube(2.0, 2.0, 2.0))
            .unwrap()
    }

    #[test]
    fn test_ascii_layout() {
        let output = to_stl(&[cube()], &StlOptions::ascii("part"));
        let text = output.as_text().unwrap();
        assert!(text.starts_with("solid part\n"));
        assert!(text.trim_end().ends_with("endsolid part"));
        assert_eq!(text.matches("facet normal").count(), 12);
        assert_eq!(text.matches("outer loop").count(), 12);
        assert_eq!(text.matches("vertex ").count(), 36);
    }

    #[test]
    fn test_empty_list_is_valid() {
        let text = to_stl(&[], &StlOptions::default()).as_text().unwrap().to_string();
        assert_eq!(text, "solid polyforge\nendsolid polyforge\n");

        let bytes = to_stl(&[], &StlOptions::binary()).into_bytes();
        assert_eq!(bytes.len(), 84);
        assert_eq!(&bytes[80..84], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_degenerate_triangle_has_zero_normal() {
        let mut mesh = Mesh::new();
        let a = mesh.add_vertex(Point3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Point3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Point3::new(2.0, 0.0, 0.0));
        mesh.add_triangle(Triangle::new([a, b, c]));

        let text = to_stl(&[mesh], &StlOptions::default()).into_bytes();
        let text = String::from_utf8(text).unwrap();
        assert!(text.contains("facet normal 0 0 0"));
    }

    #[test]
    fn test_binary_layout() {
        let bytes = to_stl(&[cube()], &StlOptions::binary()).into_bytes();
        assert_eq!(bytes.len(), 84 + 12 * 50);
        assert!(!bytes.starts_with(b"solid"));
        assert_eq!(u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]), 12);

        let parsed = stl_io::read_stl(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed.faces.len(), 12);
    }

    #[test]
    fn test_bad_indices() {
        let mut mesh = cube();
        mesh.add_triangle(Triangle::new([0, 1, 99]));

        assert!(matches!(
            try_to_stl(&[mesh.clone()], &StlOptions::default()),
            Err(Error::Serialization(_))
        ));
        let fallback = to_stl(&[mesh], &StlOptions::default());
        assert_eq!(fallback.as_text().unwrap().matches("facet").count(), 0);
    }

    #[test]
    fn test_write_stl_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.stl");
        write_stl(&[cube()], &StlOptions::default(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("solid"));
    }
}
