// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! STL importer

use crate::error::{Error, Result};
use crate::geometry::{Mesh, Triangle};
use nalgebra::Point3;
use std::fs::File;
use std::path::Path;

/// Parse ASCII STL text into a welded mesh.
///
/// Facet normals are ignored; only the vertex loops are read. Coordinates are
/// parsed as `f64`, so text written by [`super::to_stl`] round-trips exactly.
pub fn parse_ascii_stl(text: &str) -> Result<Mesh> {
    let mut tokens = text.split_whitespace();
    match tokens.next() {
        Some("solid") => {}
        _ => return Err(Error::Serialization("ASCII STL must start with `solid`".into())),
    }

    let mut mesh = Mesh::new();
    let mut corners = Vec::with_capacity(3);
    let mut closed = false;

    while let Some(token) = tokens.next() {
        match token {
            "vertex" => {
                let mut coords = [0.0; 3];
                for coord in &mut coords {
                    let raw = tokens
                        .next()
                        .ok_or_else(|| Error::Serialization("truncated vertex".into()))?;
                    *coord = raw
                        .parse()
                        .map_err(|_| Error::Serialization(format!("invalid coordinate `{raw}`")))?;
                }
                corners.push(mesh.add_vertex(Point3::from(coords)));
            }
            "endloop" => {
                if corners.len() != 3 {
                    return Err(Error::Serialization(format!(
                        "facet has {} vertices, expected 3",
                        corners.len()
                    )));
                }
                mesh.add_triangle(Triangle::new([corners[0], corners[1], corners[2]]));
                corners.clear();
            }
            "endsolid" => {
                closed = true;
                break;
            }
            _ => {}
        }
    }

    if !closed {
        return Err(Error::Serialization("missing `endsolid`".into()));
    }

    mesh.weld_vertices();
    Ok(mesh)
}

/// Read an ASCII or binary STL file
pub fn read_stl_file(path: impl AsRef<Path>) -> Result<Mesh> {
    let mut file = File::open(path.as_ref())?;
    let stl = stl_io::read_stl(&mut file)?;

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for vertex in &stl.vertices {
        mesh.add_vertex(Point3::new(vertex[0] as f64, vertex[1] as f64, vertex[2] as f64));
    }
    for face in &stl.faces {
        mesh.add_triangle(Triangle::new(face.vertices));
    }
    mesh.validate_indices()?;

    tracing::debug!(
        path = ?path.as_ref(),
        triangles = mesh.triangle_count(),
        "STL imported"
    );
    Ok(mesh)
}
