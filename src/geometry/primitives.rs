// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Primitive descriptors and the mesh synthesizer

use super::{GearSpec, Mesh, Triangle};
use crate::config::TessellationSettings;
use crate::error::{Error, Result};
use nalgebra::{Point2, Point3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Shape kind with its kind-specific parameters.
///
/// Parameters are optional so that a missing field is reported as an
/// `InvalidParameter` error rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ShapeParams {
    Cube {
        width: Option<f64>,
        height: Option<f64>,
        depth: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Sphere {
        radius: Option<f64>,
        width_segments: Option<u32>,
        height_segments: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    Cylinder {
        radius: Option<f64>,
        height: Option<f64>,
        radial_segments: Option<u32>,
    },
    Polyhedron {
        #[serde(default)]
        vertices: Vec<[f64; 3]>,
        #[serde(default)]
        faces: Vec<Vec<usize>>,
    },
    #[serde(rename_all = "camelCase")]
    Gear {
        teeth: Option<u32>,
        module: Option<f64>,
        pressure_angle: Option<f64>,
        thickness: Option<f64>,
    },
}

impl ShapeParams {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Cube { .. } => "Cube",
            Self::Sphere { .. } => "Sphere",
            Self::Cylinder { .. } => "Cylinder",
            Self::Polyhedron { .. } => "Polyhedron",
            Self::Gear { .. } => "Gear",
        }
    }
}

/// A primitive as produced by the upstream tool-call resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimitiveDescriptor {
    #[serde(flatten)]
    pub shape: ShapeParams,
    #[serde(default)]
    pub position: [f64; 3],
    /// Euler angles in radians
    #[serde(default)]
    pub rotation: [f64; 3],
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_hollow: bool,
    #[serde(default)]
    pub wall_thickness: Option<f64>,
}

impl PrimitiveDescriptor {
    pub fn new(shape: ShapeParams) -> Self {
        Self {
            shape,
            position: [0.0; 3],
            rotation: [0.0; 3],
            color: None,
            is_hollow: false,
            wall_thickness: None,
        }
    }

    pub fn cube(width: f64, height: f64, depth: f64) -> Self {
        Self::new(ShapeParams::Cube {
            width: Some(width),
            height: Some(height),
            depth: Some(depth),
        })
    }

    pub fn sphere(radius: f64) -> Self {
        Self::new(ShapeParams::Sphere {
            radius: Some(radius),
            width_segments: None,
            height_segments: None,
        })
    }

    pub fn cylinder(radius: f64, height: f64) -> Self {
        Self::new(ShapeParams::Cylinder {
            radius: Some(radius),
            height: Some(height),
            radial_segments: None,
        })
    }

    pub fn polyhedron(vertices: Vec<[f64; 3]>, faces: Vec<Vec<usize>>) -> Self {
        Self::new(ShapeParams::Polyhedron { vertices, faces })
    }

    pub fn gear(teeth: u32, module: f64) -> Self {
        Self::new(ShapeParams::Gear {
            teeth: Some(teeth),
            module: Some(module),
            pressure_angle: None,
            thickness: None,
        })
    }

    pub fn at(mut self, x: f64, y: f64, z: f64) -> Self {
        self.position = [x, y, z];
        self
    }

    pub fn rotated(mut self, x: f64, y: f64, z: f64) -> Self {
        self.rotation = [x, y, z];
        self
    }

    pub fn hollow(mut self, wall_thickness: Option<f64>) -> Self {
        self.is_hollow = true;
        self.wall_thickness = wall_thickness;
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.shape.kind_name()
    }
}

/// Turns descriptors into local-space meshes
#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    settings: TessellationSettings,
}

impl Synthesizer {
    pub fn new(settings: TessellationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TessellationSettings {
        &self.settings
    }

    /// Build the mesh for one descriptor. Position and rotation are not
    /// applied here; see the scene resolver.
    pub fn synthesize(&self, descriptor: &PrimitiveDescriptor) -> Result<Mesh> {
        let kind = descriptor.kind_name();
        tracing::debug!(kind, hollow = descriptor.is_hollow, "synthesizing primitive");

        match &descriptor.shape {
            ShapeParams::Cube { width, height, depth } => {
                let size = [
                    positive(kind, "width", *width)?,
                    positive(kind, "height", *height)?,
                    positive(kind, "depth", *depth)?,
                ];
                let mut mesh = generate_box(Point3::origin(), Point3::new(size[0], size[1], size[2]));
                if descriptor.is_hollow {
                    let smallest = size[0].min(size[1]).min(size[2]);
                    let wall = self.wall(descriptor, smallest, smallest / 2.0)?;
                    let inner = generate_box(
                        Point3::new(wall, wall, wall),
                        Point3::new(size[0] - wall, size[1] - wall, size[2] - wall),
                    );
                    add_cavity(&mut mesh, inner);
                }
                Ok(mesh)
            }

            ShapeParams::Sphere {
                radius,
                width_segments,
                height_segments,
            } => {
                let radius = positive(kind, "radius", *radius)?;
                let width = segments(
                    kind,
                    "widthSegments",
                    width_segments.unwrap_or(self.settings.sphere_width_segments),
                )?;
                let height = segments(
                    kind,
                    "heightSegments",
                    height_segments.unwrap_or(self.settings.sphere_height_segments),
                )?;
                let shells = if descriptor.is_hollow { 2 } else { 1 };
                self.check_budget(kind, sphere_triangles(width, height).and_then(|t| t.checked_mul(shells)))?;
                let mut mesh = generate_sphere(radius, width, height);
                if descriptor.is_hollow {
                    let wall = self.wall(descriptor, radius, radius)?;
                    add_cavity(&mut mesh, generate_sphere(radius - wall, width, height));
                }
                Ok(mesh)
            }

            ShapeParams::Cylinder {
                radius,
                height,
                radial_segments,
            } => {
                let radius = positive(kind, "radius", *radius)?;
                let height = positive(kind, "height", *height)?;
                let n = segments(
                    kind,
                    "radialSegments",
                    radial_segments.unwrap_or(self.settings.cylinder_segments),
                )?;
                let shells = if descriptor.is_hollow { 2 } else { 1 };
                self.check_budget(kind, (n as usize).checked_mul(4 * shells))?;
                let mut mesh = generate_cylinder(radius, 0.0, height, n);
                if descriptor.is_hollow {
                    let wall = self.wall(descriptor, radius.min(height), radius.min(height / 2.0))?;
                    add_cavity(&mut mesh, generate_cylinder(radius - wall, wall, height - wall, n));
                }
                Ok(mesh)
            }

            ShapeParams::Polyhedron { vertices, faces } => {
                if descriptor.is_hollow {
                    tracing::debug!(kind, "hollow flag ignored");
                }
                generate_polyhedron(vertices, faces)
            }

            ShapeParams::Gear {
                teeth,
                module,
                pressure_angle,
                thickness,
            } => {
                let teeth = teeth.ok_or_else(|| Error::invalid(kind, "teeth", "missing"))?;
                let module = positive(kind, "module", *module)?;
                let pressure_angle = pressure_angle.unwrap_or(self.settings.gear_pressure_angle);
                let thickness = positive(kind, "thickness", Some(thickness.unwrap_or(module)))?;
                if descriptor.is_hollow {
                    tracing::debug!(kind, "hollow flag ignored");
                }
                let spec = GearSpec::new(teeth, module, pressure_angle)?;
                self.check_budget(
                    kind,
                    spec.outline_len(self.settings.involute_step)
                        .and_then(|n| n.checked_mul(4)),
                )?;
                Ok(extrude_star_outline(
                    &spec.outline(self.settings.involute_step),
                    thickness,
                ))
            }
        }
    }

    /// Synthesize independent descriptors in parallel. Each result stands
    /// alone; one failure leaves its siblings untouched.
    pub fn synthesize_all(&self, descriptors: &[PrimitiveDescriptor]) -> Vec<Result<Mesh>> {
        descriptors.par_iter().map(|d| self.synthesize(d)).collect()
    }

    /// Reject a primitive whose triangle count overflows or exceeds
    /// `max_triangles`, before anything is allocated
    fn check_budget(&self, kind: &'static str, triangles: Option<usize>) -> Result<()> {
        let limit = self.settings.max_triangles;
        match triangles {
            Some(count) if count <= limit => Ok(()),
            Some(count) => Err(Error::invalid(
                kind,
                "segments",
                format!("{count} triangles exceeds the limit of {limit}"),
            )),
            None => Err(Error::invalid(kind, "segments", "triangle count overflows")),
        }
    }

    fn wall(&self, descriptor: &PrimitiveDescriptor, extent: f64, limit: f64) -> Result<f64> {
        let kind = descriptor.kind_name();
        let wall = descriptor
            .wall_thickness
            .unwrap_or(extent * self.settings.hollow_wall_ratio);
        let wall = positive(kind, "wallThickness", Some(wall))?;
        if wall >= limit {
            return Err(Error::invalid(
                kind,
                "wallThickness",
                format!("{wall} leaves no cavity (limit {limit})"),
            ));
        }
        Ok(wall)
    }
}

fn positive(kind: &'static str, field: &'static str, value: Option<f64>) -> Result<f64> {
    match value {
        None => Err(Error::invalid(kind, field, "missing")),
        Some(v) if !v.is_finite() => Err(Error::invalid(kind, field, format!("not finite: {v}"))),
        Some(v) if v <= 0.0 => Err(Error::invalid(kind, field, format!("must be positive, got {v}"))),
        Some(v) => Ok(v),
    }
}

fn segments(kind: &'static str, field: &'static str, value: u32) -> Result<u32> {
    if value < 3 {
        return Err(Error::invalid(kind, field, format!("need at least 3, got {value}")));
    }
    Ok(value)
}

/// Triangles in a UV sphere with single poles: `2·W·(H−1)`
fn sphere_triangles(slices: u32, stacks: u32) -> Option<usize> {
    (slices as usize)
        .checked_mul(2)?
        .checked_mul((stacks as usize).checked_sub(1)?)
}

fn add_cavity(mesh: &mut Mesh, mut inner: Mesh) {
    inner.flip_winding();
    mesh.merge(inner);
}

/// Axis-aligned box with 8 shared corners and 12 outward-facing triangles
fn generate_box(min: Point3<f64>, max: Point3<f64>) -> Mesh {
    let mut mesh = Mesh::with_capacity(8, 12);

    for position in [
        Point3::new(min.x, min.y, min.z),
        Point3::new(max.x, min.y, min.z),
        Point3::new(max.x, max.y, min.z),
        Point3::new(min.x, max.y, min.z),
        Point3::new(min.x, min.y, max.z),
        Point3::new(max.x, min.y, max.z),
        Point3::new(max.x, max.y, max.z),
        Point3::new(min.x, max.y, max.z),
    ] {
        mesh.add_vertex(position);
    }

    let faces = [
        // Front (z+)
        [4, 5, 6],
        [4, 6, 7],
        // Back (z-)
        [1, 0, 3],
        [1, 3, 2],
        // Right (x+)
        [5, 1, 2],
        [5, 2, 6],
        // Left (x-)
        [0, 4, 7],
        [0, 7, 3],
        // Top (y+)
        [7, 6, 2],
        [7, 2, 3],
        // Bottom (y-)
        [0, 1, 5],
        [0, 5, 4],
    ];
    for face in faces {
        mesh.add_triangle(Triangle::new(face));
    }

    mesh
}

/// UV sphere around the origin with single pole vertices on the z axis
fn generate_sphere(radius: f64, slices: u32, stacks: u32) -> Mesh {
    let triangles = sphere_triangles(slices, stacks).unwrap_or(0);
    let slices = slices as usize;
    let stacks = stacks as usize;
    let mut mesh = Mesh::with_capacity(2 + triangles / 2, triangles);

    let top = mesh.add_vertex(Point3::new(0.0, 0.0, radius));
    for i in 1..stacks {
        let phi = PI * i as f64 / stacks as f64;
        let z = radius * phi.cos();
        let ring = radius * phi.sin();
        for j in 0..slices {
            let theta = TAU * j as f64 / slices as f64;
            mesh.add_vertex(Point3::new(ring * theta.cos(), ring * theta.sin(), z));
        }
    }
    let bottom = mesh.add_vertex(Point3::new(0.0, 0.0, -radius));

    let ring = |i: usize, j: usize| 1 + (i - 1) * slices + j % slices;

    for j in 0..slices {
        mesh.add_triangle(Triangle::new([top, ring(1, j), ring(1, j + 1)]));
    }
    for i in 1..stacks - 1 {
        for j in 0..slices {
            let (a, b) = (ring(i, j), ring(i, j + 1));
            let (c, d) = (ring(i + 1, j), ring(i + 1, j + 1));
            mesh.add_triangle(Triangle::new([a, c, d]));
            mesh.add_triangle(Triangle::new([a, d, b]));
        }
    }
    for j in 0..slices {
        mesh.add_triangle(Triangle::new([bottom, ring(stacks - 1, j + 1), ring(stacks - 1, j)]));
    }

    mesh
}

/// Cylinder along +z between `z0` and `z1` with fan-triangulated caps
fn generate_cylinder(radius: f64, z0: f64, z1: f64, segments: u32) -> Mesh {
    let n = segments as usize;
    let mut mesh = Mesh::with_capacity(2 + 2 * n, 4 * n);

    let bottom_center = mesh.add_vertex(Point3::new(0.0, 0.0, z0));
    let top_center = mesh.add_vertex(Point3::new(0.0, 0.0, z1));

    let mut bottom = Vec::with_capacity(n);
    let mut top = Vec::with_capacity(n);
    for i in 0..n {
        let angle = TAU * i as f64 / n as f64;
        let (sin, cos) = angle.sin_cos();
        bottom.push(mesh.add_vertex(Point3::new(radius * cos, radius * sin, z0)));
        top.push(mesh.add_vertex(Point3::new(radius * cos, radius * sin, z1)));
    }

    for i in 0..n {
        let next = (i + 1) % n;
        mesh.add_triangle(Triangle::new([bottom_center, bottom[next], bottom[i]]));
        mesh.add_triangle(Triangle::new([top_center, top[i], top[next]]));
        mesh.add_triangle(Triangle::new([bottom[i], bottom[next], top[next]]));
        mesh.add_triangle(Triangle::new([bottom[i], top[next], top[i]]));
    }

    mesh
}

/// Caller-supplied geometry, used verbatim apart from index bounds checks
fn generate_polyhedron(vertices: &[[f64; 3]], faces: &[Vec<usize>]) -> Result<Mesh> {
    const KIND: &str = "Polyhedron";
    if vertices.is_empty() {
        return Err(Error::invalid(KIND, "vertices", "missing"));
    }
    if faces.is_empty() {
        return Err(Error::invalid(KIND, "faces", "missing"));
    }

    let mut mesh = Mesh::with_capacity(vertices.len(), faces.len());
    for (i, v) in vertices.iter().enumerate() {
        if v.iter().any(|c| !c.is_finite()) {
            return Err(Error::invalid(KIND, "vertices", format!("vertex {i} is not finite")));
        }
        mesh.add_vertex(Point3::new(v[0], v[1], v[2]));
    }

    for (i, face) in faces.iter().enumerate() {
        if face.len() < 3 {
            return Err(Error::invalid(KIND, "faces", format!("face {i} has fewer than 3 indices")));
        }
        if let Some(bad) = face.iter().find(|&&idx| idx >= vertices.len()) {
            return Err(Error::invalid(
                KIND,
                "faces",
                format!("face {i} references vertex {bad} of {}", vertices.len()),
            ));
        }
        for k in 1..face.len() - 1 {
            mesh.add_triangle(Triangle::new([face[0], face[k], face[k + 1]]));
        }
    }

    Ok(mesh)
}

/// Extrude a counter-clockwise outline that is star-shaped about the origin
/// along +z. Caps are fans around a centre vertex.
pub(crate) fn extrude_star_outline(outline: &[Point2<f64>], thickness: f64) -> Mesh {
    let n = outline.len();
    let mut mesh = Mesh::with_capacity(2 + 2 * n, 4 * n);

    let bottom_center = mesh.add_vertex(Point3::new(0.0, 0.0, 0.0));
    let top_center = mesh.add_vertex(Point3::new(0.0, 0.0, thickness));
    let bottom: Vec<usize> = outline
        .iter()
        .map(|p| mesh.add_vertex(Point3::new(p.x, p.y, 0.0)))
        .collect();
    let top: Vec<usize> = outline
        .iter()
        .map(|p| mesh.add_vertex(Point3::new(p.x, p.y, thickness)))
        .collect();

    for i in 0..n {
        let next = (i + 1) % n;
        mesh.add_triangle(Triangle::new([bottom_center, bottom[next], bottom[i]]));
        mesh.add_triangle(Triangle::new([top_center, top[i], top[next]]));
        mesh.add_triangle(Triangle::new([bottom[i], bottom[next], top[next]]));
        mesh.add_triangle(Triangle::new([bottom[i], top[next], top[i]]));
    }

    mesh
}
