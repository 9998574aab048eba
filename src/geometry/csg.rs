// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! CSG (Constructive Solid Geometry) operations using BSP trees
//!
//! Operands are expected to be closed, manifold, world-space meshes. That is
//! not checked; other input produces unspecified geometry but never panics.
//! Tree traversals use explicit stacks so deep trees from finely tessellated
//! convex solids do not exhaust the thread stack.

use super::mesh_utils::is_closed;
use super::{Mesh, Triangle};
use crate::error::Error;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-5;

/// Boolean operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CsgOp {
    Union,
    Subtract,
    Intersect,
}

/// A boolean geometry kernel, injected wherever CSG is needed
pub trait BooleanKernel: Send + Sync {
    /// Combine two meshes into a new, independent mesh
    fn combine(&self, op: CsgOp, a: Mesh, b: Mesh) -> Mesh;
}

/// BSP-tree boolean kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct BspKernel;

impl BooleanKernel for BspKernel {
    fn combine(&self, op: CsgOp, a: Mesh, b: Mesh) -> Mesh {
        combine(op, a, b)
    }
}

#[derive(Debug, Clone, Copy)]
struct Plane {
    normal: Vector3<f64>,
    w: f64,
}

#[derive(Debug, Clone)]
struct Polygon {
    vertices: Vec<Point3<f64>>,
    plane: Plane,
}

/// Output lists of a plane split
#[derive(Default)]
struct SplitBuckets {
    coplanar_front: Vec<Polygon>,
    coplanar_back: Vec<Polygon>,
    front: Vec<Polygon>,
    back: Vec<Polygon>,
}

const COPLANAR: u8 = 0;
const FRONT: u8 = 1;
const BACK: u8 = 2;
const SPANNING: u8 = 3;

impl Plane {
    fn from_points(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Self> {
        let cross = (b - a).cross(&(c - a));
        let len = cross.norm();
        if !(len > f64::EPSILON) || !len.is_finite() {
            return None;
        }
        let normal = cross / len;
        Some(Self {
            normal,
            w: normal.dot(&a.coords),
        })
    }

    fn flip(&mut self) {
        self.normal = -self.normal;
        self.w = -self.w;
    }

    fn distance(&self, point: &Point3<f64>) -> f64 {
        self.normal.dot(&point.coords) - self.w
    }

    fn classify(&self, point: &Point3<f64>) -> u8 {
        let t = self.distance(point);
        if t < -EPSILON {
            BACK
        } else if t > EPSILON {
            FRONT
        } else {
            COPLANAR
        }
    }

    fn split_polygon(&self, polygon: Polygon, out: &mut SplitBuckets) {
        let types: Vec<u8> = polygon.vertices.iter().map(|v| self.classify(v)).collect();
        let polygon_type = types.iter().fold(COPLANAR, |acc, t| acc | t);

        match polygon_type {
            COPLANAR => {
                if self.normal.dot(&polygon.plane.normal) > 0.0 {
                    out.coplanar_front.push(polygon);
                } else {
                    out.coplanar_back.push(polygon);
                }
            }
            FRONT => out.front.push(polygon),
            BACK => out.back.push(polygon),
            _ => {
                debug_assert_eq!(polygon_type, SPANNING);
                let n = polygon.vertices.len();
                let mut front = Vec::with_capacity(n + 1);
                let mut back = Vec::with_capacity(n + 1);

                for i in 0..n {
                    let j = (i + 1) % n;
                    let (ti, tj) = (types[i], types[j]);
                    let (vi, vj) = (polygon.vertices[i], polygon.vertices[j]);

                    if ti != BACK {
                        front.push(vi);
                    }
                    if ti != FRONT {
                        back.push(vi);
                    }
                    if (ti | tj) == SPANNING {
                        let t = (self.w - self.normal.dot(&vi.coords)) / self.normal.dot(&(vj - vi));
                        let v = vi + (vj - vi) * t;
                        front.push(v);
                        back.push(v);
                    }
                }

                if front.len() >= 3 {
                    out.front.push(Polygon {
                        vertices: front,
                        plane: polygon.plane,
                    });
                }
                if back.len() >= 3 {
                    out.back.push(Polygon {
                        vertices: back,
                        plane: polygon.plane,
                    });
                }
            }
        }
    }
}

impl Polygon {
    fn flip(&mut self) {
        self.vertices.reverse();
        self.plane.flip();
    }
}

/// BSP tree node for CSG operations
#[derive(Debug, Clone, Default)]
struct BspNode {
    plane: Option<Plane>,
    front: Option<Box<BspNode>>,
    back: Option<Box<BspNode>>,
    polygons: Vec<Polygon>,
}

impl BspNode {
    fn new(polygons: Vec<Polygon>) -> Self {
        let mut node = Self::default();
        node.build(polygons);
        node
    }

    /// Insert polygons, splitting them on the way down
    fn build(&mut self, polygons: Vec<Polygon>) {
        let mut stack: Vec<(&mut BspNode, Vec<Polygon>)> = vec![(self, polygons)];

        while let Some((node, polygons)) = stack.pop() {
            let Some(first) = polygons.first() else {
                continue;
            };
            let plane = *node.plane.get_or_insert(first.plane);

            let mut buckets = SplitBuckets::default();
            for polygon in polygons {
                plane.split_polygon(polygon, &mut buckets);
            }
            node.polygons.append(&mut buckets.coplanar_front);
            node.polygons.append(&mut buckets.coplanar_back);

            let BspNode { front, back, .. } = node;
            if !buckets.front.is_empty() {
                stack.push((&mut **front.get_or_insert_with(Box::default), buckets.front));
            }
            if !buckets.back.is_empty() {
                stack.push((&mut **back.get_or_insert_with(Box::default), buckets.back));
            }
        }
    }

    /// Convert solid space to empty space and vice versa
    fn invert(&mut self) {
        let mut stack: Vec<&mut BspNode> = vec![self];
        while let Some(node) = stack.pop() {
            for polygon in &mut node.polygons {
                polygon.flip();
            }
            if let Some(plane) = &mut node.plane {
                plane.flip();
            }
            std::mem::swap(&mut node.front, &mut node.back);

            let BspNode { front, back, .. } = node;
            if let Some(front) = front {
                stack.push(&mut **front);
            }
            if let Some(back) = back {
                stack.push(&mut **back);
            }
        }
    }

    /// Remove the parts of `polygons` that lie inside this tree's solid
    fn clip_polygons(&self, polygons: Vec<Polygon>) -> Vec<Polygon> {
        let mut result = Vec::new();
        let mut stack: Vec<(&BspNode, Vec<Polygon>)> = vec![(self, polygons)];

        while let Some((node, polygons)) = stack.pop() {
            let Some(plane) = node.plane else {
                result.extend(polygons);
                continue;
            };

            let mut buckets = SplitBuckets::default();
            for polygon in polygons {
                plane.split_polygon(polygon, &mut buckets);
            }
            let mut front = buckets.coplanar_front;
            front.append(&mut buckets.front);
            let mut back = buckets.coplanar_back;
            back.append(&mut buckets.back);

            match &node.front {
                Some(child) => stack.push((&**child, front)),
                None => result.extend(front),
            }
            // Without a back subtree the back side is solid: drop
            if let Some(child) = &node.back {
                stack.push((&**child, back));
            }
        }

        result
    }

    /// Remove all polygons in this tree that are inside `other`
    fn clip_to(&mut self, other: &BspNode) {
        let mut stack: Vec<&mut BspNode> = vec![self];
        while let Some(node) = stack.pop() {
            node.polygons = other.clip_polygons(std::mem::take(&mut node.polygons));
            let BspNode { front, back, .. } = node;
            if let Some(front) = front {
                stack.push(&mut **front);
            }
            if let Some(back) = back {
                stack.push(&mut **back);
            }
        }
    }

    fn all_polygons(&self) -> Vec<Polygon> {
        let mut result = Vec::new();
        let mut stack: Vec<&BspNode> = vec![self];
        while let Some(node) = stack.pop() {
            result.extend(node.polygons.iter().cloned());
            if let Some(front) = &node.front {
                stack.push(&**front);
            }
            if let Some(back) = &node.back {
                stack.push(&**back);
            }
        }
        result
    }
}

/// Convert mesh to polygons, dropping zero-area triangles
fn mesh_to_polygons(mesh: &Mesh) -> Vec<Polygon> {
    mesh.triangles
        .iter()
        .filter(|t| t.indices.iter().all(|&i| i < mesh.vertices.len()))
        .filter_map(|t| {
            let [a, b, c] = mesh.triangle_positions(t);
            Plane::from_points(&a, &b, &c).map(|plane| Polygon {
                vertices: vec![a, b, c],
                plane,
            })
        })
        .collect()
}

/// Convert convex polygons back to a welded triangle mesh
fn polygons_to_mesh(polygons: &[Polygon]) -> Mesh {
    let mut mesh = Mesh::new();
    for polygon in polygons {
        let base = mesh.vertex_count();
        for v in &polygon.vertices {
            mesh.add_vertex(*v);
        }
        for k in 1..polygon.vertices.len() - 1 {
            mesh.add_triangle(Triangle::new([base, base + k, base + k + 1]));
        }
    }
    mesh.weld_vertices();
    mesh
}

fn operand_polygons(mesh: &Mesh, name: &str) -> Vec<Polygon> {
    let polygons = mesh_to_polygons(mesh);
    if polygons.is_empty() && !mesh.is_empty() {
        let err = Error::GeometryDegenerate(format!(
            "CSG operand {name} has {} triangles and no area",
            mesh.triangle_count()
        ));
        tracing::warn!(error = %err, "treating CSG operand as empty");
    }
    if tracing::enabled!(tracing::Level::DEBUG) && !polygons.is_empty() && !is_closed(mesh) {
        tracing::debug!(operand = name, "CSG operand is not closed; result is unspecified");
    }
    polygons
}

/// Combine two meshes. Inputs are consumed; the result shares nothing with
/// them.
///
/// Coincident vertices are welded, but edges split by one operand's planes
/// are not propagated into the neighbouring faces, so the result can carry
/// T-junctions along cut seams. It encloses the correct volume yet is not
/// guaranteed to pass an edge-pairing closedness check.
pub fn combine(op: CsgOp, a: Mesh, b: Mesh) -> Mesh {
    let polys_a = operand_polygons(&a, "a");
    let polys_b = operand_polygons(&b, "b");
    let baked = a.baked && b.baked;

    let mut result = match (op, polys_a.is_empty(), polys_b.is_empty()) {
        (CsgOp::Union, true, _) => return b,
        (CsgOp::Union, _, true) => return a,
        (CsgOp::Intersect, true, _) | (CsgOp::Intersect, _, true) => Mesh::empty(),
        (CsgOp::Subtract, true, _) => Mesh::empty(),
        (CsgOp::Subtract, _, true) => return a,
        (CsgOp::Union, false, false) => csg_union(polys_a, polys_b),
        (CsgOp::Subtract, false, false) => csg_subtract(polys_a, polys_b),
        (CsgOp::Intersect, false, false) => csg_intersect(polys_a, polys_b),
    };
    result.baked = baked;
    result
}

fn csg_union(polys_a: Vec<Polygon>, polys_b: Vec<Polygon>) -> Mesh {
    let mut a = BspNode::new(polys_a);
    let mut b = BspNode::new(polys_b);

    a.clip_to(&b);
    b.clip_to(&a);
    b.invert();
    b.clip_to(&a);
    b.invert();
    a.build(b.all_polygons());

    polygons_to_mesh(&a.all_polygons())
}

fn csg_subtract(polys_a: Vec<Polygon>, polys_b: Vec<Polygon>) -> Mesh {
    let mut a = BspNode::new(polys_a);
    let mut b = BspNode::new(polys_b);

    a.invert();
    a.clip_to(&b);
    b.clip_to(&a);
    b.invert();
    b.clip_to(&a);
    b.invert();
    a.build(b.all_polygons());
    a.invert();

    polygons_to_mesh(&a.all_polygons())
}

fn csg_intersect(polys_a: Vec<Polygon>, polys_b: Vec<Polygon>) -> Mesh {
    let mut a = BspNode::new(polys_a);
    let mut b = BspNode::new(polys_b);

    a.invert();
    b.clip_to(&a);
    b.invert();
    a.clip_to(&b);
    b.clip_to(&a);
    a.build(b.all_polygons());
    a.invert();

    polygons_to_mesh(&a.all_polygons())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_utils::signed_volume;
    use crate::geometry::{PrimitiveDescriptor, Synthesizer};
    use nalgebra::Matrix4;

    fn cube(size: f64, offset: [f64; 3]) -> Mesh {
        let mut mesh = Synthesizer::default()
            .synthesize(&PrimitiveDescriptor::cube(size, size, size))
            .unwrap();
        mesh.transform(&Matrix4::new_translation(&Vector3::new(offset[0], offset[1], offset[2])));
        mesh
    }

    #[test]
    fn test_union_with_empty_is_identity() {
        let a = cube(2.0, [0.0; 3]);
        let result = combine(CsgOp::Union, a.clone(), Mesh::empty());
        assert_eq!(result, a);
        let result = combine(CsgOp::Union, Mesh::empty(), a.clone());
        assert_eq!(result, a);
    }

    #[test]
    fn test_degenerate_operands() {
        let a = cube(2.0, [0.0; 3]);
        assert!(combine(CsgOp::Intersect, a.clone(), Mesh::empty()).is_empty());
        assert!(combine(CsgOp::Subtract, Mesh::empty(), a.clone()).is_empty());
        assert_eq!(combine(CsgOp::Subtract, a.clone(), Mesh::empty()), a);

        // Zero-area operand counts as empty
        let mut flat = Mesh::new();
        let p = flat.add_vertex(Point3::new(1.0, 1.0, 1.0));
        flat.add_triangle(Triangle::new([p, p, p]));
        assert_eq!(combine(CsgOp::Union, a.clone(), flat), a);
    }

    #[test]
    fn test_overlapping_volumes() {
        let a = || cube(2.0, [0.0; 3]);
        let b = || cube(2.0, [1.0, 0.0, 0.0]);

        let union = combine(CsgOp::Union, a(), b());
        let difference = combine(CsgOp::Subtract, a(), b());
        let intersection = combine(CsgOp::Intersect, a(), b());

        assert!((signed_volume(&union) - 12.0).abs() < 1e-6);
        assert!((signed_volume(&difference) - 4.0).abs() < 1e-6);
        assert!((signed_volume(&intersection) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_curved_union_encloses_correct_volume() {
        let sphere = |x: f64| {
            let mut mesh = Synthesizer::default()
                .synthesize(&PrimitiveDescriptor::sphere(1.0))
                .unwrap();
            mesh.transform(&Matrix4::new_translation(&Vector3::new(x, 0.0, 0.0)));
            mesh
        };
        let single = signed_volume(&sphere(0.0));
        let union = combine(CsgOp::Union, sphere(0.0), sphere(1.0));
        let intersection = combine(CsgOp::Intersect, sphere(0.0), sphere(1.0));

        assert!(union.validate_indices().is_ok());
        let total = signed_volume(&union) + signed_volume(&intersection);
        assert!((total - 2.0 * single).abs() < 1e-4, "{total} vs {}", 2.0 * single);
        assert!(signed_volume(&union) > single);
    }

    #[test]
    fn test_subtract_is_not_commutative() {
        let big = cube(4.0, [0.0; 3]);
        let small = cube(2.0, [1.0, 1.0, 1.0]);
        let hollowed = combine(CsgOp::Subtract, big.clone(), small.clone());
        let nothing = combine(CsgOp::Subtract, small, big);
        assert!((signed_volume(&hollowed) - 56.0).abs() < 1e-6);
        assert!(signed_volume(&nothing).abs() < 1e-6);
    }

    #[test]
    fn test_disjoint_union_keeps_both() {
        let union = combine(CsgOp::Union, cube(1.0, [0.0; 3]), cube(1.0, [5.0, 0.0, 0.0]));
        assert_eq!(union.triangle_count(), 24);
        assert!((signed_volume(&union) - 2.0).abs() < 1e-9);
        assert!(union.validate_indices().is_ok());
    }

    #[test]
    fn test_kernel_trait_dispatch() {
        let kernel: &dyn BooleanKernel = &BspKernel;
        let mut a = cube(1.0, [0.0; 3]);
        a.baked = true;
        let mut b = cube(1.0, [0.5, 0.0, 0.0]);
        b.baked = true;
        let result = kernel.combine(CsgOp::Intersect, a, b);
        assert!(result.baked);
        assert!((signed_volume(&result) - 0.5).abs() < 1e-6);
    }
}
