// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! World-space resolution of scene trees

use super::{CsgTree, NodeContent, SceneNode};
use crate::error::{Error, Result};
use crate::geometry::Mesh;
use crate::kernel::Kernel;
use nalgebra::Matrix4;
use rayon::prelude::*;

/// Bake a node and all its descendants into one world-space mesh.
///
/// Every vertex is rotated then translated by the node's local transform,
/// composed with its ancestors' for children. The result has an identity
/// transform and its `baked` flag set. A node whose mesh is already baked is
/// rejected with [`Error::AlreadyBaked`].
pub fn bake_world_transform(kernel: &Kernel, node: SceneNode) -> Result<Mesh> {
    let mut baked = Mesh::new();
    for mesh in flatten_scene(kernel, vec![node])? {
        baked.merge(mesh);
    }
    baked.baked = true;
    Ok(baked)
}

/// Bake every node of the given trees, in depth-first order, one mesh per
/// node. Nodes are baked in parallel.
pub fn flatten_scene(kernel: &Kernel, roots: Vec<SceneNode>) -> Result<Vec<Mesh>> {
    let mut jobs = Vec::new();
    let mut stack: Vec<(SceneNode, Matrix4<f64>)> = roots
        .into_iter()
        .rev()
        .map(|root| (root, Matrix4::identity()))
        .collect();

    while let Some((node, parent)) = stack.pop() {
        let world = parent * node.local_matrix();
        for child in node.children.into_iter().rev() {
            stack.push((child, world));
        }
        jobs.push((node.content, world));
    }

    tracing::debug!(nodes = jobs.len(), "baking scene");
    jobs.into_par_iter()
        .map(|(content, world)| bake_content(kernel, content, &world))
        .collect()
}

fn bake_content(kernel: &Kernel, content: NodeContent, world: &Matrix4<f64>) -> Result<Mesh> {
    match content {
        NodeContent::Mesh { mut mesh } => {
            if mesh.baked {
                return Err(Error::AlreadyBaked);
            }
            // Identity must leave vertices bit-identical
            if *world != Matrix4::identity() {
                mesh.transform(world);
            }
            mesh.baked = true;
            Ok(mesh)
        }
        NodeContent::Csg { tree } => {
            let mut mesh = bake_tree(kernel, tree, world)?;
            mesh.baked = true;
            Ok(mesh)
        }
    }
}

/// Leaves are baked with the composed transform, then combined in world
/// space. Operand order is preserved.
fn bake_tree(kernel: &Kernel, tree: CsgTree, world: &Matrix4<f64>) -> Result<Mesh> {
    match tree {
        CsgTree::Leaf(node) => {
            let leaf = *node;
            let leaf_world = world * leaf.local_matrix();
            let mut mesh = bake_content(kernel, leaf.content, &leaf_world)?;
            for child in leaf.children {
                mesh.merge(bake_subtree(kernel, child, &leaf_world)?);
            }
            mesh.baked = true;
            Ok(mesh)
        }
        CsgTree::Node { op, left, right } => {
            let (left, right) = rayon::join(
                || bake_tree(kernel, *left, world),
                || bake_tree(kernel, *right, world),
            );
            Ok(kernel.combine(op, left?, right?))
        }
    }
}

fn bake_subtree(kernel: &Kernel, node: SceneNode, parent: &Matrix4<f64>) -> Result<Mesh> {
    let world = parent * node.local_matrix();
    let mut mesh = bake_content(kernel, node.content, &world)?;
    for child in node.children {
        mesh.merge(bake_subtree(kernel, child, &world)?);
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mesh_utils::signed_volume;
    use crate::geometry::{PrimitiveDescriptor, Synthesizer};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn node(descriptor: PrimitiveDescriptor) -> SceneNode {
        SceneNode::from_descriptor(&Synthesizer::default(), &descriptor).unwrap()
    }

    #[test]
    fn test_identity_is_bit_identical() {
        let kernel = Kernel::default();
        let original = node(PrimitiveDescriptor::sphere(1.3));
        let NodeContent::Mesh { mesh: local } = original.content.clone() else {
            panic!("expected a mesh node");
        };

        let baked = bake_world_transform(&kernel, original).unwrap();
        assert!(baked.baked);
        assert_eq!(baked.vertices, local.vertices);
        assert_eq!(baked.triangles, local.triangles);
    }

    #[test]
    fn test_rotation_then_translation() {
        let kernel = Kernel::default();
        let n = node(PrimitiveDescriptor::cube(1.0, 1.0, 1.0))
            .rotated(0.0, 0.0, FRAC_PI_2)
            .at(10.0, 0.0, 0.0);
        let bbox = bake_world_transform(&kernel, n).unwrap().bounding_box();
        assert_relative_eq!(bbox.min.x, 9.0, epsilon = 1e-12);
        assert_relative_eq!(bbox.max.x, 10.0, epsilon = 1e-12);
        assert_relative_eq!(bbox.min.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(bbox.max.y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_children_compose_with_parent() {
        let kernel = Kernel::default();
        let child = node(PrimitiveDescriptor::cube(1.0, 1.0, 1.0)).at(1.0, 0.0, 0.0);
        let parent = node(PrimitiveDescriptor::cube(1.0, 1.0, 1.0))
            .at(0.0, 5.0, 0.0)
            .with_child(child);

        let meshes = flatten_scene(&kernel, vec![parent]).unwrap();
        assert_eq!(meshes.len(), 2);
        assert_relative_eq!(meshes[1].bounding_box().min.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(meshes[1].bounding_box().min.y, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_depth_first_order() {
        let kernel = Kernel::default();
        let leaf = |x: f64| node(PrimitiveDescriptor::cube(1.0, 1.0, 1.0)).at(x, 0.0, 0.0);
        let a = leaf(0.0).with_child(leaf(1.0)).with_child(leaf(2.0));
        let b = leaf(10.0);

        let xs: Vec<f64> = flatten_scene(&kernel, vec![a, b])
            .unwrap()
            .iter()
            .map(|m| m.bounding_box().min.x)
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 10.0]);
    }

    #[test]
    fn test_already_baked_is_rejected() {
        let kernel = Kernel::default();
        let baked = bake_world_transform(&kernel, node(PrimitiveDescriptor::cube(1.0, 1.0, 1.0))).unwrap();
        let result = bake_world_transform(&kernel, SceneNode::mesh(baked));
        assert!(matches!(result, Err(Error::AlreadyBaked)));
    }

    #[test]
    fn test_csg_node_combines_in_world_space() {
        let kernel = Kernel::default();
        let tree = CsgTree::subtract(
            CsgTree::leaf(node(PrimitiveDescriptor::cube(2.0, 2.0, 2.0))),
            CsgTree::leaf(node(PrimitiveDescriptor::cube(2.0, 2.0, 2.0)).at(1.0, 0.0, 0.0)),
        );
        let root = SceneNode::csg(tree).at(0.0, 0.0, 5.0);

        let mesh = bake_world_transform(&kernel, root).unwrap();
        assert!(mesh.baked);
        assert_relative_eq!(signed_volume(&mesh), 4.0, epsilon = 1e-9);
        let bbox = mesh.bounding_box();
        assert_relative_eq!(bbox.max.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.min.z, 5.0, epsilon = 1e-9);
    }
}
