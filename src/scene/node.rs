// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Scene graph nodes

use crate::error::Result;
use crate::geometry::{CsgOp, Mesh, PrimitiveDescriptor, Synthesizer};
use crate::utils::math::local_matrix;
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

/// What a node carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeContent {
    Mesh { mesh: Mesh },
    Csg { tree: CsgTree },
}

/// Boolean expression over scene nodes, evaluated bottom-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CsgTree {
    Leaf(Box<SceneNode>),
    Node {
        op: CsgOp,
        left: Box<CsgTree>,
        right: Box<CsgTree>,
    },
}

impl CsgTree {
    pub fn leaf(node: SceneNode) -> Self {
        Self::Leaf(Box::new(node))
    }

    pub fn combine(op: CsgOp, left: CsgTree, right: CsgTree) -> Self {
        Self::Node {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn union(left: CsgTree, right: CsgTree) -> Self {
        Self::combine(CsgOp::Union, left, right)
    }

    pub fn subtract(left: CsgTree, right: CsgTree) -> Self {
        Self::combine(CsgOp::Subtract, left, right)
    }

    pub fn intersect(left: CsgTree, right: CsgTree) -> Self {
        Self::combine(CsgOp::Intersect, left, right)
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            match tree {
                Self::Leaf(_) => count += 1,
                Self::Node { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
            }
        }
        count
    }
}

/// A mesh or CSG expression with a local transform and children.
///
/// The local transform rotates (Euler XYZ, radians) and then translates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneNode {
    pub content: NodeContent,
    #[serde(default)]
    pub position: [f64; 3],
    #[serde(default)]
    pub rotation: [f64; 3],
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    fn with_content(content: NodeContent) -> Self {
        Self {
            content,
            position: [0.0; 3],
            rotation: [0.0; 3],
            color: None,
            children: Vec::new(),
        }
    }

    pub fn mesh(mesh: Mesh) -> Self {
        Self::with_content(NodeContent::Mesh { mesh })
    }

    pub fn csg(tree: CsgTree) -> Self {
        Self::with_content(NodeContent::Csg { tree })
    }

    /// Synthesize a descriptor into a node carrying its pose and color
    pub fn from_descriptor(synthesizer: &Synthesizer, descriptor: &PrimitiveDescriptor) -> Result<Self> {
        let mesh = synthesizer.synthesize(descriptor)?;
        Ok(Self {
            position: descriptor.position,
            rotation: descriptor.rotation,
            color: descriptor.color.clone(),
            ..Self::mesh(mesh)
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

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Local-to-parent matrix
    pub fn local_matrix(&self) -> Matrix4<f64> {
        local_matrix(&self.position, &self.rotation)
    }

    /// Number of nodes in this subtree, CSG leaves included
    pub fn node_count(&self) -> usize {
        let own = match &self.content {
            NodeContent::Mesh { .. } => 1,
            NodeContent::Csg { tree } => 1 + count_tree_nodes(tree),
        };
        own + self.children.iter().map(SceneNode::node_count).sum::<usize>()
    }
}

fn count_tree_nodes(tree: &CsgTree) -> usize {
    match tree {
        CsgTree::Leaf(node) => node.node_count(),
        CsgTree::Node { left, right, .. } => count_tree_nodes(left) + count_tree_nodes(right),
    }
}
