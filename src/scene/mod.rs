// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Scene graph and world-space resolution

mod node;
mod resolver;

pub use node::{CsgTree, NodeContent, SceneNode};
pub use resolver::{bake_world_transform, flatten_scene};
