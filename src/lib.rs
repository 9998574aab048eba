// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyforge Solid Modeling Kernel
//!
//! Turns declarative scenes (parametric primitives, involute gears, boolean
//! combinations and transforms) into watertight triangle meshes exported as
//! STL. Untrusted scene code runs in a sandboxed Rhai host that talks to the
//! caller only through message channels.

pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod kernel;
pub mod sandbox;
pub mod scene;
pub mod utils;

pub use config::ForgeConfig;
pub use error::{Error, Result};
pub use geometry::{CsgOp, GearSpec, GearTrain, Mesh, PrimitiveDescriptor, ShapeParams, Synthesizer};
pub use io::{parse_ascii_stl, to_stl, try_to_stl, StlOptions, StlOutput};
pub use kernel::Kernel;
pub use sandbox::{HostMessage, InboundMessage, SandboxHost};
pub use scene::{bake_world_transform, flatten_scene, CsgTree, SceneNode};

/// Synthesize, place and export a list of primitives in one step
pub fn render_descriptors(kernel: &Kernel, descriptors: &[PrimitiveDescriptor]) -> Result<StlOutput> {
    let nodes = descriptors
        .iter()
        .map(|descriptor| SceneNode::from_descriptor(kernel.synthesizer(), descriptor))
        .collect::<Result<Vec<_>>>()?;
    kernel.render(nodes)
}
