// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Kernel handle passed to the scene resolver and the sandbox host

use crate::config::{ForgeConfig, TessellationSettings};
use crate::error::Result;
use crate::geometry::{BooleanKernel, BspKernel, CsgOp, Mesh, PrimitiveDescriptor, Synthesizer};
use crate::io::{self, StlOptions, StlOutput};
use crate::scene::{self, SceneNode};
use std::fmt;
use std::sync::Arc;

/// Bundles the synthesizer, the boolean engine and the export settings.
///
/// Cheap to clone; the boolean engine is shared.
#[derive(Clone)]
pub struct Kernel {
    synthesizer: Synthesizer,
    csg: Arc<dyn BooleanKernel>,
    stl: StlOptions,
}

impl Kernel {
    /// Create a kernel from its parts
    pub fn new(settings: TessellationSettings, csg: Arc<dyn BooleanKernel>, stl: StlOptions) -> Self {
        Self {
            synthesizer: Synthesizer::new(settings),
            csg,
            stl,
        }
    }

    /// Kernel with the BSP boolean engine and the configured defaults
    pub fn from_config(config: &ForgeConfig) -> Self {
        Self::new(
            config.tessellation.clone(),
            Arc::new(BspKernel),
            config.export.stl_options(),
        )
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn csg(&self) -> &dyn BooleanKernel {
        self.csg.as_ref()
    }

    pub fn stl_options(&self) -> &StlOptions {
        &self.stl
    }

    /// Replace the export settings
    pub fn with_stl_options(mut self, stl: StlOptions) -> Self {
        self.stl = stl;
        self
    }

    /// Synthesize a primitive in its local frame
    pub fn synthesize(&self, descriptor: &PrimitiveDescriptor) -> Result<Mesh> {
        self.synthesizer.synthesize(descriptor)
    }

    /// Boolean combination through the injected engine
    pub fn combine(&self, op: CsgOp, a: Mesh, b: Mesh) -> Mesh {
        self.csg.combine(op, a, b)
    }

    /// Bake every node of a scene and serialize the result with the kernel's
    /// export settings
    pub fn render(&self, roots: Vec<SceneNode>) -> Result<StlOutput> {
        let meshes = scene::flatten_scene(self, roots)?;
        io::try_to_stl(&meshes, &self.stl)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::from_config(&ForgeConfig::default())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("synthesizer", &self.synthesizer)
            .field("stl", &self.stl)
            .finish_non_exhaustive()
    }
}
