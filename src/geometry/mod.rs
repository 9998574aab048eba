// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry module - mesh representation, primitives, gears and booleans

mod bbox;
pub mod csg;
mod gear;
mod gear_train;
mod mesh;
pub mod mesh_utils;
mod primitives;

pub use bbox::BoundingBox;
pub use csg::{combine, BooleanKernel, BspKernel, CsgOp};
pub use gear::{GearSpec, DEFAULT_INVOLUTE_STEP};
pub use gear_train::{GearId, GearTrain};
pub use mesh::{Mesh, Triangle};
pub use primitives::{PrimitiveDescriptor, ShapeParams, Synthesizer};
