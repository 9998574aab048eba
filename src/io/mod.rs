// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! I/O module - STL exporting and importing

mod importer;
mod stl;

pub use importer::{parse_ascii_stl, read_stl_file};
pub use stl::{to_stl, try_to_stl, write_stl, StlOptions, StlOutput};
