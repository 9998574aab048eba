// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Configuration for tessellation, the sandbox host and STL export

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::DEFAULT_INVOLUTE_STEP;
use crate::io::StlOptions;

/// Default configuration file looked up by [`ForgeConfig::load`]
pub const CONFIG_FILE: &str = "polyforge.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub tessellation: TessellationSettings,
    pub sandbox: SandboxConfig,
    pub export: ExportConfig,
}

/// Defaults used by the primitive synthesizer when a descriptor omits them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TessellationSettings {
    pub sphere_width_segments: u32,
    pub sphere_height_segments: u32,
    pub cylinder_segments: u32,
    /// Involute sampling step in radians
    pub involute_step: f64,
    pub gear_pressure_angle: f64,
    /// Hollow wall thickness as a fraction of the smallest extent
    pub hollow_wall_ratio: f64,
    /// Largest triangle count one primitive may synthesize into
    pub max_triangles: usize,
}

impl Default for TessellationSettings {
    fn default() -> Self {
        Self {
            sphere_width_segments: 32,
            sphere_height_segments: 16,
            cylinder_segments: 32,
            involute_step: DEFAULT_INVOLUTE_STEP,
            gear_pressure_angle: 20.0,
            hollow_wall_ratio: 0.1,
            max_triangles: 4_000_000,
        }
    }
}

/// Limits for untrusted scene code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock limit for one execution
    pub timeout_ms: u64,
    /// Script operation budget; unlimited when absent
    pub max_operations: Option<u64>,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    /// Upper bound for sphere and cylinder segment counts
    pub max_segments: u32,
    pub max_teeth: u32,
    /// Deepest boolean nesting a script may build
    pub max_csg_depth: usize,
    /// Most primitives in one shape tree or scene
    pub max_shapes: usize,
    /// Capacity of the result channel
    pub channel_capacity: usize,
    /// Capacity of the console side channel; overflow is dropped
    pub console_capacity: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_operations: None,
            max_call_levels: 64,
            max_string_size: 1 << 20,
            max_array_size: 1 << 20,
            max_segments: 1024,
            max_teeth: 1000,
            max_csg_depth: 64,
            max_shapes: 4096,
            channel_capacity: 16,
            console_capacity: 256,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// STL output defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub binary: bool,
    pub solid_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            binary: false,
            solid_name: "polyforge".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn stl_options(&self) -> StlOptions {
        StlOptions {
            binary: self.binary,
            name: self.solid_name.clone(),
        }
    }
}

impl ForgeConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: ForgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load `polyforge.toml` if present, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = if PathBuf::from(CONFIG_FILE).exists() {
            Self::from_file(CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `POLYFORGE_*` overrides from a variable lookup
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(timeout) = lookup("POLYFORGE_TIMEOUT_MS") {
            self.sandbox.timeout_ms = timeout
                .parse()
                .with_context(|| format!("Invalid POLYFORGE_TIMEOUT_MS: {timeout}"))?;
        }

        if let Some(ops) = lookup("POLYFORGE_MAX_OPERATIONS") {
            self.sandbox.max_operations = Some(
                ops.parse()
                    .with_context(|| format!("Invalid POLYFORGE_MAX_OPERATIONS: {ops}"))?,
            );
        }

        if let Some(binary) = lookup("POLYFORGE_STL_BINARY") {
            self.export.binary = binary
                .parse()
                .with_context(|| format!("Invalid POLYFORGE_STL_BINARY: {binary}"))?;
        }

        if let Some(name) = lookup("POLYFORGE_SOLID_NAME") {
            self.export.solid_name = name;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }
}
