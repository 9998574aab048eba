// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error types for Polyforge

use std::time::Duration;
use thiserror::Error;

/// Result type alias using Polyforge's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Polyforge operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed primitive parameters; aborts that synthesize call only
    #[error("Invalid parameter `{field}` for {kind}: {reason}")]
    InvalidParameter {
        kind: &'static str,
        field: &'static str,
        reason: String,
    },

    /// Zero-area or zero-volume geometry where a solid was expected
    #[error("Degenerate geometry: {0}")]
    GeometryDegenerate(String),

    /// Mesh could not be written as STL
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A world transform was applied to a mesh that is already in world space
    #[error("Mesh is already baked into world space")]
    AlreadyBaked,

    /// Untrusted code threw or produced a malformed export
    #[error("Sandbox execution failed: {message}")]
    SandboxExecution {
        message: String,
        stack: Option<String>,
    },

    /// Host-enforced execution limit elapsed
    #[error("Sandbox execution timed out after {0:?}")]
    SandboxTimeout(Duration),

    /// A request arrived while the current context was still running
    #[error("Sandbox context is busy with another request")]
    SandboxBusy,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON message error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(kind: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            kind,
            field,
            reason: reason.into(),
        }
    }

    /// Message and optional stack, as reported over the sandbox channel
    pub fn message_and_stack(&self) -> (String, Option<String>) {
        match self {
            Self::SandboxExecution { message, stack } => (message.clone(), stack.clone()),
            other => (other.to_string(), None),
        }
    }
}
