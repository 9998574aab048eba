// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Messages crossing the sandbox boundary

use crate::error::{Error, Result};
use crate::io::StlOutput;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// One unit of scene code. All units but the last are importable modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub object: String,
}

impl CodeUnit {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            name: None,
            object: object.into(),
        }
    }

    pub fn module(name: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            object: object.into(),
        }
    }
}

/// Request sent into the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    ExecuteCode {
        code: Vec<CodeUnit>,
        /// Overrides the host's STL encoding when present
        #[serde(default, skip_serializing_if = "Option::is_none")]
        binary: Option<bool>,
    },
}

impl InboundMessage {
    /// Single-unit request using the host's default encoding
    pub fn execute(code: impl Into<String>) -> Self {
        Self::ExecuteCode {
            code: vec![CodeUnit::new(code)],
            binary: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Message leaving the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    /// The context finished loading and the entry unit is running
    IframeLoaded,
    /// ASCII STL text, or base64 of binary STL
    StlData { stl: String },
    Console {
        args: Vec<String>,
        #[serde(rename = "isError")]
        is_error: bool,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
}

impl HostMessage {
    pub fn stl_data(output: &StlOutput) -> Self {
        let stl = match output {
            StlOutput::Text(text) => text.clone(),
            StlOutput::Binary(bytes) => STANDARD.encode(bytes),
        };
        Self::StlData { stl }
    }

    pub fn console(line: impl Into<String>, is_error: bool) -> Self {
        Self::Console {
            args: vec![line.into()],
            is_error,
        }
    }

    pub fn error(err: &Error) -> Self {
        let (error, stack) = err.message_and_stack();
        Self::Error { error, stack }
    }

    /// Whether this message ends the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StlData { .. } | Self::Error { .. })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode the payload of a `stlData` message produced for binary output
pub fn decode_binary_stl(stl: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(stl)
        .map_err(|err| Error::Serialization(format!("invalid base64 STL payload: {err}")))
}
