// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Sandboxed execution of untrusted scene code
//!
//! Scene code is Rhai script. A request carries one or more code units; all
//! but the last are importable modules. The host answers on two channels:
//! the result channel (`iframeLoaded`, then exactly one `stlData` or
//! `error`) and a console side channel.

mod api;
mod context;
mod host;
mod protocol;

pub use api::{ScriptScene, ScriptShape};
pub use context::{ContextMonitor, ContextState, ExecutionContext, ExecutionReport, ExecutionResult};
pub use host::SandboxHost;
pub use protocol::{decode_binary_stl, CodeUnit, HostMessage, InboundMessage};
