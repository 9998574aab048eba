// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Sandbox host: runs one request at a time on a blocking worker

use super::api::{build_engine, eval_error, exported_value, parse_error, EngineWiring, ExportSlot};
use super::context::{ContextMonitor, ContextState, ExecutionContext, ExecutionReport, ExecutionResult};
use super::protocol::{CodeUnit, HostMessage, InboundMessage};
use crate::config::{ForgeConfig, SandboxConfig};
use crate::error::{Error, Result};
use crate::io::{try_to_stl, StlOptions, StlOutput};
use crate::kernel::Kernel;
use crate::scene::flatten_scene;
use parking_lot::Mutex;
use rhai::module_resolvers::StaticModuleResolver;
use rhai::{Dynamic, Module, Scope};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Entry unit label used in parse error stacks
const ENTRY_UNIT: &str = "main";

/// Accepts `executeCode` requests and runs them under the configured limits
#[derive(Debug)]
pub struct SandboxHost {
    config: SandboxConfig,
    kernel: Kernel,
    current: Mutex<Option<ContextMonitor>>,
    next_id: AtomicU64,
}

impl SandboxHost {
    pub fn new(config: SandboxConfig, kernel: Kernel) -> Self {
        Self {
            config,
            kernel,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &ForgeConfig) -> Self {
        Self::new(config.sandbox.clone(), Kernel::from_config(config))
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// State of the most recent context, if any
    pub fn current_state(&self) -> Option<ContextState> {
        self.current.lock().as_ref().map(ContextMonitor::state)
    }

    /// No context is loading or running
    pub fn is_idle(&self) -> bool {
        self.current_state().map_or(true, ContextState::is_terminal)
    }

    /// Start a run. Must be called from within a tokio runtime.
    ///
    /// Fails with [`Error::SandboxBusy`] while the previous context has not
    /// reached a terminal state.
    pub fn submit(&self, message: InboundMessage) -> Result<ExecutionContext> {
        let runtime = Handle::try_current().map_err(|err| Error::SandboxExecution {
            message: format!("sandbox host requires a tokio runtime: {err}"),
            stack: None,
        })?;

        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|monitor| !monitor.state().is_terminal()) {
            return Err(Error::SandboxBusy);
        }

        let InboundMessage::ExecuteCode { code, binary } = message;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let monitor = ContextMonitor::new(id);

        // Room for `iframeLoaded` and the terminal message
        let (result_tx, result_rx) = mpsc::channel(self.config.channel_capacity.max(2));
        let (console_tx, console_rx) = mpsc::channel(self.config.console_capacity.max(1));

        let mut stl = self.kernel.stl_options().clone();
        if let Some(binary) = binary {
            stl.binary = binary;
        }

        let job = Job {
            units: code,
            stl,
            kernel: self.kernel.clone(),
            config: self.config.clone(),
            monitor: monitor.clone(),
            results: result_tx.clone(),
            console: console_tx,
        };
        tracing::info!(context = id, units = job.units.len(), "sandbox context loading");
        let driver = runtime.spawn(drive(job, result_tx, self.config.timeout()));

        *current = Some(monitor.clone());
        Ok(ExecutionContext::new(monitor, result_rx, console_rx, driver))
    }

    /// Decode a JSON request and submit it
    pub fn submit_json(&self, json: &str) -> Result<ExecutionContext> {
        self.submit(InboundMessage::from_json(json)?)
    }

    /// Submit and wait for the run to finish
    pub async fn execute(&self, message: InboundMessage) -> Result<ExecutionReport> {
        let context = self.submit(message)?;
        Ok(context.wait().await)
    }
}

struct Job {
    units: Vec<CodeUnit>,
    stl: StlOptions,
    kernel: Kernel,
    config: SandboxConfig,
    monitor: ContextMonitor,
    results: mpsc::Sender<HostMessage>,
    console: mpsc::Sender<HostMessage>,
}

enum Ending {
    Finished(Result<StlOutput>),
    TimedOut,
    Cancelled,
}

async fn drive(job: Job, results: mpsc::Sender<HostMessage>, limit: Duration) -> ExecutionResult {
    let monitor = job.monitor.clone();
    let worker = tokio::task::spawn_blocking(move || run_job(job));

    let ending = tokio::select! {
        joined = tokio::time::timeout(limit, worker) => match joined {
            Ok(Ok(result)) => Ending::Finished(result),
            Ok(Err(err)) => Ending::Finished(Err(execution_error(format!("sandbox worker failed: {err}")))),
            Err(_) => Ending::TimedOut,
        },
        () = monitor.cancelled() => Ending::Cancelled,
    };

    match ending {
        Ending::Finished(Ok(stl)) => {
            let message = HostMessage::stl_data(&stl);
            if monitor.advance_with(ContextState::Completed, || deliver(&results, message)) {
                tracing::info!(context = monitor.id(), "sandbox run completed");
                ExecutionResult::Completed { stl }
            } else {
                ExecutionResult::Failed(cancelled_error())
            }
        }
        Ending::Finished(Err(err)) => {
            tracing::info!(context = monitor.id(), error = %err, "sandbox run failed");
            monitor.advance_with(ContextState::Failed, || deliver(&results, HostMessage::error(&err)));
            ExecutionResult::Failed(err)
        }
        Ending::TimedOut => {
            tracing::warn!(context = monitor.id(), ?limit, "sandbox run timed out, destroying context");
            monitor.cancel();
            let err = Error::SandboxTimeout(limit);
            monitor.advance_with(ContextState::Destroyed, || deliver(&results, HostMessage::error(&err)));
            ExecutionResult::Failed(err)
        }
        Ending::Cancelled => {
            tracing::warn!(context = monitor.id(), "sandbox run cancelled, destroying context");
            let err = cancelled_error();
            monitor.advance_with(ContextState::Destroyed, || deliver(&results, HostMessage::error(&err)));
            ExecutionResult::Failed(err)
        }
    }
}

/// Worker body. Compiles the module units, runs the entry unit and
/// serializes what it exported.
fn run_job(job: Job) -> Result<StlOutput> {
    let Job {
        units,
        stl,
        kernel,
        config,
        monitor,
        results,
        console,
    } = job;

    let Some((entry, modules)) = units.split_last() else {
        return Err(execution_error("no code units to execute"));
    };

    let export: ExportSlot = Rc::default();
    let mut engine = build_engine(EngineWiring {
        config,
        synthesizer: kernel.synthesizer().clone(),
        cancel: monitor.cancel_flag(),
        console,
        export: export.clone(),
    });

    let mut resolver = StaticModuleResolver::new();
    engine.set_module_resolver(resolver.clone());
    for (index, unit) in modules.iter().enumerate() {
        let name = unit.name.clone().unwrap_or_else(|| format!("module{index}"));
        let ast = engine.compile(&unit.object).map_err(|err| parse_error(err, &name))?;
        let module = Module::eval_ast_as_new(Scope::new(), &ast, &engine).map_err(eval_error)?;
        tracing::debug!(context = monitor.id(), module = %name, "sandbox module loaded");
        resolver.insert(name, module);
        engine.set_module_resolver(resolver.clone());
    }

    let entry_name = entry.name.as_deref().unwrap_or(ENTRY_UNIT);
    let ast = engine
        .compile(&entry.object)
        .map_err(|err| parse_error(err, entry_name))?;

    if !monitor.advance_with(ContextState::Running, || deliver(&results, HostMessage::IframeLoaded)) {
        return Err(cancelled_error());
    }

    let mut scope = Scope::new();
    let value: Dynamic = engine.eval_ast_with_scope(&mut scope, &ast).map_err(eval_error)?;

    let exported = export.borrow_mut().take();
    let nodes = match exported {
        Some(nodes) => nodes,
        None => exported_value(value, kernel.synthesizer())
            .ok_or_else(|| execution_error("scene code did not export a shape or scene"))??,
    };

    let meshes = flatten_scene(&kernel, nodes)?;
    try_to_stl(&meshes, &stl)
}

fn deliver(results: &mpsc::Sender<HostMessage>, message: HostMessage) {
    if let Err(err) = results.try_send(message) {
        tracing::debug!(error = %err, "result channel unavailable, message dropped");
    }
}

fn execution_error(message: impl Into<String>) -> Error {
    Error::SandboxExecution {
        message: message.into(),
        stack: None,
    }
}

fn cancelled_error() -> Error {
    execution_error("execution cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> SandboxHost {
        SandboxHost::new(SandboxConfig::default(), Kernel::default())
    }

    #[tokio::test]
    async fn test_returned_shape_is_exported() {
        let report = host().execute(InboundMessage::execute("cube(1, 1, 1)")).await.unwrap();
        assert!(report.result.is_completed());
        assert_eq!(report.messages.len(), 2);
        assert_eq!(report.messages[0], HostMessage::IframeLoaded);
        let HostMessage::StlData { stl } = &report.messages[1] else {
            panic!("expected stlData, got {:?}", report.messages[1]);
        };
        assert_eq!(stl.matches("endfacet").count(), 12);
    }

    #[tokio::test]
    async fn test_no_export_is_an_error() {
        let report = host().execute(InboundMessage::execute("let x = 1;")).await.unwrap();
        let (message, _) = report.result.error().unwrap().message_and_stack();
        assert!(message.contains("did not export"));
    }

    #[tokio::test]
    async fn test_compile_error_fails_before_loading() {
        let report = host().execute(InboundMessage::execute("let = ;")).await.unwrap();
        assert!(!report.result.is_completed());
        assert_eq!(report.messages.len(), 1);
        assert!(matches!(report.messages[0], HostMessage::Error { stack: Some(_), .. }));
    }

    #[tokio::test]
    async fn test_empty_request() {
        let message = InboundMessage::ExecuteCode {
            code: Vec::new(),
            binary: None,
        };
        let report = host().execute(message).await.unwrap();
        assert!(report.result.error().is_some());
    }

    #[tokio::test]
    async fn test_cancel_destroys_context() {
        let host = host();
        let context = host.submit(InboundMessage::execute("loop { }")).unwrap();
        context.cancel();
        context.cancel();
        let monitor = context.monitor();
        let report = context.wait().await;
        assert!(!report.result.is_completed());
        assert_eq!(monitor.state(), ContextState::Destroyed);
        assert!(host.is_idle());
    }

    #[test]
    fn test_submit_outside_runtime() {
        assert!(matches!(
            host().submit(InboundMessage::execute("cube(1,1,1)")),
            Err(Error::SandboxExecution { .. })
        ));
    }
}
