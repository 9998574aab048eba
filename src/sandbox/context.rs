// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Execution context lifecycle

use super::protocol::HostMessage;
use crate::error::{Error, Result};
use crate::io::StlOutput;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

/// Lifecycle of one context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Loading,
    Running,
    Completed,
    Failed,
    Destroyed,
}

impl ContextState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Destroyed)
    }

    fn can_advance_to(self, next: ContextState) -> bool {
        use ContextState::*;
        matches!(
            (self, next),
            (Loading, Running)
                | (Loading | Running, Completed | Failed)
                | (Loading | Running | Completed | Failed, Destroyed)
        )
    }
}

/// Outcome of one run
#[derive(Debug)]
pub enum ExecutionResult {
    Completed { stl: StlOutput },
    Failed(Error),
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn stl(&self) -> Option<&StlOutput> {
        match self {
            Self::Completed { stl } => Some(stl),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Completed { .. } => None,
            Self::Failed(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<StlOutput> {
        match self {
            Self::Completed { stl } => Ok(stl),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Everything a finished context delivered
#[derive(Debug)]
pub struct ExecutionReport {
    pub result: ExecutionResult,
    /// Result channel, in order: `iframeLoaded` then one terminal message
    pub messages: Vec<HostMessage>,
    /// Console side channel
    pub console: Vec<HostMessage>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ContextState>,
    cancel: Arc<AtomicBool>,
    cancelled: Notify,
}

/// Cloneable view of a context's state, with cancellation
#[derive(Debug, Clone)]
pub struct ContextMonitor {
    id: u64,
    shared: Arc<Shared>,
}

impl ContextMonitor {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            shared: Arc::new(Shared {
                state: Mutex::new(ContextState::Loading),
                cancel: Arc::new(AtomicBool::new(false)),
                cancelled: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ContextState {
        *self.shared.state.lock()
    }

    /// Ask the context to stop. Idempotent; returns immediately.
    pub fn cancel(&self) {
        if !self.shared.cancel.swap(true, Ordering::SeqCst) {
            tracing::debug!(context = self.id, "sandbox cancellation requested");
            self.shared.cancelled.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.shared.cancel.clone()
    }

    pub(crate) async fn cancelled(&self) {
        self.shared.cancelled.notified().await;
    }

    /// Move to `next` and run `on_enter` under the state lock, so messages
    /// sent from it are ordered with the transition. Returns false when the
    /// transition is not allowed from the current state.
    pub(crate) fn advance_with(&self, next: ContextState, on_enter: impl FnOnce()) -> bool {
        let mut state = self.shared.state.lock();
        if !state.can_advance_to(next) {
            return false;
        }
        tracing::debug!(context = self.id, from = ?*state, to = ?next, "sandbox state change");
        *state = next;
        on_enter();
        true
    }
}

/// A submitted request. Consumed by [`ExecutionContext::wait`]; dropping it
/// cancels the run.
#[derive(Debug)]
pub struct ExecutionContext {
    monitor: ContextMonitor,
    results: mpsc::Receiver<HostMessage>,
    console: mpsc::Receiver<HostMessage>,
    driver: Option<JoinHandle<ExecutionResult>>,
}

impl ExecutionContext {
    pub(crate) fn new(
        monitor: ContextMonitor,
        results: mpsc::Receiver<HostMessage>,
        console: mpsc::Receiver<HostMessage>,
        driver: JoinHandle<ExecutionResult>,
    ) -> Self {
        Self {
            monitor,
            results,
            console,
            driver: Some(driver),
        }
    }

    pub fn id(&self) -> u64 {
        self.monitor.id()
    }

    pub fn state(&self) -> ContextState {
        self.monitor.state()
    }

    pub fn monitor(&self) -> ContextMonitor {
        self.monitor.clone()
    }

    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    /// Next message on the result channel
    pub async fn recv(&mut self) -> Option<HostMessage> {
        self.results.recv().await
    }

    /// Console messages received so far
    pub fn take_console(&mut self) -> Vec<HostMessage> {
        let mut lines = Vec::new();
        while let Ok(message) = self.console.try_recv() {
            lines.push(message);
        }
        lines
    }

    /// Wait for the run to end and tear the context down
    pub async fn wait(mut self) -> ExecutionReport {
        let result = match self.driver.take() {
            Some(driver) => driver.await.unwrap_or_else(|err| {
                ExecutionResult::Failed(Error::SandboxExecution {
                    message: format!("sandbox driver failed: {err}"),
                    stack: None,
                })
            }),
            None => ExecutionResult::Failed(Error::SandboxExecution {
                message: "context already consumed".to_string(),
                stack: None,
            }),
        };

        let mut messages = Vec::new();
        while let Ok(message) = self.results.try_recv() {
            messages.push(message);
        }
        let console = self.take_console();

        ExecutionReport {
            result,
            messages,
            console,
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.monitor.state().is_terminal() {
            self.monitor.cancel();
        }
        self.monitor.advance_with(ContextState::Destroyed, || {});
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use ContextState::*;
        assert!(Loading.can_advance_to(Running));
        assert!(Loading.can_advance_to(Failed));
        assert!(Running.can_advance_to(Completed));
        assert!(Completed.can_advance_to(Destroyed));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Destroyed.can_advance_to(Running));
        assert!(!Destroyed.can_advance_to(Destroyed));
        assert!(!Running.can_advance_to(Loading));
    }

    #[test]
    fn test_advance_runs_hook_only_on_success() {
        let monitor = ContextMonitor::new(1);
        let mut hits = 0;
        assert!(monitor.advance_with(ContextState::Running, || hits += 1));
        assert!(monitor.advance_with(ContextState::Failed, || hits += 1));
        assert!(!monitor.advance_with(ContextState::Completed, || hits += 1));
        assert_eq!(hits, 2);
        assert_eq!(monitor.state(), ContextState::Failed);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let monitor = ContextMonitor::new(7);
        monitor.cancel();
        monitor.cancel();
        assert!(monitor.is_cancelled());
        assert_eq!(monitor.state(), ContextState::Loading);
    }
}
