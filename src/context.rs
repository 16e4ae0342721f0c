//! Execution context
//!
//! The narrow interface through which tracking and garbage collection report progress to
//! whoever drives them, and through which they learn about cancellation.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Output sink and cooperative cancellation signal supplied by the caller.
pub trait ExecutionContext {
    /// Informational progress line.
    fn output(&self, message: &str);

    /// Problem that was recovered from.
    fn warning(&self, message: &str);

    /// Problem that failed one item of a best-effort operation.
    fn error(&self, message: &str);

    /// Diagnostic detail.
    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    /// Cancellation signal, polled between units of work.
    fn cancellation(&self) -> &CancellationToken;

    fn is_cancelled(&self) -> bool {
        self.cancellation().is_cancelled()
    }
}

/// Execution context that forwards everything to `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingContext {
    token: CancellationToken,
}

impl TracingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl ExecutionContext for TracingContext {
    fn output(&self, message: &str) {
        tracing::info!(target: "buildtrack::context", "{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "buildtrack::context", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "buildtrack::context", "{}", message);
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.token
    }
}

/// Severity of a recorded message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Output,
    Warning,
    Error,
    Debug,
}

/// Execution context that keeps every message in memory.
///
/// Used by the CLI to print a summary after a pass and by tests to assert on what a
/// pass reported. Messages are also forwarded to `tracing`.
#[derive(Debug, Default)]
pub struct RecordingContext {
    token: CancellationToken,
    messages: Mutex<Vec<(MessageLevel, String)>>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token,
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<(MessageLevel, String)> {
        self.messages.lock().clone()
    }

    /// Messages recorded at the given level, in order.
    pub fn messages_at(&self, level: MessageLevel) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn record(&self, level: MessageLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

impl ExecutionContext for RecordingContext {
    fn output(&self, message: &str) {
        tracing::info!(target: "buildtrack::context", "{}", message);
        self.record(MessageLevel::Output, message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!(target: "buildtrack::context", "{}", message);
        self.record(MessageLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "buildtrack::context", "{}", message);
        self.record(MessageLevel::Error, message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "buildtrack::context", "{}", message);
        self.record(MessageLevel::Debug, message);
    }

    fn cancellation(&self) -> &CancellationToken {
        &self.token
    }
}
