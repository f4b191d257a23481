//! Test doubles for pipeline users.
//!
//! [`MockTransport`](crate::transport::MockTransport) answers requests; the
//! helpers here observe what the chain does with them.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::CallContext;
use crate::errors::PipelineResult;
use crate::observability::{LogLevel, Logger};
use crate::policies::{Next, Policy};

/// Logger that keeps every entry in memory.
#[derive(Debug)]
pub struct CapturingLogger {
    level: LogLevel,
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl CapturingLogger {
    /// Creates a logger recording `level` and above.
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Returns every entry in order.
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().clone()
    }

    /// Returns every message in order.
    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Returns the messages logged at exactly `level`.
    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Forgets all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for CapturingLogger {
    fn default() -> Self {
        Self::new(LogLevel::Trace)
    }
}

impl Logger for CapturingLogger {
    fn is_enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level >= self.level
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}

/// Shared, ordered record of chain events.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Arc<Mutex<Vec<String>>>,
}

impl Trace {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Returns the events in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Returns the events joined with `,`.
    pub fn joined(&self) -> String {
        self.events.lock().join(",")
    }
}

/// Policy that records `{name}-before` and `{name}-after` around the rest
/// of the chain.
#[derive(Debug, Clone)]
pub struct RecordingPolicy {
    name: String,
    trace: Trace,
}

impl RecordingPolicy {
    /// Creates a policy writing to `trace`.
    pub fn new(name: impl Into<String>, trace: Trace) -> Self {
        Self {
            name: name.into(),
            trace,
        }
    }
}

#[async_trait]
impl Policy for RecordingPolicy {
    async fn process(&self, context: &mut CallContext, next: Next<'_>) -> PipelineResult<()> {
        self.trace.push(format!("{}-before", self.name));
        let result = next.run(context).await;
        self.trace.push(format!("{}-after", self.name));
        result
    }
}
