//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cloud_pipeline::{
    BufferPool, CallContext, LogLevel, Logger, Next, PipelineResult, Policy, ResponseData,
    Transport, TransportId, Url,
};
use http::Method;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Logger keeping entries in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    pub fn messages_at(&self, level: LogLevel) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl Logger for MemoryLogger {
    fn is_enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.entries.lock().unwrap().push((level, message.to_string()));
    }
}

/// Ordered record of chain events shared between policies and transports.
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn joined(&self) -> String {
        self.0.lock().unwrap().join(",")
    }
}

/// Policy recording `{name}-before` and `{name}-after`.
#[derive(Debug)]
pub struct Marker {
    pub name: &'static str,
    pub events: Events,
}

#[async_trait]
impl Policy for Marker {
    async fn process(&self, context: &mut CallContext, next: Next<'_>) -> PipelineResult<()> {
        self.events.push(format!("{}-before", self.name));
        let result = next.run(context).await;
        self.events.push(format!("{}-after", self.name));
        result
    }
}

/// Transport built outside the crate: records `T` and answers 200.
#[derive(Debug)]
pub struct RecordingTransport {
    pub id: TransportId,
    pub events: Events,
}

impl RecordingTransport {
    pub fn new(events: Events) -> Self {
        Self {
            id: TransportId::new(),
            events,
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn create_context(
        &self,
        pool: &BufferPool,
        method: Method,
        url: Url,
        cancellation: CancellationToken,
    ) -> PipelineResult<CallContext> {
        Ok(CallContext::for_transport(self.id, method, url, pool, cancellation))
    }

    async fn process(&self, context: &mut CallContext) -> PipelineResult<()> {
        self.id.check(context)?;
        self.events.push("T");
        let buffer = context.rent_buffer();
        context.set_response(ResponseData::status_only(200, buffer));
        Ok(())
    }
}
