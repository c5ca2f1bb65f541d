//! Shared fixtures for lister-core integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lister_core::{Host, HostLogger, HttpTransport, LogEntry};
use lister_model::{Accessor, HttpRequest, ListerDefinition, TransportError};
use serde_json::{Value, json};

type Handler = dyn Fn(&HttpRequest) -> Result<Value, TransportError> + Send + Sync;

/// Transport answering from a closure and recording every request.
pub struct MockTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always answers with `body`.
    pub fn fixed(body: Value) -> Arc<Self> {
        Self::new(move |_| Ok(body.clone()))
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        (self.handler)(&request)
    }
}

/// Logger keeping every entry for assertions.
#[derive(Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingLogger {
    pub fn codes(&self) -> Vec<&'static str> {
        self.entries.lock().unwrap().iter().map(|e| e.code).collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl HostLogger for RecordingLogger {
    fn log(&self, entry: LogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

pub fn host(transport: Arc<MockTransport>, logger: Arc<RecordingLogger>) -> Host {
    Host::new(transport).with_logger(logger)
}

pub fn characters() -> ListerDefinition {
    ListerDefinition::builder("characters", "/api/character")
        .title("Characters")
        .selector("results")
        .label("name")
        .value("id")
        .description(Accessor::template("{species} • {status}"))
        .icon("image")
        .search_default("name")
        .build()
}

pub fn characters_body() -> Value {
    json!({
        "info": {"count": 3, "pages": 1},
        "results": [
            {"id": 1, "name": "Rick Sanchez", "status": "Alive", "species": "Human", "image": "rick.png"},
            {"id": 2, "name": "Morty Smith", "status": "Alive", "species": "Human", "image": "morty.png"},
            {"id": 6, "name": "Abadango Cluster Princess", "status": "Alive", "species": "Alien"}
        ]
    })
}
