//! Shared test doubles for cross-crate integration tests: a credential
//! enrollment helper and fakes for every collaborator trait the gateway
//! consumes, so a test can stand up a full dispatcher without a real HTTP
//! backend, process supervisor, or filesystem.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use relay_gateway::collaborators::{
    EventBus, EventListener, HttpMux, HttpMuxRequest, HttpMuxResponse, MarkdownAugmenter, Process,
    ProcessSnapshot, ProcessState, ProcessSupervisor, Unsubscribe, UploadHandle, UploadMeta,
    UploadSink,
};
use relay_protocol::srp;

/// Generates a salt/verifier pair the way an origin would at enrollment
/// time, for tests that need to drive a full SRP handshake end to end.
pub struct EnrolledCredentials {
    pub username: String,
    pub password: String,
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
}

pub fn enroll(username: &str, password: &str) -> EnrolledCredentials {
    let salt = srp::random_salt().to_vec();
    let verifier = srp::compute_verifier(username, password, &salt);
    EnrolledCredentials {
        username: username.to_string(),
        password: password.to_string(),
        salt,
        verifier,
    }
}

/// Echoes back a canned response regardless of the request, recording every
/// request it saw for assertions.
pub struct FakeHttpMux {
    pub response: HttpMuxResponse,
    pub seen: Mutex<Vec<HttpMuxRequest>>,
}

impl FakeHttpMux {
    pub fn new(status: u16, body: Value) -> Self {
        FakeHttpMux {
            response: HttpMuxResponse {
                status,
                headers: None,
                body: Some(body),
            },
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpMux for FakeHttpMux {
    async fn dispatch(&self, request: HttpMuxRequest) -> HttpMuxResponse {
        self.seen.lock().unwrap().push(request);
        self.response.clone()
    }
}

/// Always reports no running process, for exercising the `session` channel's
/// 404 path.
pub struct FakeEmptySupervisor;

impl ProcessSupervisor for FakeEmptySupervisor {
    fn get_process_for_session(&self, _session_id: &str) -> Option<Arc<dyn Process>> {
        None
    }
}

/// A stand-in running process with a fixed history and no live events.
pub struct FakeProcess {
    pub snapshot: ProcessSnapshot,
    pub history: Vec<Value>,
    pub streaming: Option<String>,
}

impl Process for FakeProcess {
    fn snapshot(&self) -> ProcessSnapshot {
        self.snapshot.clone()
    }

    fn message_history(&self) -> Vec<Value> {
        self.history.clone()
    }

    fn streaming_content(&self) -> Option<String> {
        self.streaming.clone()
    }

    fn accumulate_streaming_text(&self, _delta: &str) {}

    fn clear_streaming_text(&self) {}

    fn subscribe(&self, _listener: EventListener) -> Unsubscribe {
        Box::new(|| {})
    }
}

pub fn fake_process_snapshot(process_id: &str, session_id: &str) -> ProcessSnapshot {
    ProcessSnapshot {
        process_id: process_id.to_string(),
        session_id: session_id.to_string(),
        state: ProcessState::Running,
        permission_mode: "default".to_string(),
        mode_version: 1,
        provider: "anthropic".to_string(),
        model: "test-model".to_string(),
        waiting_input_request: None,
    }
}

/// Hands back a single fixed process for one known session id.
pub struct FakeSupervisor {
    pub session_id: String,
    pub process: Arc<dyn Process>,
}

impl ProcessSupervisor for FakeSupervisor {
    fn get_process_for_session(&self, session_id: &str) -> Option<Arc<dyn Process>> {
        if session_id == self.session_id {
            Some(self.process.clone())
        } else {
            None
        }
    }
}

/// Never publishes anything; subscribers see only `connected`.
pub struct FakeEmptyBus;

impl EventBus for FakeEmptyBus {
    fn subscribe(&self, _listener: EventListener) -> Unsubscribe {
        Box::new(|| {})
    }
}

/// Buffers uploaded bytes in memory instead of writing to disk, for
/// assertions on exactly what a handler wrote.
pub struct FakeUploadSink {
    pub chunks: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl FakeUploadSink {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeUploadSink {
            chunks: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl UploadSink for FakeUploadSink {
    async fn start(&self, meta: UploadMeta) -> anyhow::Result<Box<dyn UploadHandle>> {
        Ok(Box::new(FakeUploadHandle {
            chunks: Mutex::new(Vec::new()),
            meta,
        }))
    }
}

struct FakeUploadHandle {
    chunks: Mutex<Vec<(u64, Vec<u8>)>>,
    meta: UploadMeta,
}

#[async_trait]
impl UploadHandle for FakeUploadHandle {
    async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        self.chunks.lock().unwrap().push((offset, data.to_vec()));
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> anyhow::Result<Value> {
        Ok(serde_json::json!({
            "filename": self.meta.filename,
            "size": self.meta.size,
        }))
    }

    async fn cancel(self: Box<Self>) {}
}

/// Returns the delta unchanged, the simplest legal augmenter.
pub struct FakePassthroughAugmenter;

impl MarkdownAugmenter for FakePassthroughAugmenter {
    fn augment(&mut self, delta: &str) -> String {
        delta.to_string()
    }
}
