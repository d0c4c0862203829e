//! Trait boundaries for the origin-side services the gateway drives but does
//! not own: the local HTTP mux, the agent-process supervisor, the event bus,
//! and the file-upload sink. Production origins wire real implementations of
//! these in; tests substitute fakes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct HttpMuxRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpMuxResponse {
    pub status: u16,
    pub headers: Option<HashMap<String, String>>,
    pub body: Option<Value>,
}

/// Synthesizes and routes a local HTTP request on behalf of a remote
/// `request` message. Implementations must never panic: unexpected failures
/// should surface as a 500 `HttpMuxResponse`, which the dispatcher forwards
/// to the peer verbatim.
#[async_trait]
pub trait HttpMux: Send + Sync {
    async fn dispatch(&self, request: HttpMuxRequest) -> HttpMuxResponse;
}

/// A single bus/process event, forwarded to subscribers as `event{eventType,
/// data}`. `event_type` values are opaque strings defined by the emitting
/// collaborator (`message`, `status`, `mode-change`, ...for the session
/// channel; whatever the bus emits, unmodified, for the activity channel).
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub event_type: String,
    pub data: Value,
}

pub type EventListener = Box<dyn Fn(BusEvent) + Send + Sync>;
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Process-bus-wide events, independent of any single session.
pub trait EventBus: Send + Sync {
    fn subscribe(&self, listener: EventListener) -> Unsubscribe;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    WaitingInput,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub process_id: String,
    pub session_id: String,
    pub state: ProcessState,
    pub permission_mode: String,
    pub mode_version: u32,
    pub provider: String,
    pub model: String,
    pub waiting_input_request: Option<Value>,
}

/// A running agent process backing one session, as produced by the
/// supervisor. `subscribe` delivers live events until the returned
/// `Unsubscribe` runs; the gateway always calls it on `unsubscribe` or
/// socket close.
pub trait Process: Send + Sync {
    fn snapshot(&self) -> ProcessSnapshot;
    fn message_history(&self) -> Vec<Value>;
    fn streaming_content(&self) -> Option<String>;
    fn accumulate_streaming_text(&self, delta: &str);
    fn clear_streaming_text(&self);
    fn subscribe(&self, listener: EventListener) -> Unsubscribe;
}

pub trait ProcessSupervisor: Send + Sync {
    fn get_process_for_session(&self, session_id: &str) -> Option<Arc<dyn Process>>;
}

#[derive(Debug, Clone)]
pub struct UploadMeta {
    pub project_id: String,
    pub session_id: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
}

/// One in-progress upload's sink-side handle. The dispatcher is the sole
/// caller: it serializes `write_chunk` calls per connection so a sink never
/// observes out-of-order or concurrent writes for the same upload.
#[async_trait]
pub trait UploadHandle: Send + Sync {
    async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<()>;
    async fn finalize(self: Box<Self>) -> anyhow::Result<Value>;
    async fn cancel(self: Box<Self>);
}

#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn start(&self, meta: UploadMeta) -> anyhow::Result<Box<dyn UploadHandle>>;
}

/// Turns incremental assistant text into pre-rendered HTML fragments.
/// Constructed lazily per `session` subscription and reused across events
/// for that subscription only.
pub trait MarkdownAugmenter: Send + Sync {
    fn augment(&mut self, delta: &str) -> String;
}
