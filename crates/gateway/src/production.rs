//! Minimal production-grade implementations of the collaborator traits for
//! the standalone binary. A real origin embeds its own HTTP mux, process
//! supervisor and event bus; these exist so `relay-gateway` starts and
//! serves uploads/requests usefully on its own.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};

use relay_protocol::log;

use crate::collaborators::{
    EventBus, EventListener, HttpMux, HttpMuxRequest, HttpMuxResponse, MarkdownAugmenter, Process,
    ProcessSupervisor, Unsubscribe, UploadHandle, UploadMeta, UploadSink,
};

/// Forwards `request` messages to a local HTTP server via `reqwest`, per the
/// "synthesize a local HTTP request" responsibility.
pub struct ReqwestHttpMux {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestHttpMux {
    pub fn new(base_url: String) -> Self {
        ReqwestHttpMux {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl HttpMux for ReqwestHttpMux {
    async fn dispatch(&self, request: HttpMuxRequest) -> HttpMuxResponse {
        let url = format!("{}{}", self.base_url, request.path);
        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return HttpMuxResponse {
                    status: 400,
                    headers: None,
                    body: Some(json!({ "error": "invalid method" })),
                };
            }
        };

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let headers = response
                    .headers()
                    .iter()
                    .filter_map(|(name, value)| {
                        value
                            .to_str()
                            .ok()
                            .map(|value| (name.to_string(), value.to_string()))
                    })
                    .collect();
                let body = response.json::<Value>().await.ok();
                HttpMuxResponse {
                    status,
                    headers: Some(headers),
                    body,
                }
            }
            Err(err) => {
                log::error!("http mux request failed: {err}");
                HttpMuxResponse {
                    status: 500,
                    headers: None,
                    body: Some(json!({ "error": "Internal server error" })),
                }
            }
        }
    }
}

/// No process supervisor wired: every `session` subscription gets a 404.
pub struct NoopProcessSupervisor;

impl ProcessSupervisor for NoopProcessSupervisor {
    fn get_process_for_session(&self, _session_id: &str) -> Option<Arc<dyn Process>> {
        None
    }
}

/// No event bus wired: `activity` subscriptions only ever see `connected`.
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn subscribe(&self, _listener: EventListener) -> Unsubscribe {
        Box::new(|| {})
    }
}

/// Writes uploaded chunks straight to a file under `upload_dir`, keyed by a
/// generated name; never trusts the client-provided filename for the path.
pub struct FilesystemUploadSink {
    upload_dir: PathBuf,
}

impl FilesystemUploadSink {
    pub fn new(upload_dir: PathBuf) -> Self {
        FilesystemUploadSink { upload_dir }
    }
}

#[async_trait]
impl UploadSink for FilesystemUploadSink {
    async fn start(&self, meta: UploadMeta) -> anyhow::Result<Box<dyn UploadHandle>> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let stored_name = format!("{}-{}", uuid::Uuid::new_v4(), meta.filename);
        let path = self.upload_dir.join(&stored_name);
        let file = File::create(&path).await?;
        Ok(Box::new(FilesystemUploadHandle { file, path, meta }))
    }
}

struct FilesystemUploadHandle {
    file: File,
    path: PathBuf,
    meta: UploadMeta,
}

#[async_trait]
impl UploadHandle for FilesystemUploadHandle {
    async fn write_chunk(&mut self, offset: u64, data: &[u8]) -> anyhow::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn finalize(mut self: Box<Self>) -> anyhow::Result<Value> {
        self.file.flush().await?;
        Ok(json!({
            "filename": self.meta.filename,
            "path": self.path.to_string_lossy(),
            "size": self.meta.size,
            "mimeType": self.meta.mime_type,
            "projectId": self.meta.project_id,
            "sessionId": self.meta.session_id,
        }))
    }

    async fn cancel(self: Box<Self>) {
        let _ = tokio::fs::remove_file(&self.path).await;
    }
}

/// Passes streaming text through unchanged. A real origin replaces this with
/// an actual markdown-to-HTML pre-renderer.
pub struct PassthroughAugmenter;

impl MarkdownAugmenter for PassthroughAugmenter {
    fn augment(&mut self, delta: &str) -> String {
        delta.to_string()
    }
}
