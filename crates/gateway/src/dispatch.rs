//! Dispatches one decrypted `RelayMessage` to the right handler and returns
//! the `RelayMessage`(s) to send back. Handlers are invoked strictly in
//! receive order by the caller (the per-connection task never dispatches two
//! messages concurrently), so an `upload_end` can never race a trailing
//! `upload_chunk` for the same upload.

use std::sync::Arc;

use flume::Sender;
use serde_json::json;

use relay_protocol::message::RelayMessage;
use relay_protocol::utils::b64_decode;

use crate::channels::{open_activity_channel, open_session_channel};
use crate::collaborators::{EventBus, HttpMux, HttpMuxRequest, MarkdownAugmenter, ProcessSupervisor, UploadMeta, UploadSink};
use crate::errors::DispatchError;
use crate::subscriptions::SubscriptionTable;
use crate::uploads::{UploadEntry, UploadTable};

pub struct Collaborators {
    pub http_mux: Arc<dyn HttpMux>,
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub event_bus: Arc<dyn EventBus>,
    pub upload_sink: Arc<dyn UploadSink>,
    pub make_augmenter: Arc<dyn Fn() -> Box<dyn MarkdownAugmenter> + Send + Sync>,
}

pub struct ConnectionTables {
    pub subscriptions: SubscriptionTable,
    pub uploads: UploadTable,
}

impl ConnectionTables {
    pub fn new() -> Self {
        ConnectionTables {
            subscriptions: SubscriptionTable::new(),
            uploads: UploadTable::new(),
        }
    }
}

impl Default for ConnectionTables {
    fn default() -> Self {
        Self::new()
    }
}

fn error_response(id: String, err: &DispatchError) -> RelayMessage {
    RelayMessage::Response {
        id,
        status: err.status(),
        headers: None,
        body: Some(err.body()),
    }
}

pub async fn dispatch(
    message: RelayMessage,
    collaborators: &Collaborators,
    tables: &mut ConnectionTables,
    out: Sender<RelayMessage>,
) -> Vec<RelayMessage> {
    match message {
        RelayMessage::Request {
            id,
            method,
            path,
            headers,
            body,
        } => {
            let mut headers = headers.unwrap_or_default();
            headers.insert("X-Yep-Anywhere".to_string(), "true".to_string());
            headers.insert("X-Ws-Relay".to_string(), "true".to_string());
            let response = collaborators
                .http_mux
                .dispatch(HttpMuxRequest {
                    method,
                    path,
                    headers,
                    body,
                })
                .await;
            vec![RelayMessage::Response {
                id,
                status: response.status,
                headers: response.headers,
                body: response.body,
            }]
        }

        RelayMessage::Subscribe {
            subscription_id,
            channel,
            session_id,
            last_event_id: _,
        } => {
            if tables.subscriptions.contains(&subscription_id) {
                return vec![error_response(
                    subscription_id,
                    &DispatchError::DuplicateSubscription,
                )];
            }
            let result = match channel.as_str() {
                "session" => open_session_channel(
                    &subscription_id,
                    session_id.as_deref(),
                    collaborators.supervisor.as_ref(),
                    out,
                    (collaborators.make_augmenter)(),
                ),
                "activity" => Ok(open_activity_channel(
                    &subscription_id,
                    collaborators.event_bus.as_ref(),
                    out,
                )),
                other => Err(DispatchError::UnknownChannel(other.to_string())),
            };
            match result {
                Ok(closer) => {
                    tables.subscriptions.insert(subscription_id, closer);
                    vec![]
                }
                Err(err) => vec![error_response(subscription_id, &err)],
            }
        }

        RelayMessage::Unsubscribe { subscription_id } => {
            tables.subscriptions.remove(&subscription_id);
            vec![]
        }

        RelayMessage::UploadStart {
            upload_id,
            project_id,
            session_id,
            filename,
            size,
            mime_type,
        } => match collaborators
            .upload_sink
            .start(UploadMeta {
                project_id,
                session_id,
                filename,
                size,
                mime_type,
            })
            .await
        {
            Ok(handle) => {
                tables
                    .uploads
                    .insert(upload_id.clone(), UploadEntry::new(handle, size));
                vec![RelayMessage::UploadProgress {
                    upload_id,
                    bytes_received: 0,
                }]
            }
            Err(err) => vec![upload_error(upload_id, &DispatchError::HttpMux(err))],
        },

        RelayMessage::UploadChunk {
            upload_id,
            offset,
            data,
        } => handle_upload_chunk(upload_id, offset, &data, tables).await,

        RelayMessage::UploadEnd { upload_id } => handle_upload_end(upload_id, tables).await,

        // Responses/events/uploads travelling gateway -> client, or a stray
        // `encrypted` envelope: never routed through the dispatcher.
        RelayMessage::Response { .. }
        | RelayMessage::Event { .. }
        | RelayMessage::UploadProgress { .. }
        | RelayMessage::UploadComplete { .. }
        | RelayMessage::UploadError { .. }
        | RelayMessage::Encrypted { .. } => vec![],
    }
}

fn upload_error(upload_id: String, err: &DispatchError) -> RelayMessage {
    RelayMessage::UploadError {
        upload_id,
        error: json!({ "error": err.to_string() }),
    }
}

async fn handle_upload_chunk(
    upload_id: String,
    offset: u64,
    data_b64: &str,
    tables: &mut ConnectionTables,
) -> Vec<RelayMessage> {
    let Some(entry) = tables.uploads.get_mut(&upload_id) else {
        return vec![upload_error(
            upload_id.clone(),
            &DispatchError::UnknownUpload(upload_id),
        )];
    };

    if offset != entry.bytes_received {
        let err = DispatchError::UploadOffsetMismatch {
            expected: entry.bytes_received,
            got: offset,
        };
        if let Some(entry) = tables.uploads.remove(&upload_id) {
            entry.handle.cancel().await;
        }
        return vec![upload_error(upload_id, &err)];
    }

    let data = match b64_decode(data_b64) {
        Ok(data) => data,
        Err(_) => {
            if let Some(entry) = tables.uploads.remove(&upload_id) {
                entry.handle.cancel().await;
            }
            return vec![upload_error(upload_id, &DispatchError::InvalidUploadData)];
        }
    };

    let len = data.len() as u64;
    if let Err(err) = entry.handle.write_chunk(offset, &data).await {
        let dispatch_err = DispatchError::SinkWrite(err.to_string());
        if let Some(entry) = tables.uploads.remove(&upload_id) {
            entry.handle.cancel().await;
        }
        return vec![upload_error(upload_id, &dispatch_err)];
    }

    let should_report = entry.record_bytes(len);
    if should_report {
        vec![RelayMessage::UploadProgress {
            upload_id,
            bytes_received: entry.bytes_received,
        }]
    } else {
        vec![]
    }
}

async fn handle_upload_end(
    upload_id: String,
    tables: &mut ConnectionTables,
) -> Vec<RelayMessage> {
    let Some(entry) = tables.uploads.remove(&upload_id) else {
        return vec![upload_error(
            upload_id.clone(),
            &DispatchError::UnknownUpload(upload_id),
        )];
    };

    if entry.bytes_received < entry.expected_size {
        entry.handle.cancel().await;
        return vec![upload_error(upload_id, &DispatchError::UploadIncomplete)];
    }

    match entry.handle.finalize().await {
        Ok(file) => vec![RelayMessage::UploadComplete { upload_id, file }],
        Err(err) => vec![upload_error(upload_id, &DispatchError::SinkWrite(err.to_string()))],
    }
}
