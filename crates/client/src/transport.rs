//! A `RelayClient` drives one WebSocket connection to a gateway: performs
//! the SRP handshake, then demultiplexes `request`/`subscribe`/`upload`
//! traffic over a single background reader task.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tungstenite::Message;

use relay_protocol::consts::{DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_UPLOAD_CHUNK_SIZE};
use relay_protocol::frame::{self, FrameFormat, IncomingPayload};
use relay_protocol::message::{RelayMessage, SrpMessage};
use relay_protocol::srp::SrpClientSession;
use relay_protocol::utils::{b64_decode, b64_encode};
use relay_protocol::{crypto, log};

use crate::errors::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Credentials for the SRP handshake. A connection with no credentials skips
/// the handshake entirely and exchanges `RelayMessage`s in the clear, for
/// origins that have remote access disabled.
pub enum Auth {
    None,
    Srp { username: String, password: String },
}

pub type EventHandler = Box<dyn FnMut(RelayMessage) + Send>;
pub type CloseHandler = Box<dyn FnOnce() + Send>;

struct PendingRequest {
    reply: oneshot::Sender<RelayMessage>,
}

struct Subscription {
    on_event: EventHandler,
    on_close: CloseHandler,
}

struct Shared {
    session_key: Mutex<Option<[u8; 32]>>,
    pending: Mutex<HashMap<String, PendingRequest>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    uploads: Mutex<HashMap<String, mpsc::UnboundedSender<RelayMessage>>>,
    outbound: flume::Sender<RelayMessage>,
}

/// A connected, authenticated (or plaintext) relay session.
pub struct RelayClient {
    shared: Arc<Shared>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    pub async fn connect(url: &str, auth: Auth) -> Result<Self, ClientError> {
        let (mut stream, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        let session_key = match auth {
            Auth::None => None,
            Auth::Srp { username, password } => {
                Some(run_srp_handshake(&mut stream, &username, &password).await?)
            }
        };

        let (outbound_tx, outbound_rx) = flume::unbounded::<RelayMessage>();
        let shared = Arc::new(Shared {
            session_key: Mutex::new(session_key),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
        });

        let (mut sink, mut source) = stream.split();

        let writer_shared = shared.clone();
        let writer_task = tokio::spawn(async move {
            let mut outbound_rx = outbound_rx.into_stream();
            while let Some(msg) = outbound_rx.next().await {
                if send_message(&mut sink, &msg, &writer_shared).await.is_err() {
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(_) => break,
                };
                if let Some(text) = extract_text(&frame) {
                    dispatch_incoming(&text, &reader_shared);
                }
                if frame.is_close() {
                    break;
                }
            }
            reject_all_pending(&reader_shared);
            reject_all_uploads(&reader_shared);
            close_all_subscriptions(&reader_shared);
        });

        Ok(RelayClient {
            shared,
            reader_task,
            writer_task,
        })
    }

    /// Sends a `request` and awaits its matching `response`, by `id`.
    /// Rejects on connection loss, a 30s default timeout, or an
    /// application-level status >= 400.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .unwrap()
            .insert(id.clone(), PendingRequest { reply: tx });

        let message = RelayMessage::Request {
            id: id.clone(),
            method: method.to_string(),
            path: path.to_string(),
            headers: None,
            body,
        };
        if self.shared.outbound.send(message).is_err() {
            self.shared.pending.lock().unwrap().remove(&id);
            return Err(ClientError::ConnectionLost);
        }

        let timeout = Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS);
        let result = tokio::time::timeout(timeout, rx).await;
        self.shared.pending.lock().unwrap().remove(&id);

        match result {
            Err(_) => Err(ClientError::Timeout),
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Ok(Ok(RelayMessage::Response { status, body, .. })) => {
                if status >= 400 {
                    Err(ClientError::Status { status, body })
                } else {
                    Ok(body.unwrap_or(Value::Null))
                }
            }
            Ok(Ok(_)) => Err(ClientError::Decode("unexpected response message".into())),
        }
    }

    /// Opens a channel subscription, dispatching every `event` message for
    /// `subscription_id` to `on_event` until the returned closer runs. If the
    /// connection drops before an explicit `unsubscribe`, `on_close` fires
    /// instead.
    pub fn subscribe(
        &self,
        channel: &str,
        session_id: Option<String>,
        on_event: EventHandler,
        on_close: CloseHandler,
    ) -> Result<SubscriptionHandle, ClientError> {
        let subscription_id = uuid::Uuid::new_v4().to_string();
        self.shared.subscriptions.lock().unwrap().insert(
            subscription_id.clone(),
            Subscription { on_event, on_close },
        );

        let message = RelayMessage::Subscribe {
            subscription_id: subscription_id.clone(),
            channel: channel.to_string(),
            session_id,
            last_event_id: None,
        };
        self.shared
            .outbound
            .send(message)
            .map_err(|_| ClientError::ConnectionLost)?;

        Ok(SubscriptionHandle {
            shared: self.shared.clone(),
            subscription_id,
        })
    }

    /// Uploads `data` in chunks of `chunk_size` (defaulting to 64 KiB).
    /// Waits for the gateway's initial `upload_progress` (acknowledging
    /// `upload_start`) before streaming, reports every subsequent
    /// `upload_progress` it receives via `on_progress` as bytes the gateway
    /// has actually received, and returns the finalized file metadata from
    /// `uploadComplete`.
    pub async fn upload(
        &self,
        project_id: &str,
        session_id: &str,
        filename: &str,
        mime_type: &str,
        data: &[u8],
        chunk_size: Option<usize>,
        mut on_progress: impl FnMut(u64) + Send,
    ) -> Result<Value, ClientError> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        let chunk_size = chunk_size.unwrap_or(DEFAULT_UPLOAD_CHUNK_SIZE).max(1);
        let timeout = Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS);

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.shared.uploads.lock().unwrap().insert(upload_id.clone(), tx);

        let abort = |shared: &Shared| {
            shared.uploads.lock().unwrap().remove(&upload_id);
        };

        let start = RelayMessage::UploadStart {
            upload_id: upload_id.clone(),
            project_id: project_id.to_string(),
            session_id: session_id.to_string(),
            filename: filename.to_string(),
            size: data.len() as u64,
            mime_type: mime_type.to_string(),
        };
        if self.shared.outbound.send(start).is_err() {
            abort(&self.shared);
            return Err(ClientError::ConnectionLost);
        }

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(RelayMessage::UploadProgress { bytes_received, .. })) => {
                on_progress(bytes_received);
            }
            Ok(Some(terminal)) => {
                abort(&self.shared);
                return finish_upload(terminal);
            }
            Ok(None) => {
                abort(&self.shared);
                return Err(ClientError::ConnectionLost);
            }
            Err(_) => {
                abort(&self.shared);
                return Err(ClientError::Timeout);
            }
        }

        let mut early_terminal = None;
        'chunks: for offset in (0..data.len()).step_by(chunk_size) {
            let end = (offset + chunk_size).min(data.len());
            let chunk = RelayMessage::UploadChunk {
                upload_id: upload_id.clone(),
                offset: offset as u64,
                data: b64_encode(&data[offset..end]),
            };
            if self.shared.outbound.send(chunk).is_err() {
                abort(&self.shared);
                return Err(ClientError::ConnectionLost);
            }
            loop {
                match rx.try_recv() {
                    Ok(RelayMessage::UploadProgress { bytes_received, .. }) => {
                        on_progress(bytes_received);
                    }
                    Ok(terminal) => {
                        early_terminal = Some(terminal);
                        break 'chunks;
                    }
                    Err(_) => break,
                }
            }
        }

        let terminal = match early_terminal {
            Some(terminal) => terminal,
            None => {
                if self
                    .shared
                    .outbound
                    .send(RelayMessage::UploadEnd {
                        upload_id: upload_id.clone(),
                    })
                    .is_err()
                {
                    abort(&self.shared);
                    return Err(ClientError::ConnectionLost);
                }

                loop {
                    match tokio::time::timeout(timeout, rx.recv()).await {
                        Ok(Some(RelayMessage::UploadProgress { bytes_received, .. })) => {
                            on_progress(bytes_received);
                        }
                        Ok(Some(terminal)) => break terminal,
                        Ok(None) => {
                            abort(&self.shared);
                            return Err(ClientError::ConnectionLost);
                        }
                        Err(_) => {
                            abort(&self.shared);
                            return Err(ClientError::Timeout);
                        }
                    }
                }
            }
        };

        abort(&self.shared);
        finish_upload(terminal)
    }

    pub async fn close(self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// Closer for a subscription: deregisters the local handler and tells the
/// gateway to stop forwarding events. Idempotent.
pub struct SubscriptionHandle {
    shared: Arc<Shared>,
    subscription_id: String,
}

impl SubscriptionHandle {
    pub fn close(self) {
        if self
            .shared
            .subscriptions
            .lock()
            .unwrap()
            .remove(&self.subscription_id)
            .is_some()
        {
            let _ = self.shared.outbound.send(RelayMessage::Unsubscribe {
                subscription_id: self.subscription_id.clone(),
            });
        }
    }
}

async fn run_srp_handshake(
    stream: &mut WsStream,
    username: &str,
    password: &str,
) -> Result<[u8; 32], ClientError> {
    let client = SrpClientSession::new(username, password);

    send_srp(stream, &SrpMessage::Hello {
        identity: client.identity().to_string(),
    })
    .await?;

    let challenge = match recv_srp(stream).await? {
        SrpMessage::Challenge { salt, b_pub } => {
            let salt = b64_decode(&salt).map_err(|e| ClientError::Decode(e.to_string()))?;
            let b_pub = b64_decode(&b_pub).map_err(|e| ClientError::Decode(e.to_string()))?;
            (salt, b_pub)
        }
        SrpMessage::Error { code, message } => {
            return Err(ClientError::Auth(format!("{code}: {message}")));
        }
        _ => return Err(ClientError::Auth("unexpected message during handshake".into())),
    };

    let proof = client
        .process_challenge(&challenge.0, &challenge.1)
        .map_err(|e| ClientError::Auth(e.code().to_string()))?;

    send_srp(stream, &SrpMessage::Proof {
        a_pub: b64_encode(&proof.a_pub),
        m1: b64_encode(&proof.m1),
    })
    .await?;

    match recv_srp(stream).await? {
        SrpMessage::Verify { m2 } => {
            let m2 = b64_decode(&m2).map_err(|e| ClientError::Decode(e.to_string()))?;
            let shared_secret = proof
                .verify_server(&m2)
                .map_err(|e| ClientError::Auth(e.code().to_string()))?;
            Ok(crypto::derive_session_key(&shared_secret))
        }
        SrpMessage::Error { code, message } => Err(ClientError::Auth(format!("{code}: {message}"))),
        _ => Err(ClientError::Auth("unexpected message during handshake".into())),
    }
}

async fn send_srp(stream: &mut WsStream, msg: &SrpMessage) -> Result<(), ClientError> {
    let payload = msg.to_json().map_err(|e| ClientError::Decode(e.to_string()))?;
    let frame = frame::build(FrameFormat::Json, payload.as_bytes());
    stream
        .send(Message::Binary(frame.into()))
        .await
        .map_err(|_| ClientError::ConnectionLost)
}

async fn recv_srp(stream: &mut WsStream) -> Result<SrpMessage, ClientError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                let text = frame::json_text(IncomingPayload::Binary(&data))
                    .map_err(|e| ClientError::Decode(e.to_string()))?;
                return SrpMessage::from_json(text).map_err(|e| ClientError::Decode(e.to_string()));
            }
            Some(Ok(Message::Text(text))) => {
                return SrpMessage::from_json(&text).map_err(|e| ClientError::Decode(e.to_string()));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::ConnectionLost),
            Some(Ok(_)) => continue,
            Some(Err(_)) => return Err(ClientError::ConnectionLost),
        }
    }
}

fn extract_text(frame: &Message) -> Option<String> {
    match frame {
        Message::Binary(data) => frame::json_text(IncomingPayload::Binary(data))
            .ok()
            .map(|s| s.to_string()),
        Message::Text(text) => Some(text.to_string()),
        _ => None,
    }
}

fn dispatch_incoming(text: &str, shared: &Shared) {
    let outer: RelayMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("dropping undecodable relay message: {e}");
            return;
        }
    };

    let message = match outer {
        RelayMessage::Encrypted { nonce, ciphertext } => {
            let key = match *shared.session_key.lock().unwrap() {
                Some(key) => key,
                None => {
                    log::warn!("dropping encrypted message on an unauthenticated connection");
                    return;
                }
            };
            let nonce_bytes = match b64_decode(&nonce) {
                Ok(bytes) => bytes,
                Err(_) => return,
            };
            let nonce = match crypto::nonce_from_bytes(&nonce_bytes) {
                Ok(nonce) => nonce,
                Err(_) => return,
            };
            let ciphertext = match b64_decode(&ciphertext) {
                Ok(c) => c,
                Err(_) => return,
            };
            let sealed = crypto::SealedMessage { nonce, ciphertext };
            let plaintext = match crypto::open(&key, &sealed) {
                Ok(p) => p,
                Err(_) => return,
            };
            match std::str::from_utf8(&plaintext).ok().and_then(|t| serde_json::from_str(t).ok()) {
                Some(msg) => msg,
                None => return,
            }
        }
        other => other,
    };

    route_message(message, shared);
}

fn route_message(message: RelayMessage, shared: &Shared) {
    match &message {
        RelayMessage::Response { id, .. } => {
            if let Some(pending) = shared.pending.lock().unwrap().remove(id) {
                let _ = pending.reply.send(message);
            }
        }
        RelayMessage::UploadProgress { upload_id, .. } => {
            if let Some(tx) = shared.uploads.lock().unwrap().get(upload_id) {
                let _ = tx.send(message);
            }
        }
        RelayMessage::UploadComplete { upload_id, .. } | RelayMessage::UploadError { upload_id, .. } => {
            if let Some(tx) = shared.uploads.lock().unwrap().get(upload_id) {
                let _ = tx.send(message);
            }
        }
        RelayMessage::Event { subscription_id, .. } => {
            let mut subscriptions = shared.subscriptions.lock().unwrap();
            if let Some(subscription) = subscriptions.get_mut(subscription_id) {
                (subscription.on_event)(message.clone());
            }
        }
        _ => {}
    }
}

fn finish_upload(terminal: RelayMessage) -> Result<Value, ClientError> {
    match terminal {
        RelayMessage::UploadComplete { file, .. } => Ok(file),
        RelayMessage::UploadError { error, .. } => Err(ClientError::UploadFailed(error.to_string())),
        _ => Err(ClientError::Decode("unexpected upload response".into())),
    }
}

fn reject_all_pending(shared: &Shared) {
    // Dropping each sender fails its receiver with RecvError, which request()
    // and upload() both map to ConnectionLost.
    shared.pending.lock().unwrap().clear();
}

fn reject_all_uploads(shared: &Shared) {
    // Dropping each sender closes its receiver, which upload()'s recv loop
    // maps to ConnectionLost instead of waiting out the full timeout.
    shared.uploads.lock().unwrap().clear();
}

/// Fires every still-open subscription's `on_close`, draining the table so a
/// later explicit `unsubscribe` (racing the reader loop's exit) is a no-op.
fn close_all_subscriptions(shared: &Shared) {
    let subscriptions: Vec<Subscription> = shared.subscriptions.lock().unwrap().drain().map(|(_, s)| s).collect();
    for subscription in subscriptions {
        (subscription.on_close)();
    }
}

async fn send_message(
    sink: &mut futures::stream::SplitSink<WsStream, Message>,
    message: &RelayMessage,
    shared: &Shared,
) -> Result<(), ClientError> {
    let key = *shared.session_key.lock().unwrap();
    let outgoing = match key {
        Some(key) if message.is_application_message() => {
            let plaintext = serde_json::to_vec(message)
                .map_err(|e| ClientError::Decode(e.to_string()))?;
            let sealed = crypto::seal(&key, &plaintext);
            RelayMessage::Encrypted {
                nonce: b64_encode(sealed.nonce),
                ciphertext: b64_encode(sealed.ciphertext),
            }
        }
        _ => message.clone(),
    };
    let payload = serde_json::to_vec(&outgoing).map_err(|e| ClientError::Decode(e.to_string()))?;
    let frame = frame::build(FrameFormat::Json, &payload);
    sink.send(Message::Binary(frame.into()))
        .await
        .map_err(|_| ClientError::ConnectionLost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_handle_close_is_idempotent() {
        let (outbound, rx) = flume::unbounded();
        let shared = Arc::new(Shared {
            session_key: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            outbound,
        });
        shared.subscriptions.lock().unwrap().insert(
            "s1".to_string(),
            Subscription {
                on_event: Box::new(|_| {}),
                on_close: Box::new(|| {}),
            },
        );

        let handle = SubscriptionHandle {
            shared: shared.clone(),
            subscription_id: "s1".to_string(),
        };
        handle.close();
        assert!(!shared.subscriptions.lock().unwrap().contains_key("s1"));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn route_message_delivers_event_to_registered_handler() {
        let (outbound, _rx) = flume::unbounded();
        let shared = Shared {
            session_key: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            outbound,
        };
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        shared.subscriptions.lock().unwrap().insert(
            "s1".to_string(),
            Subscription {
                on_event: Box::new(move |msg| received_clone.lock().unwrap().push(msg)),
                on_close: Box::new(|| {}),
            },
        );

        route_message(
            RelayMessage::Event {
                subscription_id: "s1".to_string(),
                event_type: "message".to_string(),
                event_id: None,
                data: Value::Null,
            },
            &shared,
        );

        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn route_message_resolves_pending_response_by_id() {
        let (outbound, _rx) = flume::unbounded();
        let shared = Shared {
            session_key: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            outbound,
        };
        let (tx, mut rx) = oneshot::channel();
        shared
            .pending
            .lock()
            .unwrap()
            .insert("r1".to_string(), PendingRequest { reply: tx });

        route_message(
            RelayMessage::Response {
                id: "r1".to_string(),
                status: 200,
                headers: None,
                body: Some(Value::String("ok".to_string())),
            },
            &shared,
        );

        let received = rx.try_recv().unwrap();
        assert!(matches!(received, RelayMessage::Response { status: 200, .. }));
    }

    #[test]
    fn socket_close_fires_on_close_for_every_open_subscription() {
        let (outbound, _rx) = flume::unbounded();
        let shared = Shared {
            session_key: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            outbound,
        };
        let closed = Arc::new(Mutex::new(Vec::new()));
        for id in ["s1", "s2"] {
            let closed = closed.clone();
            let id_owned = id.to_string();
            shared.subscriptions.lock().unwrap().insert(
                id.to_string(),
                Subscription {
                    on_event: Box::new(|_| {}),
                    on_close: Box::new(move || closed.lock().unwrap().push(id_owned)),
                },
            );
        }

        close_all_subscriptions(&shared);

        assert!(shared.subscriptions.lock().unwrap().is_empty());
        let mut fired = closed.lock().unwrap().clone();
        fired.sort();
        assert_eq!(fired, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn route_message_forwards_upload_progress_to_the_waiting_upload() {
        let (outbound, _rx) = flume::unbounded();
        let shared = Shared {
            session_key: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            outbound,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        shared.uploads.lock().unwrap().insert("u1".to_string(), tx);

        route_message(
            RelayMessage::UploadProgress {
                upload_id: "u1".to_string(),
                bytes_received: 42,
            },
            &shared,
        );

        let received = rx.try_recv().unwrap();
        assert!(matches!(
            received,
            RelayMessage::UploadProgress { bytes_received: 42, .. }
        ));
    }

    #[test]
    fn finish_upload_maps_complete_and_error_terminal_messages() {
        let complete = finish_upload(RelayMessage::UploadComplete {
            upload_id: "u1".to_string(),
            file: Value::String("ok".to_string()),
        });
        assert_eq!(complete.unwrap(), Value::String("ok".to_string()));

        let error = finish_upload(RelayMessage::UploadError {
            upload_id: "u1".to_string(),
            error: Value::String("bad".to_string()),
        });
        assert!(matches!(error, Err(ClientError::UploadFailed(_))));
    }
}
