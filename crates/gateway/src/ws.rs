//! The axum WebSocket endpoint: one task per connection, running the SRP
//! handshake then the serialized message-dispatch loop until the socket
//! closes or the server shuts down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use relay_protocol::frame::{self, FrameFormat, IncomingPayload};
use relay_protocol::message::{RelayMessage, SrpMessage};
use relay_protocol::srp::SrpServerSession;
use relay_protocol::system::trigger::Trigger;
use relay_protocol::utils::{b64_decode, b64_encode};
use relay_protocol::{crypto, log};

use crate::config::GatewayConfig;
use crate::dispatch::{self, Collaborators, ConnectionTables};
use crate::state::ConnectionState;

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<RwLock<GatewayConfig>>,
    pub collaborators: Arc<Collaborators>,
    pub stop: Trigger,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_failed_upgrade(move |err| {
        log::warn!("failed websocket upgrade from {addr}: {err}");
    })
    .on_upgrade(move |socket| handle_connection(socket, addr, state))
}

/// A message queued to go out over the socket: either a plaintext SRP
/// message (never encrypted) or an application message, encrypted if and
/// only if the connection currently holds a session key.
enum Outgoing {
    Srp(SrpMessage),
    App(RelayMessage),
}

async fn handle_connection(socket: WebSocket, addr: SocketAddr, gateway: GatewayState) {
    log::info!("accepted connection from {addr}");
    let (mut sink, mut stream) = socket.split();
    let (out_tx, out_rx) = flume::unbounded::<RelayMessage>();

    let (heartbeat_secs, remote_access_enabled) = {
        let config = gateway.config.read().unwrap();
        (config.heartbeat_secs(), config.remote_access_enabled())
    };

    let mut connection_state = if remote_access_enabled {
        ConnectionState::new()
    } else {
        ConnectionState::plaintext_authenticated()
    };

    let mut tables = ConnectionTables::new();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs));
    heartbeat.tick().await; // first tick fires immediately; consume it

    'connection: loop {
        tokio::select! {
            _ = gateway.stop.wait_async() => {
                log::info!("server shutting down, closing connection from {addr}");
                break;
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            pushed = out_rx.recv_async() => {
                match pushed {
                    Ok(msg) => {
                        if send_outgoing(&mut sink, Outgoing::App(msg), &connection_state).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Binary(bytes))) => match frame::json_text(IncomingPayload::Binary(&bytes)) {
                        Ok(text) => text.to_string(),
                        Err(err) => {
                            log::warn!("dropping frame from {addr}: {err}");
                            continue 'connection;
                        }
                    },
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue 'connection, // Ping/Pong handled by axum automatically
                    Some(Err(err)) => {
                        log::warn!("websocket error from {addr}: {err}");
                        break;
                    }
                };

                let outgoing = handle_incoming(&text, &mut connection_state, &gateway, &mut tables, &out_tx).await;
                for msg in outgoing {
                    if send_outgoing(&mut sink, msg, &connection_state).await.is_err() {
                        break 'connection;
                    }
                }
            }
        }
    }

    tables.subscriptions.close_all();
    tables.uploads.cancel_all().await;
    log::info!("connection from {addr} closed, cleanup complete");
}

async fn send_outgoing(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: Outgoing,
    connection_state: &ConnectionState,
) -> Result<(), axum::Error> {
    let payload = match msg {
        Outgoing::Srp(srp_msg) => srp_msg.to_json().unwrap_or_default(),
        Outgoing::App(app_msg) => match connection_state.session_key() {
            Some(key) if app_msg.is_application_message() => {
                let plaintext = app_msg.to_json().unwrap_or_default();
                let sealed = crypto::seal(key, plaintext.as_bytes());
                RelayMessage::Encrypted {
                    nonce: b64_encode(sealed.nonce),
                    ciphertext: b64_encode(sealed.ciphertext),
                }
                .to_json()
                .unwrap_or_default()
            }
            _ => app_msg.to_json().unwrap_or_default(),
        },
    };
    let frame = frame::build(FrameFormat::Json, payload.as_bytes());
    sink.send(Message::Binary(frame.into())).await
}

async fn handle_incoming(
    text: &str,
    connection_state: &mut ConnectionState,
    gateway: &GatewayState,
    tables: &mut ConnectionTables,
    out_tx: &flume::Sender<RelayMessage>,
) -> Vec<Outgoing> {
    if !connection_state.is_authenticated() {
        let Ok(srp_msg) = SrpMessage::from_json(text) else {
            log::warn!("dropping non-SRP message before authentication");
            return vec![];
        };
        return handle_srp_message(srp_msg, connection_state, gateway)
            .into_iter()
            .map(Outgoing::Srp)
            .collect();
    }

    let Ok(relay_msg) = RelayMessage::from_json(text) else {
        log::warn!("dropping undecodable application message");
        return vec![];
    };

    let session_key = connection_state.session_key().copied();
    let responses = match (&relay_msg, session_key) {
        (RelayMessage::Encrypted { nonce, ciphertext }, Some(key)) => {
            decrypt_and_dispatch(nonce, ciphertext, &key, gateway, tables, out_tx).await
        }
        (RelayMessage::Encrypted { .. }, None) => {
            log::warn!("dropping encrypted envelope on a plaintext connection");
            vec![]
        }
        (_, None) => dispatch::dispatch(relay_msg, &gateway.collaborators, tables, out_tx.clone()).await,
        (_, Some(_)) => {
            log::warn!("dropping plaintext application message on an authenticated connection");
            vec![]
        }
    };
    responses.into_iter().map(Outgoing::App).collect()
}

async fn decrypt_and_dispatch(
    nonce: &str,
    ciphertext: &str,
    key: &[u8; 32],
    gateway: &GatewayState,
    tables: &mut ConnectionTables,
    out_tx: &flume::Sender<RelayMessage>,
) -> Vec<RelayMessage> {
    let Ok(nonce_bytes) = b64_decode(nonce) else { return vec![] };
    let Ok(cipher_bytes) = b64_decode(ciphertext) else { return vec![] };
    let Ok(nonce) = crypto::nonce_from_bytes(&nonce_bytes) else { return vec![] };
    let sealed = crypto::SealedMessage {
        nonce,
        ciphertext: cipher_bytes,
    };
    let Ok(plaintext) = crypto::open(key, &sealed) else {
        return vec![]; // MAC failure: drop silently, do not leak the failure mode
    };
    let Ok(inner_text) = std::str::from_utf8(&plaintext) else { return vec![] };
    let Ok(inner) = RelayMessage::from_json(inner_text) else { return vec![] };
    dispatch::dispatch(inner, &gateway.collaborators, tables, out_tx.clone()).await
}

fn handle_srp_message(
    msg: SrpMessage,
    connection_state: &mut ConnectionState,
    gateway: &GatewayState,
) -> Vec<SrpMessage> {
    match msg {
        SrpMessage::Hello { identity } => {
            if !matches!(connection_state, ConnectionState::Unauthenticated { .. }) {
                log::warn!("dropping srp_hello outside the unauthenticated state");
                return vec![];
            }
            let config = gateway.config.read().unwrap();
            let Some(configured_username) = config.remote_access_username.clone() else {
                return vec![];
            };
            let salt = config
                .remote_access_salt_b64
                .as_deref()
                .and_then(|s| b64_decode(s).ok())
                .unwrap_or_default();
            let verifier = config
                .remote_access_verifier_b64
                .as_deref()
                .and_then(|s| b64_decode(s).ok())
                .unwrap_or_default();
            drop(config);

            match SrpServerSession::begin(&identity, &configured_username, salt, verifier) {
                Ok(session) => {
                    let challenge = session.challenge();
                    let failures = connection_state.failure_count();
                    *connection_state = ConnectionState::SrpWaitingProof {
                        session,
                        username: configured_username,
                        failures,
                    };
                    vec![SrpMessage::Challenge {
                        salt: b64_encode(challenge.salt),
                        b_pub: b64_encode(challenge.b_pub),
                    }]
                }
                Err(err) => {
                    *connection_state = std::mem::take(connection_state).reset_with_failure();
                    vec![SrpMessage::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }]
                }
            }
        }
        SrpMessage::Proof { a_pub, m1 } => {
            let owned = std::mem::take(connection_state);
            let ConnectionState::SrpWaitingProof {
                session,
                username,
                failures,
            } = owned
            else {
                log::warn!("dropping srp_proof outside the srp_waiting_proof state");
                return vec![];
            };
            let a_pub_bytes = b64_decode(&a_pub).unwrap_or_default();
            let m1_bytes = b64_decode(&m1).unwrap_or_default();
            match session.verify_proof(&a_pub_bytes, &m1_bytes) {
                Ok(proof) => {
                    let key = crypto::derive_session_key(&proof.shared_secret);
                    *connection_state = ConnectionState::Authenticated {
                        session_key: Some(key),
                        username: Some(username),
                    };
                    vec![SrpMessage::Verify {
                        m2: b64_encode(proof.m2),
                    }]
                }
                Err(err) => {
                    *connection_state = ConnectionState::Unauthenticated {
                        failures: failures.saturating_add(1),
                    };
                    vec![SrpMessage::Error {
                        code: err.code().to_string(),
                        message: err.to_string(),
                    }]
                }
            }
        }
        SrpMessage::Challenge { .. } | SrpMessage::Verify { .. } | SrpMessage::Error { .. } => {
            log::warn!("dropping server-direction SRP message received from client");
            vec![]
        }
    }
}
