//! The broker's single WebSocket endpoint. A connection speaks
//! [`BrokerMessage`] until it is paired, then becomes an opaque byte pipe to
//! its peer until either side disconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use relay_protocol::log;
use relay_protocol::system::trigger::Trigger;
use relay_protocol::utils::is_valid_username;

use crate::errors::{ConnectError, RegisterError};
use crate::protocol::BrokerMessage;
use crate::state::{BrokerState, Pair, PairedPeer, PipeFrame, WaitingSlot};
use crate::store::RegistrationStore;

#[derive(Clone)]
pub struct BrokerAppState {
    pub state: Arc<BrokerState>,
    pub store: Arc<RegistrationStore>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app): State<BrokerAppState>,
) -> impl IntoResponse {
    ws.on_failed_upgrade(move |err| {
        log::warn!("broker websocket upgrade failed from {addr}: {err}");
    })
    .on_upgrade(move |socket| handle_connection(socket, app))
}

async fn handle_connection(socket: WebSocket, app: BrokerAppState) {
    let (mut sink, stream) = socket.split();

    let first = match first_text_message(stream).await {
        Some((text, stream)) => (text, stream),
        None => return,
    };
    let (text, stream) = first;

    let message = match BrokerMessage::from_json(&text) {
        Ok(message) => message,
        Err(_) => return,
    };

    match message {
        BrokerMessage::ServerRegister { username, install_id } => {
            run_origin(sink, stream, app, username, install_id).await
        }
        BrokerMessage::ClientConnect { username } => run_client(sink, stream, app, username).await,
        _ => {
            let _ = sink
                .send(Message::Text(
                    BrokerMessage::ServerRejected {
                        reason: "invalid_username".to_string(),
                    }
                    .to_json()
                    .into(),
                ))
                .await;
        }
    }
}

async fn first_text_message(
    mut stream: SplitStream<WebSocket>,
) -> Option<(String, SplitStream<WebSocket>)> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Some((text.to_string(), stream)),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            _ => return None,
        }
    }
}

async fn run_origin(
    mut sink: SplitSink<WebSocket, Message>,
    mut stream: SplitStream<WebSocket>,
    app: BrokerAppState,
    username: String,
    install_id: String,
) {
    if !is_valid_username(&username) {
        let _ = reject_origin(&mut sink, RegisterError::InvalidUsername.reason()).await;
        return;
    }

    if let Err(reason) = register(&app, &username, &install_id).await {
        let _ = reject_origin(&mut sink, reason).await;
        return;
    }

    let (to_origin_tx, mut to_origin_rx) = mpsc::unbounded_channel::<PipeFrame>();
    let (paired_tx, paired_rx) = oneshot::channel::<PairedPeer>();
    let close = Trigger::new();

    if let Some(previous) = app.state.insert_waiting(
        &username,
        WaitingSlot {
            install_id: install_id.clone(),
            close: close.clone(),
            to_origin: to_origin_tx,
            paired: paired_tx,
        },
    ) {
        previous.close.trigger();
    }

    if sink
        .send(Message::Text(BrokerMessage::ServerRegistered.to_json().into()))
        .await
        .is_err()
    {
        app.state.remove_waiting(&username);
        return;
    }

    let peer = tokio::select! {
        _ = close.wait_async() => {
            app.state.remove_waiting(&username);
            return;
        }
        peer = paired_rx => match peer {
            Ok(peer) => peer,
            Err(_) => {
                app.state.remove_waiting(&username);
                return;
            }
        },
    };

    pipe_loop(sink, stream.by_ref(), &mut to_origin_rx, &close, peer).await;
    app.state.remove_pair(&username);
}

async fn run_client(
    mut sink: SplitSink<WebSocket, Message>,
    mut stream: SplitStream<WebSocket>,
    app: BrokerAppState,
    username: String,
) {
    let store = app.store.clone();
    let lookup_username = username.clone();
    let existing = tokio::task::spawn_blocking(move || store.find(&lookup_username))
        .await
        .expect("blocking registration lookup panicked");

    match existing {
        Ok(Some(_)) => {}
        Ok(None) => {
            let _ = reject_client(&mut sink, ConnectError::UnknownUsername.reason()).await;
            return;
        }
        Err(e) => {
            log::error!("registration lookup failed: {e}");
            let _ = reject_client(&mut sink, ConnectError::UnknownUsername.reason()).await;
            return;
        }
    };

    let Some(waiting) = app.state.remove_waiting(&username) else {
        let _ = reject_client(&mut sink, ConnectError::ServerOffline.reason()).await;
        return;
    };

    let (to_client_tx, mut to_client_rx) = mpsc::unbounded_channel::<PipeFrame>();
    let client_close = Trigger::new();

    if waiting
        .paired
        .send(PairedPeer {
            to_peer: to_client_tx,
            peer_close: client_close.clone(),
        })
        .is_err()
    {
        // Origin went away between being pulled off the waiting map and
        // receiving the pairing notification; treat as if it were offline.
        let _ = reject_client(&mut sink, ConnectError::ServerOffline.reason()).await;
        return;
    }

    app.state.insert_pair(
        &username,
        Pair {
            created_at: Utc::now(),
            close_origin: waiting.close.clone(),
            close_client: client_close.clone(),
        },
    );

    if sink
        .send(Message::Text(BrokerMessage::ClientConnected.to_json().into()))
        .await
        .is_err()
    {
        waiting.close.trigger();
        app.state.remove_pair(&username);
        return;
    }

    let peer = PairedPeer {
        to_peer: waiting.to_origin,
        peer_close: waiting.close,
    };

    pipe_loop(sink, stream.by_ref(), &mut to_client_rx, &client_close, peer).await;
    app.state.remove_pair(&username);
}

async fn register(app: &BrokerAppState, username: &str, install_id: &str) -> Result<(), &'static str> {
    let store = app.store.clone();
    let lookup_username = username.to_string();
    let existing = tokio::task::spawn_blocking(move || store.find(&lookup_username))
        .await
        .expect("blocking registration lookup panicked");

    match existing {
        Ok(Some(registration)) if registration.install_id != install_id => {
            Err(RegisterError::UsernameTaken.reason())
        }
        Ok(Some(_)) => {
            let store = app.store.clone();
            let username = username.to_string();
            let _ = tokio::task::spawn_blocking(move || store.bump_last_seen(&username, Utc::now())).await;
            Ok(())
        }
        Ok(None) => {
            let store = app.store.clone();
            let username = username.to_string();
            let install_id = install_id.to_string();
            let _ =
                tokio::task::spawn_blocking(move || store.insert(&username, &install_id, Utc::now())).await;
            Ok(())
        }
        Err(e) => {
            log::error!("registration lookup failed: {e}");
            Err(RegisterError::UsernameTaken.reason())
        }
    }
}

/// Runs the byte-pipe phase for one side of a pair: forwards inbound
/// WebSocket frames to the peer's sender, writes frames arriving from the
/// peer out to this socket, and stops on close from either side.
async fn pipe_loop(
    mut sink: SplitSink<WebSocket, Message>,
    stream: &mut SplitStream<WebSocket>,
    inbox: &mut mpsc::UnboundedReceiver<PipeFrame>,
    my_close: &Trigger,
    peer: PairedPeer,
) {
    loop {
        tokio::select! {
            _ = my_close.wait_async() => break,
            frame = inbox.recv() => {
                match frame {
                    Some(PipeFrame::Text(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(PipeFrame::Binary(data)) => {
                        if sink.send(Message::Binary(data.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let _ = peer.to_peer.send(PipeFrame::Text(text.to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = peer.to_peer.send(PipeFrame::Binary(data.to_vec()));
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    _ => break,
                }
            }
        }
    }
    peer.peer_close.trigger();
}

async fn reject_origin(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: &str,
) -> Result<(), axum::Error> {
    sink.send(Message::Text(
        BrokerMessage::ServerRejected {
            reason: reason.to_string(),
        }
        .to_json()
        .into(),
    ))
    .await
}

async fn reject_client(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: &str,
) -> Result<(), axum::Error> {
    sink.send(Message::Text(
        BrokerMessage::ClientError {
            reason: reason.to_string(),
        }
        .to_json()
        .into(),
    ))
    .await
}
