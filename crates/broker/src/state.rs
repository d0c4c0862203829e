//! In-memory pairing state: at most one waiting slot per username, and the
//! set of active pairs. Guarded by a single mutex each; the broker never
//! holds a lock across two peer connections.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use relay_protocol::system::trigger::Trigger;

#[derive(Debug, Clone)]
pub enum PipeFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Handed to a connection's task once its peer has shown up: where to write
/// bytes bound for the peer, and how to tell the peer to shut down.
pub struct PairedPeer {
    pub to_peer: mpsc::UnboundedSender<PipeFrame>,
    pub peer_close: Trigger,
}

/// A half-open socket waiting for its matching client to connect. `close`
/// lets the broker tear down a previous registration's socket when the same
/// install re-registers ("same install replaces"). `paired` fires exactly
/// once, when a client claims this slot, handing back the client's pipe
/// endpoint.
pub struct WaitingSlot {
    pub install_id: String,
    pub close: Trigger,
    pub to_origin: mpsc::UnboundedSender<PipeFrame>,
    pub paired: oneshot::Sender<PairedPeer>,
}

pub struct Pair {
    pub created_at: DateTime<Utc>,
    pub close_origin: Trigger,
    pub close_client: Trigger,
}

#[derive(Default)]
pub struct BrokerState {
    waiting: Mutex<HashMap<String, WaitingSlot>>,
    pairs: Mutex<HashMap<String, Pair>>,
}

impl BrokerState {
    pub fn new() -> Self {
        BrokerState::default()
    }

    /// Installs a waiting slot for `username`, returning any slot that was
    /// already there so the caller can close its socket ("same install
    /// replaces").
    pub fn insert_waiting(&self, username: &str, slot: WaitingSlot) -> Option<WaitingSlot> {
        self.waiting.lock().unwrap().insert(username.to_string(), slot)
    }

    pub fn remove_waiting(&self, username: &str) -> Option<WaitingSlot> {
        self.waiting.lock().unwrap().remove(username)
    }

    pub fn has_waiting(&self, username: &str) -> bool {
        self.waiting.lock().unwrap().contains_key(username)
    }

    pub fn insert_pair(&self, username: &str, pair: Pair) {
        self.pairs.lock().unwrap().insert(username.to_string(), pair);
    }

    pub fn remove_pair(&self, username: &str) -> Option<Pair> {
        self.pairs.lock().unwrap().remove(username)
    }

    /// Snapshot counts for the health endpoint.
    pub fn counts(&self) -> (usize, usize) {
        (
            self.waiting.lock().unwrap().len(),
            self.pairs.lock().unwrap().len(),
        )
    }

    pub fn waiting_usernames(&self) -> Vec<String> {
        self.waiting.lock().unwrap().keys().cloned().collect()
    }

    pub fn paired_usernames(&self) -> Vec<String> {
        self.pairs.lock().unwrap().keys().cloned().collect()
    }
}
