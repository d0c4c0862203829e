//! The connection-local upload table: `uploadId -> {handle, expectedSize,
//! bytesReceived}`. Progress is reported every time cumulative bytes cross a
//! 64 KiB boundary, or on completion.

use std::collections::HashMap;

use relay_protocol::consts::UPLOAD_PROGRESS_STEP;

use crate::collaborators::UploadHandle;

pub struct UploadEntry {
    pub handle: Box<dyn UploadHandle>,
    pub expected_size: u64,
    pub bytes_received: u64,
    last_reported_step: u64,
}

impl UploadEntry {
    pub fn new(handle: Box<dyn UploadHandle>, expected_size: u64) -> Self {
        UploadEntry {
            handle,
            expected_size,
            bytes_received: 0,
            last_reported_step: 0,
        }
    }

    /// Returns `true` when the cumulative byte count just crossed a progress
    /// boundary (or finished) and a `upload_progress` should be emitted.
    pub fn record_bytes(&mut self, len: u64) -> bool {
        self.bytes_received += len;
        let step = self.bytes_received / UPLOAD_PROGRESS_STEP as u64;
        let finished = self.bytes_received >= self.expected_size;
        if step > self.last_reported_step || finished {
            self.last_reported_step = step;
            true
        } else {
            false
        }
    }
}

#[derive(Default)]
pub struct UploadTable {
    order: Vec<String>,
    entries: HashMap<String, UploadEntry>,
}

impl UploadTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, upload_id: &str) -> bool {
        self.entries.contains_key(upload_id)
    }

    pub fn insert(&mut self, upload_id: String, entry: UploadEntry) {
        self.order.push(upload_id.clone());
        self.entries.insert(upload_id, entry);
    }

    pub fn get_mut(&mut self, upload_id: &str) -> Option<&mut UploadEntry> {
        self.entries.get_mut(upload_id)
    }

    pub fn remove(&mut self, upload_id: &str) -> Option<UploadEntry> {
        self.order.retain(|id| id != upload_id);
        self.entries.remove(upload_id)
    }

    /// Cancels every remaining upload's sink handle, in reverse insertion
    /// order, on socket close.
    pub async fn cancel_all(&mut self) {
        let ids: Vec<String> = self.order.drain(..).collect();
        for id in ids.into_iter().rev() {
            if let Some(entry) = self.entries.remove(&id) {
                entry.handle.cancel().await;
            }
        }
    }
}
