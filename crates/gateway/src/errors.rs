//! Failure conditions raised while dispatching a decrypted message. Every
//! variant maps to a wire-visible `response`/`upload_error`, never to a
//! closed connection: the connection stays open per the failure rules.

use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("duplicate subscriptionId")]
    DuplicateSubscription,

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("sessionId is required for the session channel")]
    MissingSessionId,

    #[error("no running process for session {0}")]
    NoProcessForSession(String),

    #[error("http mux request failed: {0}")]
    HttpMux(#[from] anyhow::Error),

    #[error("upload offset mismatch: expected {expected}, got {got}")]
    UploadOffsetMismatch { expected: u64, got: u64 },

    #[error("unknown uploadId: {0}")]
    UnknownUpload(String),

    #[error("upload sink write failed: {0}")]
    SinkWrite(String),

    #[error("upload_end received before all bytes were uploaded")]
    UploadIncomplete,

    #[error("payload is not valid base64")]
    InvalidUploadData,
}

impl DispatchError {
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::DuplicateSubscription => 400,
            DispatchError::UnknownChannel(_) => 400,
            DispatchError::MissingSessionId => 400,
            DispatchError::NoProcessForSession(_) => 404,
            DispatchError::HttpMux(_) => 500,
            DispatchError::UploadOffsetMismatch { .. } => 400,
            DispatchError::UnknownUpload(_) => 404,
            DispatchError::SinkWrite(_) => 500,
            DispatchError::UploadIncomplete => 400,
            DispatchError::InvalidUploadData => 400,
        }
    }

    pub fn body(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}
