#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection lost")]
    ConnectionLost,

    #[error("request timed out")]
    Timeout,

    #[error("request failed with status {status}")]
    Status { status: u16, body: Option<serde_json::Value> },

    #[error("srp authentication failed: {0}")]
    Auth(String),

    #[error("decoding failure: {0}")]
    Decode(String),

    #[error("upload was cancelled")]
    UploadCancelled,

    #[error("upload failed: {0}")]
    UploadFailed(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
