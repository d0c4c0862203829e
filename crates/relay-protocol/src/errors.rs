use std::{fmt, net::SocketAddr};

/// Raised while parsing a wire frame. Exactly three kinds are observable to a
/// caller: an unrecognized format byte, a non-UTF-8 payload claiming to be
/// JSON, or a payload that is valid UTF-8 but not valid JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("unknown frame format byte: {0:#04x}")]
    UnknownFormat(u8),
    #[error("frame payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame payload is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Cryptographic failures. Callers must never forward the variant to the
/// remote peer; the wire-visible behavior for all of these is "drop the
/// message silently" (see the secretbox MAC-failure rule).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("ciphertext failed authentication")]
    MacMismatch,
    #[error("nonce must be 24 bytes, got {0}")]
    InvalidNonceLength(usize),
    #[error("key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("envelope field is not valid base64")]
    InvalidBase64,
}

/// Authentication-layer failures surfaced to the SRP state machine. Each one
/// maps to an `srp_error` code sent to the peer exactly once before the
/// connection resets to `unauthenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SrpAuthError {
    #[error("identity does not match the configured username")]
    InvalidIdentity,
    #[error("client proof did not verify")]
    InvalidProof,
    #[error("server could not complete the exchange")]
    ServerError,
}

impl SrpAuthError {
    pub fn code(&self) -> &'static str {
        match self {
            SrpAuthError::InvalidIdentity => "invalid_identity",
            SrpAuthError::InvalidProof => "invalid_proof",
            SrpAuthError::ServerError => "server_error",
        }
    }
}

/// Wraps an I/O or protocol failure with the peer address it came from, for
/// errors raised before a session has an identity to blame it on.
#[derive(Debug)]
pub struct ErrorWithAddres {
    pub src_ip: Option<SocketAddr>,
    pub message: String,
}

impl std::error::Error for ErrorWithAddres {}

impl ErrorWithAddres {
    pub fn new(src_ip: Option<SocketAddr>, message: &str) -> Self {
        ErrorWithAddres {
            src_ip,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ErrorWithAddres {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.src_ip)
    }
}
