/// secretbox nonce size (XSalsa20-Poly1305).
pub const NONCE_LENGTH: usize = 24;
/// secretbox session key size.
pub const KEY_LENGTH: usize = 32;
/// Poly1305 authentication tag size, included in every ciphertext.
pub const TAG_LENGTH: usize = 16;

/// Default heartbeat interval for subscription channels and broker pipes.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default timeout for a client `request()` awaiting its matching `response`.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default chunk size for client-driven uploads.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Progress reports are coalesced to roughly one per this many bytes.
pub const UPLOAD_PROGRESS_STEP: u64 = 64 * 1024;

/// Bounded channel capacity used for internal fan-out (event bus forwarding,
/// broker pipe buffering).
pub const CHANNEL_SIZE: usize = 1024;

/// Username grammar: 3-32 characters of [a-z0-9-], no leading/trailing '-'.
pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 32;
