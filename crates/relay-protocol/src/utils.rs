use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::errors::CryptoError;

pub fn b64_encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD.decode(s).map_err(|_| CryptoError::InvalidBase64)
}

/// Validates a broker username: 3-32 chars of `[a-z0-9-]`, not starting or
/// ending with `-`.
pub fn is_valid_username(username: &str) -> bool {
    use crate::consts::{USERNAME_MAX_LEN, USERNAME_MIN_LEN};

    let len = username.len();
    if len < USERNAME_MIN_LEN || len > USERNAME_MAX_LEN {
        return false;
    }
    if !username
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return false;
    }
    !username.starts_with('-') && !username.ends_with('-')
}
