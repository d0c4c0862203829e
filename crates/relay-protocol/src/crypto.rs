//! Session-key derivation and envelope encryption for authenticated
//! connections.
//!
//! The secretbox construction is NaCl-compatible XSalsa20-Poly1305, chosen so
//! that a browser or phone remote client can decrypt with any off-the-shelf
//! `tweetnacl`/`libsodium` binding without needing an AES-GCM implementation.

use crypto_secretbox::{
    AeadCore, KeyInit, XSalsa20Poly1305,
    aead::{Aead, OsRng, generic_array::GenericArray},
};
use sha2::{Digest, Sha512};

use crate::consts::{KEY_LENGTH, NONCE_LENGTH};
use crate::errors::CryptoError;

/// Derives the 32-byte secretbox key from the raw SRP session secret: the
/// first 32 bytes of SHA-512(S).
pub fn derive_session_key(srp_session_secret: &[u8]) -> [u8; KEY_LENGTH] {
    let digest = Sha512::digest(srp_session_secret);
    let mut key = [0u8; KEY_LENGTH];
    key.copy_from_slice(&digest[..KEY_LENGTH]);
    key
}

/// A sealed `{type:"encrypted", nonce, ciphertext}` envelope, already
/// base64-decoded into raw bytes.
pub struct SealedMessage {
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

/// Encrypts `plaintext` (the JSON-encoded inner `RelayMessage`) under `key`
/// with a fresh CSPRNG nonce. Never reuses a nonce across calls.
pub fn seal(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> SealedMessage {
    let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key));
    let nonce = XSalsa20Poly1305::generate_nonce(&mut OsRng);
    // Encryption with a freshly generated 24-byte nonce cannot fail.
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .expect("secretbox encryption is infallible for valid inputs");
    SealedMessage {
        nonce: nonce.into(),
        ciphertext,
    }
}

/// Opens a sealed envelope. On MAC failure the caller must drop the message
/// silently per the spec -- this function only reports whether that
/// happened, it does not log or leak anything about the key.
pub fn open(key: &[u8; KEY_LENGTH], sealed: &SealedMessage) -> Result<Vec<u8>, CryptoError> {
    let cipher = XSalsa20Poly1305::new(GenericArray::from_slice(key));
    let nonce = GenericArray::from_slice(&sealed.nonce);
    cipher
        .decrypt(nonce, sealed.ciphertext.as_ref())
        .map_err(|_| CryptoError::MacMismatch)
}

pub fn nonce_from_bytes(bytes: &[u8]) -> Result<[u8; NONCE_LENGTH], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidNonceLength(bytes.len()))
}

pub fn key_from_bytes(bytes: &[u8]) -> Result<[u8; KEY_LENGTH], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_is_deterministic_and_32_bytes() {
        let s = b"some shared secret bytes from srp";
        let k1 = derive_session_key(s);
        let k2 = derive_session_key(s);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), KEY_LENGTH);
    }

    #[test]
    fn different_secrets_derive_different_keys() {
        let k1 = derive_session_key(b"secret one");
        let k2 = derive_session_key(b"secret two");
        assert_ne!(k1, k2);
    }

    #[test]
    fn round_trips_through_seal_and_open() {
        let key = derive_session_key(b"shared secret");
        let plaintext = br#"{"type":"request","id":"R1"}"#;
        let sealed = seal(&key, plaintext);
        let opened = open(&key, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn bit_flip_in_ciphertext_fails_to_open() {
        let key = derive_session_key(b"shared secret");
        let mut sealed = seal(&key, b"payload");
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(open(&key, &sealed), Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn bit_flip_in_nonce_fails_to_open() {
        let key = derive_session_key(b"shared secret");
        let mut sealed = seal(&key, b"payload");
        sealed.nonce[0] ^= 0x01;
        assert!(matches!(open(&key, &sealed), Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let key = derive_session_key(b"shared secret");
        let other_key = derive_session_key(b"different secret");
        let sealed = seal(&key, b"payload");
        assert!(matches!(open(&other_key, &sealed), Err(CryptoError::MacMismatch)));
    }

    #[test]
    fn nonces_are_not_reused() {
        let key = derive_session_key(b"shared secret");
        let a = seal(&key, b"same plaintext");
        let b = seal(&key, b"same plaintext");
        assert_ne!(a.nonce, b.nonce);
    }
}
