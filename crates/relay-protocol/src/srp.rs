//! SRP-6a password-authenticated key exchange, driven over the 2048-bit
//! RFC 5054 prime group with SHA-256, per the four-message handshake:
//!
//! 1. `srp_hello{identity}`            client -> server
//! 2. `srp_challenge{salt, B}`         server -> client
//! 3. `srp_proof{A, M1}`               client -> server
//! 4. `srp_verify{M2}`                 server -> client
//!
//! Both sides derive the secretbox session key from the shared secret `S`
//! once the exchange completes (see [`crate::crypto::derive_session_key`]).

use rand::RngCore;
use sha2::Sha256;
use srp::client::{SrpClient, SrpClientVerifier};
use srp::groups::G_2048;
use srp::server::SrpServer;

use crate::errors::SrpAuthError;

/// Generates a fresh random salt and verifier pair for a username/password,
/// to be persisted by the origin at enrollment time (or whenever the user
/// changes their remote-access password). Never run on every login: only
/// the salt and verifier are stored, the password itself is discarded.
pub fn compute_verifier(username: &str, password: &str, salt: &[u8]) -> Vec<u8> {
    let client = SrpClient::<Sha256>::new(&G_2048);
    client.compute_verifier(username.as_bytes(), password.as_bytes(), salt)
}

pub fn random_salt() -> [u8; 16] {
    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    salt
}

fn random_ephemeral() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::rng().fill_bytes(&mut secret);
    secret
}

/// Server-side session state for one login attempt. A fresh instance must be
/// created per authentication; it is never reused across attempts.
pub struct SrpServerSession {
    username: String,
    salt: Vec<u8>,
    verifier: Vec<u8>,
    b: [u8; 32],
}

pub struct SrpChallenge {
    pub salt: Vec<u8>,
    pub b_pub: Vec<u8>,
}

/// Produced once the server has verified the client's proof. Carries the
/// `M2` value to send back and the raw SRP secret `S` the caller should feed
/// into [`crate::crypto::derive_session_key`].
pub struct SrpServerProof {
    pub m2: Vec<u8>,
    pub shared_secret: Vec<u8>,
}

impl SrpServerSession {
    /// `identity` is the identity presented in `srp_hello`; it must match
    /// `configured_username` or the caller should respond with
    /// `srp_error{invalid_identity}` without constructing a session.
    pub fn begin(
        identity: &str,
        configured_username: &str,
        salt: Vec<u8>,
        verifier: Vec<u8>,
    ) -> Result<Self, SrpAuthError> {
        if identity != configured_username {
            return Err(SrpAuthError::InvalidIdentity);
        }
        Ok(SrpServerSession {
            username: configured_username.to_string(),
            salt,
            verifier,
            b: random_ephemeral(),
        })
    }

    pub fn challenge(&self) -> SrpChallenge {
        let server = SrpServer::<Sha256>::new(&G_2048);
        let b_pub = server.compute_public_ephemeral(&self.b, &self.verifier);
        SrpChallenge {
            salt: self.salt.clone(),
            b_pub,
        }
    }

    /// Verifies the client's `(A, M1)` proof. On success returns `M2` and the
    /// raw shared secret `S`. On failure the session must be discarded and
    /// the connection reset to `unauthenticated`.
    pub fn verify_proof(self, a_pub: &[u8], m1: &[u8]) -> Result<SrpServerProof, SrpAuthError> {
        let server = SrpServer::<Sha256>::new(&G_2048);
        let verifier = server
            .process_reply(&self.b, &self.verifier, a_pub)
            .map_err(|_| SrpAuthError::ServerError)?;
        // `verify_client` performs a constant-time comparison of M1
        // internally; we never branch on the raw value ourselves.
        verifier
            .verify_client(m1)
            .map_err(|_| SrpAuthError::InvalidProof)?;
        let _ = &self.username; // kept for diagnostics / future audit log
        Ok(SrpServerProof {
            m2: verifier.proof().to_vec(),
            shared_secret: verifier.key().to_vec(),
        })
    }
}

/// Client-side session state driving the same exchange from the other end.
pub struct SrpClientSession {
    username: String,
    password: String,
    a: [u8; 32],
}

pub struct SrpClientProof {
    pub a_pub: Vec<u8>,
    pub m1: Vec<u8>,
    verifier: SrpClientVerifier<Sha256>,
}

impl SrpClientProof {
    /// Validates the server's `M2` and, on success, returns the raw shared
    /// secret to derive the session key from.
    pub fn verify_server(self, m2: &[u8]) -> Result<Vec<u8>, SrpAuthError> {
        // `verify_server` performs a constant-time comparison of M2
        // internally; we never branch on the raw value ourselves.
        self.verifier
            .verify_server(m2)
            .map_err(|_| SrpAuthError::ServerError)?;
        Ok(self.verifier.key().to_vec())
    }
}

impl SrpClientSession {
    pub fn new(username: &str, password: &str) -> Self {
        SrpClientSession {
            username: username.to_string(),
            password: password.to_string(),
            a: random_ephemeral(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.username
    }

    pub fn a_pub(&self) -> Vec<u8> {
        let client = SrpClient::<Sha256>::new(&G_2048);
        client.compute_public_ephemeral(&self.a)
    }

    /// Processes the server's `srp_challenge{salt, B}` and produces the
    /// `(A, M1)` proof to send back.
    pub fn process_challenge(
        &self,
        salt: &[u8],
        b_pub: &[u8],
    ) -> Result<SrpClientProof, SrpAuthError> {
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier = client
            .process_reply(
                &self.a,
                self.username.as_bytes(),
                self.password.as_bytes(),
                salt,
                b_pub,
            )
            .map_err(|_| SrpAuthError::ServerError)?;
        Ok(SrpClientProof {
            a_pub: client.compute_public_ephemeral(&self.a),
            m1: verifier.proof().to_vec(),
            verifier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enroll(username: &str, password: &str) -> (Vec<u8>, Vec<u8>) {
        let salt = random_salt().to_vec();
        let verifier = compute_verifier(username, password, &salt);
        (salt, verifier)
    }

    #[test]
    fn full_exchange_derives_matching_keys_and_reaches_authenticated() {
        let (username, password) = ("alice", "correct horse battery staple");
        let (salt, verifier) = enroll(username, password);

        let server = SrpServerSession::begin(username, username, salt, verifier).unwrap();
        let challenge = server.challenge();

        let client = SrpClientSession::new(username, password);
        let client_proof = client
            .process_challenge(&challenge.salt, &challenge.b_pub)
            .unwrap();

        let server_proof = server
            .verify_proof(&client_proof.a_pub, &client_proof.m1)
            .unwrap();

        let client_secret = client_proof.verify_server(&server_proof.m2).unwrap();

        assert_eq!(client_secret, server_proof.shared_secret);
        let client_key = crate::crypto::derive_session_key(&client_secret);
        let server_key = crate::crypto::derive_session_key(&server_proof.shared_secret);
        assert_eq!(client_key, server_key);
    }

    #[test]
    fn mismatched_identity_is_rejected_before_any_session_exists() {
        let (salt, verifier) = enroll("alice", "hunter2");
        let result = SrpServerSession::begin("mallory", "alice", salt, verifier);
        assert!(matches!(result, Err(SrpAuthError::InvalidIdentity)));
    }

    #[test]
    fn wrong_password_never_authenticates() {
        let username = "alice";
        let (salt, verifier) = enroll(username, "the-real-password");

        let server = SrpServerSession::begin(username, username, salt, verifier).unwrap();
        let challenge = server.challenge();

        let attacker = SrpClientSession::new(username, "a-guessed-password");
        let client_proof = attacker
            .process_challenge(&challenge.salt, &challenge.b_pub)
            .unwrap();

        let result = server.verify_proof(&client_proof.a_pub, &client_proof.m1);
        assert!(matches!(result, Err(SrpAuthError::InvalidProof)));
    }

    #[test]
    fn server_session_is_not_reusable_after_failure() {
        // verify_proof consumes `self`, so a second attempt on the same
        // session cannot compile; a fresh `begin()` is required instead.
        let (salt, verifier) = enroll("alice", "hunter2");
        let server = SrpServerSession::begin("alice", "alice", salt, verifier).unwrap();
        let challenge = server.challenge();
        let attacker = SrpClientSession::new("alice", "wrong");
        let bad_proof = attacker
            .process_challenge(&challenge.salt, &challenge.b_pub)
            .unwrap();
        assert!(server.verify_proof(&bad_proof.a_pub, &bad_proof.m1).is_err());
    }
}
