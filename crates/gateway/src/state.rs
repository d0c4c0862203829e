//! Per-connection authentication state. `unauthenticated -> srp_waiting_proof
//! -> authenticated`; any invalid transition resets to `unauthenticated` and
//! discards the SRP session object, which is never reused across attempts.

use relay_protocol::srp::SrpServerSession;

pub enum ConnectionState {
    Unauthenticated {
        failures: u8,
    },
    SrpWaitingProof {
        session: SrpServerSession,
        username: String,
        failures: u8,
    },
    Authenticated {
        session_key: Option<[u8; 32]>,
        username: Option<String>,
    },
}

impl ConnectionState {
    pub fn new() -> Self {
        ConnectionState::Unauthenticated { failures: 0 }
    }

    /// Remote access disabled: skip SRP entirely, start authenticated with no
    /// session key so application messages travel in plaintext.
    pub fn plaintext_authenticated() -> Self {
        ConnectionState::Authenticated {
            session_key: None,
            username: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionState::Authenticated { .. })
    }

    pub fn session_key(&self) -> Option<&[u8; 32]> {
        match self {
            ConnectionState::Authenticated {
                session_key: Some(key),
                ..
            } => Some(key),
            _ => None,
        }
    }

    pub fn failure_count(&self) -> u8 {
        match self {
            ConnectionState::Unauthenticated { failures } => *failures,
            ConnectionState::SrpWaitingProof { failures, .. } => *failures,
            ConnectionState::Authenticated { .. } => 0,
        }
    }

    pub fn reset_with_failure(self) -> Self {
        let failures = self.failure_count().saturating_add(1);
        ConnectionState::Unauthenticated { failures }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unauthenticated_with_zero_failures() {
        let state = ConnectionState::new();
        assert!(!state.is_authenticated());
        assert_eq!(state.failure_count(), 0);
    }

    #[test]
    fn plaintext_mode_is_authenticated_with_no_key() {
        let state = ConnectionState::plaintext_authenticated();
        assert!(state.is_authenticated());
        assert!(state.session_key().is_none());
    }

    #[test]
    fn reset_with_failure_accumulates_across_attempts() {
        let state = ConnectionState::new().reset_with_failure();
        let state = state.reset_with_failure();
        assert_eq!(state.failure_count(), 2);
        assert!(!state.is_authenticated());
    }
}
