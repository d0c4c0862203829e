//! The wire-level message types exchanged over the relay.
//!
//! `SrpMessage` is always sent plaintext (format `Json`, never wrapped in an
//! `encrypted` envelope). `RelayMessage` covers everything else, including
//! the `encrypted` envelope itself; application messages travel inside an
//! envelope once the connection is authenticated, or in the clear when
//! remote access is disabled (empty session key).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::FrameError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SrpMessage {
    #[serde(rename = "srp_hello")]
    Hello { identity: String },

    #[serde(rename = "srp_challenge")]
    Challenge {
        salt: String,
        #[serde(rename = "B")]
        b_pub: String,
    },

    #[serde(rename = "srp_proof")]
    Proof {
        #[serde(rename = "A")]
        a_pub: String,
        #[serde(rename = "M1")]
        m1: String,
    },

    #[serde(rename = "srp_verify")]
    Verify {
        #[serde(rename = "M2")]
        m2: String,
    },

    #[serde(rename = "srp_error")]
    Error { code: String, message: String },
}

impl SrpMessage {
    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::InvalidJson(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    // -- client -> gateway -------------------------------------------------
    #[serde(rename_all = "camelCase")]
    Request {
        id: String,
        method: String,
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    Subscribe {
        subscription_id: String,
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_event_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Unsubscribe { subscription_id: String },

    #[serde(rename_all = "camelCase")]
    UploadStart {
        upload_id: String,
        project_id: String,
        session_id: String,
        filename: String,
        size: u64,
        mime_type: String,
    },

    #[serde(rename_all = "camelCase")]
    UploadChunk {
        upload_id: String,
        offset: u64,
        data: String,
    },

    #[serde(rename_all = "camelCase")]
    UploadEnd { upload_id: String },

    // -- gateway -> client --------------------------------------------------
    #[serde(rename_all = "camelCase")]
    Response {
        id: String,
        status: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    Event {
        subscription_id: String,
        event_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        data: Value,
    },

    #[serde(rename_all = "camelCase")]
    UploadProgress {
        upload_id: String,
        bytes_received: u64,
    },

    #[serde(rename_all = "camelCase")]
    UploadComplete { upload_id: String, file: Value },

    #[serde(rename_all = "camelCase")]
    UploadError { upload_id: String, error: Value },

    // -- either direction, once authenticated -------------------------------
    Encrypted { nonce: String, ciphertext: String },
}

impl RelayMessage {
    pub fn to_json(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(|e| FrameError::InvalidJson(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))
    }

    /// `true` for messages that must never appear outside an `encrypted`
    /// envelope once the connection has authenticated with a non-empty
    /// session key: every application message except the envelope itself.
    pub fn is_application_message(&self) -> bool {
        !matches!(self, RelayMessage::Encrypted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_with_expected_wire_shape() {
        let msg = RelayMessage::Request {
            id: "R1".into(),
            method: "GET".into(),
            path: "/health".into(),
            headers: None,
            body: None,
        };
        let text = msg.to_json().unwrap();
        assert_eq!(text, r#"{"type":"request","id":"R1","method":"GET","path":"/health"}"#);
        assert_eq!(RelayMessage::from_json(&text).unwrap(), msg);
    }

    #[test]
    fn subscribe_omits_absent_optional_fields() {
        let msg = RelayMessage::Subscribe {
            subscription_id: "S1".into(),
            channel: "activity".into(),
            session_id: None,
            last_event_id: None,
        };
        let text = msg.to_json().unwrap();
        assert!(!text.contains("sessionId"));
        assert!(!text.contains("lastEventId"));
    }

    #[test]
    fn upload_chunk_tag_and_fields_match_wire_contract() {
        let msg = RelayMessage::UploadChunk {
            upload_id: "U1".into(),
            offset: 100_000,
            data: "cGF5bG9hZA==".into(),
        };
        let text = msg.to_json().unwrap();
        assert_eq!(
            text,
            r#"{"type":"upload_chunk","uploadId":"U1","offset":100000,"data":"cGF5bG9hZA=="}"#
        );
    }

    #[test]
    fn encrypted_envelope_round_trips() {
        let msg = RelayMessage::Encrypted {
            nonce: "bm9uY2U=".into(),
            ciphertext: "Y2lwaGVy".into(),
        };
        let text = msg.to_json().unwrap();
        assert_eq!(
            RelayMessage::from_json(&text).unwrap(),
            msg
        );
        assert!(!msg.is_application_message());
    }

    #[test]
    fn response_round_trips_with_body() {
        let msg = RelayMessage::Response {
            id: "R1".into(),
            status: 200,
            headers: None,
            body: Some(json!({"status": "ok"})),
        };
        let text = msg.to_json().unwrap();
        let back = RelayMessage::from_json(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_type_tag_is_a_decode_error() {
        let text = r#"{"type":"not_a_real_message"}"#;
        assert!(matches!(RelayMessage::from_json(text), Err(FrameError::InvalidJson(_))));
    }

    #[test]
    fn srp_hello_round_trips() {
        let msg = SrpMessage::Hello { identity: "alice".into() };
        let text = msg.to_json().unwrap();
        assert_eq!(text, r#"{"type":"srp_hello","identity":"alice"}"#);
        assert_eq!(SrpMessage::from_json(&text).unwrap(), msg);
    }

    #[test]
    fn srp_challenge_uses_uppercase_b_field() {
        let msg = SrpMessage::Challenge {
            salt: "c2FsdA==".into(),
            b_pub: "Qg==".into(),
        };
        let text = msg.to_json().unwrap();
        assert!(text.contains(r#""B":"Qg==""#));
    }

    #[test]
    fn srp_error_carries_code_and_message() {
        let msg = SrpMessage::Error {
            code: "invalid_proof".into(),
            message: "client proof did not verify".into(),
        };
        let text = msg.to_json().unwrap();
        assert_eq!(SrpMessage::from_json(&text).unwrap(), msg);
    }
}
