//! The broker's own tiny pairing protocol, spoken in plaintext JSON over
//! text WebSocket frames before a connection enters pipe mode. Once paired,
//! the broker stops parsing anything at all.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BrokerMessage {
    #[serde(rename = "server_register")]
    ServerRegister {
        username: String,
        #[serde(rename = "installId")]
        install_id: String,
    },

    #[serde(rename = "server_registered")]
    ServerRegistered,

    #[serde(rename = "server_rejected")]
    ServerRejected { reason: String },

    #[serde(rename = "client_connect")]
    ClientConnect { username: String },

    #[serde(rename = "client_connected")]
    ClientConnected,

    #[serde(rename = "client_error")]
    ClientError { reason: String },
}

impl BrokerMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("BrokerMessage always serializes")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_register_round_trips_with_camel_case_install_id() {
        let json = r#"{"type":"server_register","username":"alice","installId":"u1"}"#;
        let msg = BrokerMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            BrokerMessage::ServerRegister {
                username: "alice".to_string(),
                install_id: "u1".to_string()
            }
        );
    }

    #[test]
    fn tagless_variants_serialize_with_only_the_type_field() {
        assert_eq!(
            BrokerMessage::ServerRegistered.to_json(),
            r#"{"type":"server_registered"}"#
        );
    }

    #[test]
    fn rejection_carries_its_reason() {
        let msg = BrokerMessage::ServerRejected {
            reason: "username_taken".to_string(),
        };
        assert_eq!(
            msg.to_json(),
            r#"{"type":"server_rejected","reason":"username_taken"}"#
        );
    }
}
