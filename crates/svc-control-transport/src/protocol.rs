//! Wire protocol for client-server communication.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use svc_control_core::{ServiceResponse, traits::Credentials};

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Session-info handshake; must be the first message of a connection.
    Hello {
        client_name: String,
        machine_name: String,
        #[serde(default)]
        credentials: Option<Credentials>,
    },
    /// A command-request line.
    Command { text: String },
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// A typed service response record.
    Response {
        kind: String,
        message: String,
        attachments: Vec<Value>,
    },
    /// Pong reply.
    Pong,
}

impl From<&ServiceResponse> for ServerEnvelope {
    fn from(response: &ServiceResponse) -> Self {
        Self::Response {
            kind: response.kind.clone(),
            message: response.message.clone(),
            attachments: response.attachments.clone(),
        }
    }
}

/// Wrap raw bytes as an opaque base64 attachment value.
#[must_use]
pub fn binary_attachment(data: &[u8]) -> Value {
    json!({ "binary": BASE64.encode(data) })
}

/// Decode an opaque base64 attachment produced by [`binary_attachment`].
#[must_use]
pub fn decode_binary_attachment(value: &Value) -> Option<Vec<u8>> {
    let encoded = value.get("binary")?.as_str()?;
    BASE64.decode(encoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use svc_control_core::UpdateKind;

    #[test]
    fn hello_round_trip() {
        let msg = ClientEnvelope::Hello {
            client_name: "console".to_string(),
            machine_name: "ops-1".to_string(),
            credentials: Credentials::parse("admin:s3cur3"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"hello\""));

        let parsed: ClientEnvelope = serde_json::from_str(&json).unwrap();
        if let ClientEnvelope::Hello { credentials, .. } = parsed {
            assert_eq!(credentials.unwrap().username, "admin");
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn response_envelope_carries_attachments() {
        let response = ServiceResponse::client_status(UpdateKind::Warning, "heads up")
            .with_attachment(json!({"count": 3}));
        let envelope = ServerEnvelope::from(&response);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("UPDATECLIENTSTATUS-WARNING"));
        assert!(json.contains("\"count\":3"));
    }

    #[test]
    fn binary_attachment_round_trip() {
        let original = b"opaque payload";
        let value = binary_attachment(original);
        let decoded = decode_binary_attachment(&value).unwrap();
        assert_eq!(decoded, original);
        assert!(decode_binary_attachment(&json!("not binary")).is_none());
    }
}
