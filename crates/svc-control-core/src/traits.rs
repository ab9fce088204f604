//! Collaborator seams consumed by the control plane.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ControlError, SessionId, response::ServiceResponse};

/// Credentials embedded in a client handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Parse the `"user:password"` form carried by handshake payloads.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (username, password) = text.split_once(':')?;
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Resolved identity of a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub authenticated: bool,
}

impl Principal {
    /// The principal used when security is not required.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            authenticated: false,
        }
    }
}

/// Session-info record sent as the first payload of every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    /// Display name of the connecting client application.
    pub client_name: String,
    /// Host the client is connecting from.
    pub machine_name: String,
    /// Optional embedded credentials.
    #[serde(default)]
    pub credentials: Option<Credentials>,
}

/// Deserialized inbound payload, classified by the transport.
#[derive(Debug, Clone)]
pub enum ClientPayload {
    /// Session-info handshake. Only valid as the first payload.
    Hello(ClientHello),
    /// A command-request line.
    Command(String),
}

/// Authentication and authorization collaborator.
pub trait SecurityProvider: Send + Sync {
    /// Resolve a principal from handshake credentials.
    fn authenticate(&self, credentials: Option<&Credentials>) -> Option<Principal>;

    /// Whether the named command is subject to access checks at all.
    fn is_resource_securable(&self, command: &str) -> bool;

    /// Whether the principal may invoke the named command.
    fn is_resource_accessible(&self, principal: &Principal, command: &str) -> bool;

    /// Reload any cached cryptographic material.
    ///
    /// # Errors
    /// Returns an error when the cache could not be refreshed.
    fn reload_crypto_cache(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Outbound side of the transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a response record to one connection.
    ///
    /// # Errors
    /// Returns [`ControlError::Transport`] when the connection is gone.
    async fn send_to(&self, id: SessionId, response: &ServiceResponse) -> Result<(), ControlError>;

    /// Close one connection.
    async fn disconnect(&self, id: SessionId);
}

/// Capability trait for components that participate in pause/resume.
///
/// Pause snapshots each component's own enabled state so that a component
/// disabled before a pause remains disabled after resume.
pub trait Enableable: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_parse_user_password_form() {
        let creds = Credentials::parse("admin:hunter2").unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "hunter2");
        assert!(Credentials::parse("no-separator").is_none());
    }

    #[test]
    fn hello_deserializes_without_credentials() {
        let hello: ClientHello =
            serde_json::from_str(r#"{"client_name":"console","machine_name":"ops-1"}"#).unwrap();
        assert!(hello.credentials.is_none());
    }
}
