//! Registry of connected administrative clients.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use svc_control_core::{
    ControlError, SessionId,
    traits::{ClientHello, Credentials, Principal, SecurityProvider},
};

/// A connected, handshake-completed client.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSession {
    pub id: SessionId,
    pub principal: Principal,
    pub client_name: String,
    pub machine_name: String,
    pub connected_at: DateTime<Utc>,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

/// Tracks connected clients and their authenticated identity.
///
/// All mutations go through one mutex; broadcast iteration always works over
/// a [`list`](Self::list) snapshot so sends are never blocked by registry
/// mutation. At most one session exists per connection id.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, ClientSession>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Record a new transport connection. The session itself is created by
    /// the first payload, which is always treated as a handshake.
    pub fn on_connected(&self, id: SessionId) {
        tracing::debug!(%id, "remote client connected, awaiting handshake");
    }

    /// Resolve the handshake payload into a registered session.
    ///
    /// When security is not required the connection is accepted
    /// unconditionally; otherwise the embedded credentials must resolve to a
    /// principal or the handshake fails and the caller closes the connection.
    ///
    /// # Errors
    /// Returns [`ControlError::AuthenticationFailure`] when required
    /// credentials are missing or invalid.
    pub fn handshake(
        &self,
        id: SessionId,
        hello: ClientHello,
        security: &dyn SecurityProvider,
        security_required: bool,
    ) -> Result<ClientSession, ControlError> {
        let resolved = security.authenticate(hello.credentials.as_ref());

        let principal = if security_required {
            match resolved {
                Some(p) if p.authenticated => p,
                _ => {
                    let user = hello
                        .credentials
                        .as_ref()
                        .map_or("<missing>", |c| c.username.as_str());
                    tracing::warn!(%id, user, "remote client connection rejected");
                    return Err(ControlError::AuthenticationFailure(user.to_string()));
                }
            }
        } else {
            resolved.unwrap_or_else(Principal::anonymous)
        };

        let session = ClientSession {
            id,
            principal,
            client_name: hello.client_name,
            machine_name: hello.machine_name,
            connected_at: Utc::now(),
            credentials: hello.credentials,
        };

        self.sessions.lock().unwrap().insert(id, session.clone());
        tracing::info!(
            %id,
            user = session.principal.name,
            machine = session.machine_name,
            "remote client registered"
        );
        Ok(session)
    }

    /// Look up a registered session by connection id.
    #[must_use]
    pub fn find(&self, id: SessionId) -> Option<ClientSession> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Remove a session on disconnect, returning it if it was registered.
    pub fn remove(&self, id: SessionId) -> Option<ClientSession> {
        self.sessions.lock().unwrap().remove(&id)
    }

    /// Point-in-time snapshot of every registered session.
    #[must_use]
    pub fn list(&self) -> Vec<ClientSession> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct PasswordCheck;

    impl SecurityProvider for PasswordCheck {
        fn authenticate(&self, credentials: Option<&Credentials>) -> Option<Principal> {
            let creds = credentials?;
            (creds.password == "s3cur3").then(|| Principal {
                name: creds.username.clone(),
                authenticated: true,
            })
        }

        fn is_resource_securable(&self, _command: &str) -> bool {
            true
        }

        fn is_resource_accessible(&self, _principal: &Principal, _command: &str) -> bool {
            true
        }
    }

    fn hello(credentials: Option<Credentials>) -> ClientHello {
        ClientHello {
            client_name: "console".to_string(),
            machine_name: "ops-1".to_string(),
            credentials,
        }
    }

    #[test]
    fn insecure_mode_accepts_anonymous() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let session = registry
            .handshake(id, hello(None), &PasswordCheck, false)
            .unwrap();
        assert_eq!(session.principal.name, "anonymous");
        assert!(registry.find(id).is_some());
    }

    #[test]
    fn secure_mode_rejects_bad_credentials() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let creds = Credentials::parse("admin:wrong");
        let err = registry
            .handshake(id, hello(creds), &PasswordCheck, true)
            .unwrap_err();
        assert!(matches!(err, ControlError::AuthenticationFailure(_)));
        assert!(registry.find(id).is_none());
    }

    #[test]
    fn secure_mode_registers_valid_principal() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        let creds = Credentials::parse("admin:s3cur3");
        let session = registry
            .handshake(id, hello(creds), &PasswordCheck, true)
            .unwrap();
        assert!(session.principal.authenticated);
        assert_eq!(session.principal.name, "admin");
    }

    #[test]
    fn one_session_per_connection_id() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry
            .handshake(id, hello(None), &PasswordCheck, false)
            .unwrap();
        registry
            .handshake(id, hello(None), &PasswordCheck, false)
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_on_disconnect() {
        let registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry
            .handshake(id, hello(None), &PasswordCheck, false)
            .unwrap();
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }
}
