//! Typed outbound response records.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Severity category of a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Routine informational text.
    Information,
    /// Something worth attention, service still healthy.
    Warning,
    /// A failure was reported to the originating session.
    Alarm,
}

impl UpdateKind {
    /// Upper-case tag used in response type strings.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Information => "INFORMATION",
            Self::Warning => "WARNING",
            Self::Alarm => "ALARM",
        }
    }
}

/// A typed response record sent back to clients: a type tag, a text message,
/// and an ordered list of opaque attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Response type tag, e.g. `UPDATECLIENTSTATUS-INFORMATION`.
    pub kind: String,
    /// Human-readable message text.
    #[serde(default)]
    pub message: String,
    /// Opaque structured attachments for programmatic consumers.
    #[serde(default)]
    pub attachments: Vec<Value>,
}

impl ServiceResponse {
    /// Create a response with just a type tag.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: String::new(),
            attachments: Vec::new(),
        }
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Append an attachment.
    #[must_use]
    pub fn with_attachment(mut self, attachment: Value) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Status text delivered by the broadcast queue.
    #[must_use]
    pub fn client_status(kind: UpdateKind, message: impl Into<String>) -> Self {
        Self::new(format!("UPDATECLIENTSTATUS-{}", kind.tag())).with_message(message)
    }

    /// Handshake accepted.
    #[must_use]
    pub fn authentication_success() -> Self {
        Self::new("AuthenticationSuccess")
    }

    /// Handshake rejected; sent just before the connection is closed.
    #[must_use]
    pub fn authentication_failure() -> Self {
        Self::new("AuthenticationFailure")
    }

    /// A managed process changed state.
    #[must_use]
    pub fn process_state_changed(process_name: &str, state: &str) -> Self {
        Self::new("PROCESSSTATECHANGED")
            .with_attachment(json!({ "name": process_name, "state": state }))
    }

    /// The hosting service changed state.
    #[must_use]
    pub fn service_state_changed(service_name: &str, state: &str) -> Self {
        Self::new("SERVICESTATECHANGED")
            .with_attachment(json!({ "name": service_name, "state": state }))
    }

    /// Shell bridge established or terminated.
    #[must_use]
    pub fn telnet_session(established: bool) -> Self {
        Self::new("TelnetSession").with_message(if established {
            "Established"
        } else {
            "Terminated"
        })
    }

    /// Structured success/failure result for commands that support
    /// machine-readable consumption, sent alongside the status message.
    #[must_use]
    pub fn actionable(command: &str, success: bool, attachment: Option<Value>) -> Self {
        let verdict = if success { "Success" } else { "Failure" };
        let mut response = Self::new(format!("{command}:{verdict}"));
        if let Some(attachment) = attachment {
            response = response.with_attachment(attachment);
        }
        response
    }
}
