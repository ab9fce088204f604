//! Failure taxonomy for the control plane.

use thiserror::Error;

/// Errors surfaced at the dispatch and handshake boundaries.
///
/// Transport- and handshake-level failures close the connection; everything
/// else is recovered at the dispatch boundary and reported to the originating
/// session only.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Bad or missing credentials at handshake. The connection is rejected.
    #[error("Authentication failed for user '{0}'")]
    AuthenticationFailure(String),

    /// Authenticated but not permitted for a specific command.
    #[error("Access to '{0}' is denied")]
    AuthorizationDenied(String),

    /// No handler matches the requested command name.
    #[error("Request is not supported")]
    UnsupportedCommand,

    /// The payload could not be deserialized or parsed.
    #[error("Request could not be deserialized")]
    MalformedRequest,

    /// A command handler failed. Caught at the dispatch boundary.
    #[error("{reason}")]
    HandlerFailure { command: String, reason: String },

    /// Non-owner request while the remote shell bridge is active.
    #[error("Remote telnet session is in progress")]
    ExclusivityConflict,

    /// Duplicate add/schedule without the update flag.
    #[error("Process '{0}' is already defined or scheduled")]
    SchedulingConflict(String),

    /// Start-while-running or abort-while-idle.
    #[error("Process '{name}' is {state}")]
    ProcessStateConflict {
        name: String,
        state: &'static str,
    },

    /// Outbound send or disconnect failed.
    #[error("Transport error: {0}")]
    Transport(String),
}
