//! Control plane configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Tunables of the control plane, deserializable from any serde source.
///
/// Every field has a default, so a partial (or empty) document is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Display name of the hosting service.
    pub service_name: String,
    /// Maximum characters of one status update delivered live; longer text is
    /// clipped with a warning.
    pub max_status_updates_length: usize,
    /// Maximum status updates delivered live per one-second window.
    pub max_status_updates_frequency: usize,
    /// Bound of the request history ledger.
    pub request_history_limit: usize,
    /// Require authenticated handshakes and per-command access checks.
    pub secure_remote_interactions: bool,
    /// Advertise the `Telnet` command and allow shell bridge sessions.
    pub support_telnet_sessions: bool,
    /// Password required to establish a shell bridge session.
    pub telnet_session_password: String,
    /// Allow `Start`/`Abort`/`Processes` to operate on operating-system
    /// processes via `-system`.
    pub support_system_commands: bool,
    /// Mirror every status update to an append-only log file.
    pub log_status_updates: bool,
    /// Path of the status log; required when `log_status_updates` is set.
    pub status_log_path: Option<PathBuf>,
    /// Interpreter program for shell bridge sessions. Bare names resolve on
    /// `PATH`; unset falls back to the platform's interactive shell.
    pub shell_program: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            service_name: "ServiceHost".to_string(),
            max_status_updates_length: 8192,
            max_status_updates_frequency: 30,
            request_history_limit: 50,
            secure_remote_interactions: false,
            support_telnet_sessions: false,
            telnet_session_password: "s3cur3".to_string(),
            support_system_commands: false,
            log_status_updates: false,
            status_log_path: None,
            shell_program: None,
        }
    }
}
