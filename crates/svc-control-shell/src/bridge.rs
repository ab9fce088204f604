//! The exclusive remote shell bridge.
//!
//! At most one shell session exists system-wide; its slot is the single
//! check-and-set point shared with command dispatch. While a session is
//! active, interpreter output lines are forwarded as status messages
//! targeted at the owning session only.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use svc_control_core::{SessionId, StatusQueue, UpdateKind};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shell bridge failures.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Remote command session is already in progress")]
    Busy,
    #[error("Password is invalid")]
    InvalidPassword,
    #[error("No remote command session is active")]
    NotActive,
    #[error("Failed to spawn command interpreter: {0}")]
    Spawn(#[from] std::io::Error),
}

struct ShellSession {
    owner: SessionId,
    input_tx: mpsc::UnboundedSender<String>,
    child: Child,
    tasks: Vec<JoinHandle<()>>,
}

/// Exclusive tunnel between one client and a local interpreter process.
pub struct ShellBridge {
    program: PathBuf,
    password: String,
    status: StatusQueue,
    active: Mutex<Option<ShellSession>>,
}

impl ShellBridge {
    #[must_use]
    pub fn new(program: PathBuf, password: impl Into<String>, status: StatusQueue) -> Self {
        Self {
            program,
            password: password.into(),
            status,
            active: Mutex::new(None),
        }
    }

    /// The owning session id while a bridge is active.
    #[must_use]
    pub fn owner(&self) -> Option<SessionId> {
        self.active.lock().unwrap().as_ref().map(|s| s.owner)
    }

    /// Establish the session: spawn the interpreter with redirected stdio and
    /// begin forwarding its output to the owner.
    ///
    /// # Errors
    /// Fails when a session is already active (regardless of requester), the
    /// password does not match, or the interpreter cannot be spawned.
    pub fn try_connect(&self, session: SessionId, password: &str) -> Result<(), ShellError> {
        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            return Err(ShellError::Busy);
        }
        if password != self.password {
            return Err(ShellError::InvalidPassword);
        }

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or(ShellError::NotActive)?;
        let stdout = child.stdout.take().ok_or(ShellError::NotActive)?;
        let stderr = child.stderr.take().ok_or(ShellError::NotActive)?;

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
        let mut tasks = Vec::with_capacity(3);

        tasks.push(tokio::spawn(async move {
            while let Some(line) = input_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() || stdin.flush().await.is_err() {
                    break;
                }
            }
        }));

        let out_status = self.status.clone();
        tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                out_status.enqueue(Some(session), UpdateKind::Information, line);
            }
        }));

        let err_status = self.status.clone();
        tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                err_status.enqueue(Some(session), UpdateKind::Alarm, line);
            }
        }));

        *active = Some(ShellSession {
            owner: session,
            input_tx,
            child,
            tasks,
        });
        tracing::info!(%session, program = %self.program.display(), "remote command session established");
        Ok(())
    }

    /// Write one line of input to the interpreter.
    ///
    /// # Errors
    /// Fails when no session is active or the caller is not its owner.
    pub fn forward(&self, session: SessionId, text: &str) -> Result<(), ShellError> {
        let active = self.active.lock().unwrap();
        match active.as_ref() {
            Some(s) if s.owner == session => s
                .input_tx
                .send(text.to_string())
                .map_err(|_| ShellError::NotActive),
            _ => Err(ShellError::NotActive),
        }
    }

    /// Terminate the interpreter and clear exclusivity. Safe to call when the
    /// owning client is already gone; returns the previous owner, if any.
    pub async fn disconnect(&self) -> Option<SessionId> {
        let session = self.active.lock().unwrap().take()?;

        let ShellSession {
            owner,
            input_tx,
            mut child,
            tasks,
        } = session;
        drop(input_tx);

        let _ = child.start_kill();
        if tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .is_err()
        {
            tracing::warn!(%owner, "command interpreter did not exit within the kill wait");
        }
        for task in tasks {
            task.abort();
        }

        tracing::info!(%owner, "remote command session terminated");
        Some(owner)
    }
}
