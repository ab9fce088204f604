//! Process registry and per-process state machine.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use svc_control_core::ControlError;
use tokio::sync::{mpsc, oneshot};

/// Lifecycle state of a managed process.
///
/// Legal transitions: `Idle → Processing → Idle` (normal completion) and
/// `Idle → Processing → Aborted → Idle` (explicit abort).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Idle,
    Processing,
    Aborted,
}

impl ProcessState {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Processing => "Processing",
            Self::Aborted => "Aborted",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Execution context handed to a job body.
pub struct JobContext {
    /// Captured or per-start override arguments.
    pub args: Vec<String>,
    /// Resolves when an abort was requested. Cooperative: a job that ignores
    /// it remains the job's responsibility, not the registry's.
    pub cancel: oneshot::Receiver<()>,
}

/// A job body: an async function over its [`JobContext`].
pub type JobFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Emitted for every state transition, in transition order.
#[derive(Debug, Clone)]
pub struct ProcessStateChanged {
    pub name: String,
    pub state: ProcessState,
}

/// Display snapshot of one descriptor.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub name: String,
    pub state: ProcessState,
    pub args: Vec<String>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_stopped_at: Option<DateTime<Utc>>,
}

struct ProcessEntry {
    name: String,
    job: JobFn,
    args: Vec<String>,
    state: ProcessState,
    last_started_at: Option<DateTime<Utc>>,
    last_stopped_at: Option<DateTime<Utc>>,
    abort_tx: Option<oneshot::Sender<()>>,
    // Bumped on every start so a stale run's completion cannot touch the
    // state of a newer run.
    generation: u64,
}

impl ProcessEntry {
    fn info(&self) -> ProcessInfo {
        ProcessInfo {
            name: self.name.clone(),
            state: self.state,
            args: self.args.clone(),
            last_started_at: self.last_started_at,
            last_stopped_at: self.last_stopped_at,
        }
    }
}

/// Registry of named background jobs. Names are case-insensitive unique.
pub struct ProcessRegistry {
    entries: Mutex<HashMap<String, ProcessEntry>>,
    events: mpsc::UnboundedSender<ProcessStateChanged>,
}

impl ProcessRegistry {
    /// Create the registry and the receiver of its state-change events.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ProcessStateChanged>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                entries: Mutex::new(HashMap::new()),
                events,
            }),
            rx,
        )
    }

    fn emit(&self, name: &str, state: ProcessState) {
        let _ = self.events.send(ProcessStateChanged {
            name: name.to_string(),
            state,
        });
    }

    /// Define a process. Returns false when the name is already taken.
    pub fn add(&self, name: &str, job: JobFn, args: Vec<String>) -> bool {
        let key = name.to_lowercase();
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(
            key,
            ProcessEntry {
                name: name.to_string(),
                job,
                args,
                state: ProcessState::Idle,
                last_started_at: None,
                last_stopped_at: None,
                abort_tx: None,
                generation: 0,
            },
        );
        true
    }

    /// Remove a process definition. The caller is responsible for
    /// unscheduling it first. Returns false when the name is unknown.
    pub fn remove(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .remove(&name.to_lowercase())
            .is_some()
    }

    /// Look up one descriptor snapshot.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ProcessInfo> {
        self.entries
            .lock()
            .unwrap()
            .get(&name.to_lowercase())
            .map(ProcessEntry::info)
    }

    /// Name-ordered snapshot of every descriptor.
    #[must_use]
    pub fn list(&self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self
            .entries
            .lock()
            .unwrap()
            .values()
            .map(ProcessEntry::info)
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Start a process on its own task.
    ///
    /// # Errors
    /// Returns [`ControlError::ProcessStateConflict`] when the process is not
    /// defined or is already `Processing`; state is left unchanged.
    pub fn start(
        self: &Arc<Self>,
        name: &str,
        override_args: Option<Vec<String>>,
    ) -> Result<(), ControlError> {
        let key = name.to_lowercase();
        let (job, args, cancel, generation) = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .get_mut(&key)
                .ok_or_else(|| ControlError::ProcessStateConflict {
                    name: name.to_string(),
                    state: "not defined",
                })?;
            if entry.state == ProcessState::Processing {
                return Err(ControlError::ProcessStateConflict {
                    name: entry.name.clone(),
                    state: "already executing",
                });
            }

            let (abort_tx, cancel) = oneshot::channel();
            entry.state = ProcessState::Processing;
            entry.last_started_at = Some(Utc::now());
            entry.abort_tx = Some(abort_tx);
            entry.generation += 1;
            self.emit(&entry.name, ProcessState::Processing);

            let args = override_args.unwrap_or_else(|| entry.args.clone());
            (Arc::clone(&entry.job), args, cancel, entry.generation)
        };

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let result = (job)(JobContext { args, cancel }).await;
            registry.on_job_finished(&key, generation, result);
        });

        Ok(())
    }

    /// Request cooperative termination of a running process. Flips state to
    /// `Aborted` immediately without waiting for the job body to observe it.
    ///
    /// # Errors
    /// Returns [`ControlError::ProcessStateConflict`] when the process is not
    /// defined or not currently `Processing`.
    pub fn abort(&self, name: &str) -> Result<(), ControlError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&name.to_lowercase()).ok_or_else(|| {
            ControlError::ProcessStateConflict {
                name: name.to_string(),
                state: "not defined",
            }
        })?;
        if entry.state != ProcessState::Processing {
            return Err(ControlError::ProcessStateConflict {
                name: entry.name.clone(),
                state: "not executing",
            });
        }

        if let Some(tx) = entry.abort_tx.take() {
            let _ = tx.send(());
        }
        entry.state = ProcessState::Aborted;
        entry.last_stopped_at = Some(Utc::now());
        self.emit(&entry.name, ProcessState::Aborted);
        Ok(())
    }

    /// Abort every `Processing` process. Returns how many were aborted.
    pub fn abort_all(&self) -> usize {
        let names: Vec<String> = self
            .list()
            .into_iter()
            .filter(|p| p.state == ProcessState::Processing)
            .map(|p| p.name)
            .collect();
        let mut aborted = 0;
        for name in &names {
            if self.abort(name).is_ok() {
                aborted += 1;
            }
        }
        aborted
    }

    fn on_job_finished(&self, key: &str, generation: u64, result: anyhow::Result<()>) {
        if let Err(e) = &result {
            tracing::warn!(process = key, "process job returned error: {e:#}");
        }

        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(key) else {
            return; // removed while running
        };
        if entry.generation != generation {
            return; // a newer run owns the state now
        }
        entry.abort_tx = None;
        match entry.state {
            ProcessState::Processing => {
                entry.state = ProcessState::Idle;
                entry.last_stopped_at = Some(Utc::now());
                self.emit(&entry.name, ProcessState::Idle);
            }
            ProcessState::Aborted => {
                entry.state = ProcessState::Idle;
                self.emit(&entry.name, ProcessState::Idle);
            }
            ProcessState::Idle => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn instant_job() -> JobFn {
        Arc::new(|_ctx| Box::pin(async { Ok(()) }))
    }

    fn gated_job(release: Arc<Notify>) -> JobFn {
        Arc::new(move |ctx| {
            let release = Arc::clone(&release);
            Box::pin(async move {
                let mut cancel = ctx.cancel;
                tokio::select! {
                    () = release.notified() => {}
                    _ = &mut cancel => {}
                }
                Ok(())
            })
        })
    }

    async fn next_event(
        rx: &mut mpsc::UnboundedReceiver<ProcessStateChanged>,
    ) -> ProcessStateChanged {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for state change")
            .expect("event channel closed")
    }

    #[test]
    fn duplicate_names_rejected_case_insensitively() {
        let (registry, _rx) = ProcessRegistry::new();
        assert!(registry.add("Backup", instant_job(), vec![]));
        assert!(!registry.add("BACKUP", instant_job(), vec![]));
        assert!(registry.find("backup").is_some());
    }

    #[test]
    fn remove_round_trip() {
        let (registry, _rx) = ProcessRegistry::new();
        assert!(registry.add("Backup", instant_job(), vec![]));
        assert!(registry.remove("backup"));
        assert!(!registry.remove("Backup"));
        assert!(registry.find("Backup").is_none());
    }

    #[tokio::test]
    async fn normal_completion_cycles_back_to_idle() {
        let (registry, mut rx) = ProcessRegistry::new();
        registry.add("Backup", instant_job(), vec![]);
        registry.start("Backup", None).unwrap();

        assert_eq!(next_event(&mut rx).await.state, ProcessState::Processing);
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Idle);
        assert_eq!(registry.find("Backup").unwrap().state, ProcessState::Idle);
    }

    #[tokio::test]
    async fn start_while_processing_is_rejected() {
        let (registry, mut rx) = ProcessRegistry::new();
        let release = Arc::new(Notify::new());
        registry.add("Backup", gated_job(Arc::clone(&release)), vec![]);

        registry.start("Backup", None).unwrap();
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Processing);

        let err = registry.start("Backup", None).unwrap_err();
        assert!(matches!(err, ControlError::ProcessStateConflict { .. }));
        assert_eq!(
            registry.find("Backup").unwrap().state,
            ProcessState::Processing
        );

        release.notify_one();
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Idle);
    }

    #[tokio::test]
    async fn abort_flips_state_then_settles_idle() {
        let (registry, mut rx) = ProcessRegistry::new();
        let release = Arc::new(Notify::new());
        registry.add("Backup", gated_job(release), vec![]);

        registry.start("Backup", None).unwrap();
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Processing);

        registry.abort("Backup").unwrap();
        assert_eq!(
            registry.find("Backup").unwrap().state,
            ProcessState::Aborted
        );
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Aborted);
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Idle);
    }

    #[tokio::test]
    async fn abort_while_idle_is_rejected() {
        let (registry, _rx) = ProcessRegistry::new();
        registry.add("Backup", instant_job(), vec![]);
        let err = registry.abort("Backup").unwrap_err();
        assert!(matches!(err, ControlError::ProcessStateConflict { .. }));
    }

    #[tokio::test]
    async fn override_args_reach_the_job() {
        let (registry, mut rx) = ProcessRegistry::new();
        let (seen_tx, seen_rx) = oneshot::channel::<Vec<String>>();
        let seen_tx = std::sync::Mutex::new(Some(seen_tx));
        let job: JobFn = Arc::new(move |ctx| {
            if let Some(tx) = seen_tx.lock().unwrap().take() {
                let _ = tx.send(ctx.args.clone());
            }
            Box::pin(async { Ok(()) })
        });

        registry.add("Backup", job, vec!["incremental".to_string()]);
        registry
            .start("Backup", Some(vec!["full".to_string()]))
            .unwrap();
        assert_eq!(seen_rx.await.unwrap(), vec!["full".to_string()]);
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Processing);
        assert_eq!(next_event(&mut rx).await.state, ProcessState::Idle);
    }
}
