//! Flood-limited status broadcast queue.
//!
//! All client-visible status text funnels through one [`StatusQueue`]. A
//! single consumer drains it in FIFO order, applies per-second and per-message
//! flood control, and hands surviving updates to a [`StatusSink`] for
//! delivery. The optional status log sees every update, full length,
//! regardless of what live delivery suppressed.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};

use crate::{SessionId, UpdateKind, traits::Enableable};

/// One queued status update.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    /// Target session, or `None` to broadcast to every registered session.
    pub target: Option<SessionId>,
    pub kind: UpdateKind,
    pub message: String,
}

/// Delivery side implemented by the control plane: per-target send,
/// broadcast fan-out, and shell-exclusivity suppression.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn deliver(&self, target: Option<SessionId>, kind: UpdateKind, text: &str);
}

/// Rolling one-second admission window.
///
/// While the window is open only the first `max_per_second` updates are
/// admitted; once more than a second has elapsed the window resets and the
/// counter restarts at 1.
#[derive(Debug)]
pub struct FloodGate {
    max_per_second: usize,
    window_opened: Option<Instant>,
    admitted: usize,
}

impl FloodGate {
    #[must_use]
    pub const fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second,
            window_opened: None,
            admitted: 0,
        }
    }

    /// Whether an update arriving at `now` may be delivered live.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.window_opened {
            Some(opened) if now.duration_since(opened) <= Duration::from_secs(1) => {
                if self.admitted < self.max_per_second {
                    self.admitted += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                self.window_opened = Some(now);
                self.admitted = 1;
                true
            }
        }
    }
}

/// Timestamped append-only line log for status updates.
pub struct StatusLog {
    file: Mutex<tokio::fs::File>,
}

impl StatusLog {
    /// Open (or create) the log file for appending.
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one timestamped line.
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    pub async fn write_line(&self, text: &str) -> std::io::Result<()> {
        let stamped = format!(
            "[{}] {text}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
        );
        let mut file = self.file.lock().await;
        file.write_all(stamped.as_bytes()).await?;
        file.flush().await
    }
}

/// Producer handle of the status queue. Cheap to clone.
#[derive(Clone)]
pub struct StatusQueue {
    tx: mpsc::UnboundedSender<StatusUpdate>,
    enabled: Arc<AtomicBool>,
}

impl StatusQueue {
    /// Create the queue and its single consumer.
    #[must_use]
    pub fn new(max_per_second: usize, max_length: usize) -> (Self, StatusConsumer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let enabled = Arc::new(AtomicBool::new(true));
        let queue = Self { tx, enabled };
        let consumer = StatusConsumer {
            rx,
            gate: FloodGate::new(max_per_second),
            max_length,
            log: None,
        };
        (queue, consumer)
    }

    /// Enqueue a status update. Dropped silently while the queue is disabled
    /// or after the consumer has shut down.
    pub fn enqueue(&self, target: Option<SessionId>, kind: UpdateKind, message: impl Into<String>) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let _ = self.tx.send(StatusUpdate {
            target,
            kind,
            message: message.into(),
        });
    }
}

impl Enableable for StatusQueue {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Single consumer of the status queue. Exactly one drain runs at a time;
/// submission order is preserved.
pub struct StatusConsumer {
    rx: mpsc::UnboundedReceiver<StatusUpdate>,
    gate: FloodGate,
    max_length: usize,
    log: Option<StatusLog>,
}

impl StatusConsumer {
    /// Attach the optional status log.
    pub fn set_log(&mut self, log: StatusLog) {
        self.log = Some(log);
    }

    /// Drain batches until every producer handle is dropped.
    pub async fn run(mut self, sink: Arc<dyn StatusSink>) {
        while self.run_once(sink.as_ref()).await {}
    }

    /// Drain one batch. Returns false once the channel is closed.
    pub async fn run_once(&mut self, sink: &dyn StatusSink) -> bool {
        let Some(first) = self.rx.recv().await else {
            return false;
        };
        let mut batch = vec![first];
        while let Ok(next) = self.rx.try_recv() {
            batch.push(next);
        }
        self.process_batch(&batch, sink).await;
        true
    }

    async fn process_batch(&mut self, batch: &[StatusUpdate], sink: &dyn StatusSink) {
        let mut suppressed: usize = 0;

        for item in batch {
            if self.gate.admit(Instant::now()) {
                let length = item.message.chars().count();
                if length <= self.max_length {
                    sink.deliver(item.target, item.kind, &item.message).await;
                } else {
                    let clipped: String = item.message.chars().take(self.max_length).collect();
                    sink.deliver(item.target, item.kind, &clipped).await;
                    sink.deliver(
                        item.target,
                        UpdateKind::Warning,
                        &format!(
                            "Suppressed {} status update character(s) from being displayed to avoid flooding.",
                            length - self.max_length
                        ),
                    )
                    .await;
                }
            } else {
                suppressed += 1;
            }

            // The log sees everything, untruncated, suppressed or not.
            if let Some(log) = &self.log {
                if let Err(e) = log.write_line(&item.message).await {
                    tracing::error!("Error occurred while logging status update - {e}");
                    self.log = None;
                }
            }
        }

        if suppressed > 0 {
            sink.deliver(
                None,
                UpdateKind::Warning,
                &format!(
                    "Suppressed {suppressed} status update(s) from being displayed to avoid flooding."
                ),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<(Option<SessionId>, UpdateKind, String)>>,
    }

    #[async_trait]
    impl StatusSink for RecordingSink {
        async fn deliver(&self, target: Option<SessionId>, kind: UpdateKind, text: &str) {
            self.events
                .lock()
                .unwrap()
                .push((target, kind, text.to_string()));
        }
    }

    #[test]
    fn flood_gate_admits_first_n_per_window() {
        let mut gate = FloodGate::new(3);
        let t0 = Instant::now();
        let admitted: Vec<bool> = (0..5).map(|_| gate.admit(t0)).collect();
        assert_eq!(admitted, vec![true, true, true, false, false]);

        // Window reset restarts the counter at 1.
        let t1 = t0 + Duration::from_millis(1500);
        assert!(gate.admit(t1));
        assert!(gate.admit(t1));
        assert!(gate.admit(t1));
        assert!(!gate.admit(t1));
    }

    #[tokio::test]
    async fn over_limit_batch_delivers_n_plus_one_suppression_warning() {
        let (queue, mut consumer) = StatusQueue::new(2, 1024);
        let sink = RecordingSink::default();
        let target = uuid::Uuid::new_v4();

        for i in 0..5 {
            queue.enqueue(Some(target), UpdateKind::Information, format!("update {i}"));
        }
        assert!(consumer.run_once(&sink).await);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].2, "update 0");
        assert_eq!(events[1].2, "update 1");
        assert_eq!(events[2].0, None);
        assert_eq!(events[2].1, UpdateKind::Warning);
        assert!(events[2].2.contains("Suppressed 3 status update(s)"));
    }

    #[tokio::test]
    async fn long_message_is_clipped_with_character_count_warning() {
        let (queue, mut consumer) = StatusQueue::new(10, 4);
        let sink = RecordingSink::default();

        queue.enqueue(None, UpdateKind::Information, "abcdefghij");
        assert!(consumer.run_once(&sink).await);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].2, "abcd");
        assert_eq!(events[1].1, UpdateKind::Warning);
        assert!(events[1].2.contains("Suppressed 6 status update character(s)"));
    }

    #[tokio::test]
    async fn log_sees_suppressed_and_untruncated_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.log");

        let (queue, mut consumer) = StatusQueue::new(1, 4);
        consumer.set_log(StatusLog::open(&path).await.unwrap());
        let sink = RecordingSink::default();

        queue.enqueue(None, UpdateKind::Information, "first long line");
        queue.enqueue(None, UpdateKind::Information, "second suppressed");
        assert!(consumer.run_once(&sink).await);

        let logged = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(logged.contains("first long line"));
        assert!(logged.contains("second suppressed"));

        // Live delivery saw the clipped first message only (plus warnings).
        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].2, "firs");
    }

    #[tokio::test]
    async fn disabled_queue_drops_updates() {
        let (queue, mut consumer) = StatusQueue::new(10, 1024);
        let sink = RecordingSink::default();

        queue.set_enabled(false);
        queue.enqueue(None, UpdateKind::Information, "dropped");
        queue.set_enabled(true);
        queue.enqueue(None, UpdateKind::Information, "kept");
        assert!(consumer.run_once(&sink).await);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].2, "kept");
    }

    #[tokio::test]
    async fn per_target_order_is_preserved() {
        let (queue, mut consumer) = StatusQueue::new(100, 1024);
        let sink = RecordingSink::default();
        let target = uuid::Uuid::new_v4();

        for i in 0..10 {
            queue.enqueue(Some(target), UpdateKind::Information, format!("{i}"));
        }
        assert!(consumer.run_once(&sink).await);

        let events = sink.events.lock().unwrap();
        let texts: Vec<&str> = events.iter().map(|e| e.2.as_str()).collect();
        assert_eq!(texts, (0..10).map(|i| i.to_string()).collect::<Vec<_>>());
    }
}
