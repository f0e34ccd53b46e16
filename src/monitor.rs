//! Clipboard polling loop on a dedicated OS thread.
//! Each tick reads the clipboard and hands qualifying changes to the scheduler
//! through a channel; it never touches scheduler state directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clipboard::Clipboard;
use crate::scheduler::PipelineEvent;
use crate::supervisor::ServiceState;
use crate::translate::normalize::needs_translation;

/// Clipboard text as observed on one tick.
#[derive(Debug, Clone)]
pub struct ClipboardSnapshot {
    pub text: String,
    pub observed_at: Instant,
}

/// What the scheduler publishes for the poller to gate on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorGate {
    pub running: bool,
    pub model_selected: bool,
}

pub struct ClipboardMonitor {
    clipboard: Arc<dyn Clipboard>,
    gate: watch::Receiver<MonitorGate>,
    service: watch::Receiver<ServiceState>,
    last_observed: String,
    read_failing: bool,
}

impl ClipboardMonitor {
    pub fn new(
        clipboard: Arc<dyn Clipboard>,
        gate: watch::Receiver<MonitorGate>,
        service: watch::Receiver<ServiceState>,
    ) -> Self {
        Self {
            clipboard,
            gate,
            service,
            last_observed: String::new(),
            read_failing: false,
        }
    }

    /// One poll. Returns the snapshot to submit, if any.
    ///
    /// A changed value is marked as seen even when it is native-script text,
    /// so the same native text is not re-examined on every tick.
    pub fn tick(&mut self) -> Option<ClipboardSnapshot> {
        let gate = self.gate.borrow().clone();
        if !gate.running || !gate.model_selected || *self.service.borrow() != ServiceState::Up {
            return None;
        }

        let raw = match self.clipboard.read() {
            Ok(raw) => {
                if self.read_failing {
                    info!("clipboard readable again");
                    self.read_failing = false;
                }
                raw
            }
            Err(e) => {
                if !self.read_failing {
                    warn!(error = %e, "clipboard read failed");
                    self.read_failing = true;
                }
                return None;
            }
        };

        let text = raw.trim();
        if text.is_empty() || text == self.last_observed {
            return None;
        }
        self.last_observed = text.to_string();

        if !needs_translation(text) {
            debug!(chars = text.chars().count(), "native-script clipboard text, skipping");
            return None;
        }

        Some(ClipboardSnapshot {
            text: text.to_string(),
            observed_at: Instant::now(),
        })
    }

    /// Run the poll loop on its own thread until stopped or the scheduler goes away.
    pub fn spawn(
        mut self,
        interval: Duration,
        tx: mpsc::UnboundedSender<PipelineEvent>,
    ) -> std::io::Result<MonitorHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&shutdown);

        let join = std::thread::Builder::new()
            .name("clipboard-monitor".into())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "clipboard monitor started");
                while !stop_flag.load(Ordering::Relaxed) {
                    if let Some(snapshot) = self.tick() {
                        debug!(chars = snapshot.text.chars().count(), "clipboard change");
                        if tx.send(PipelineEvent::Candidate(snapshot)).is_err() {
                            info!("scheduler gone, exiting clipboard monitor");
                            break;
                        }
                    }
                    std::thread::sleep(interval);
                }
                info!("clipboard monitor stopped");
            })?;

        Ok(MonitorHandle {
            shutdown,
            join: Some(join),
        })
    }
}

pub struct MonitorHandle {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop polling and wait for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
