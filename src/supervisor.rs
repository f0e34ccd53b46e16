//! Backend supervision: reachability probe, best-effort launch, model listing.
//! State machine: Unknown -> probe -> Up | Down. On Down the backend is launched
//! and re-probed after a settle delay; the whole cycle is retried with backoff.

use std::io::ErrorKind;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unknown,
    Up,
    Down,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Unknown => write!(f, "Unknown"),
            ServiceState::Up => write!(f, "Up"),
            ServiceState::Down => write!(f, "Down"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Probe-and-launch retries exhausted.
    #[error("backend unavailable after {attempts} attempts")]
    Unavailable { attempts: u32 },
    #[error("backend executable not found: {0}")]
    ExecutableMissing(String),
    #[error("backend launch failed: {0}")]
    Launch(String),
    #[error("model list command failed: {0}")]
    ModelList(String),
    #[error("malformed model list output: {0}")]
    Parse(String),
}

impl ServiceError {
    /// Missing executable is never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::ExecutableMissing(_))
    }
}

/// The operations the supervisor needs from a backend installation.
#[async_trait]
pub trait Backend: Send + Sync {
    /// True when the root endpoint answered at all.
    async fn probe(&self) -> bool;
    /// Start the backend detached. Must return promptly.
    async fn launch(&self) -> Result<(), ServiceError>;
    async fn list_models(&self) -> Result<Vec<String>, ServiceError>;
}

/// Model identifiers from `ollama list` output: header dropped, first token per non-blank line.
pub fn parse_model_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Local Ollama install reached over HTTP and driven through its CLI.
pub struct OllamaBackend {
    http: reqwest::Client,
    base_url: String,
    program: String,
    /// Last `serve` process we started, so we don't pile up duplicates.
    child: Mutex<Option<Child>>,
}

impl OllamaBackend {
    pub fn new(config: &PipelineConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .map_err(|e| ServiceError::Launch(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            program: config.backend_program.clone(),
            child: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn probe(&self) -> bool {
        match self.http.get(format!("{}/", self.base_url)).send().await {
            Ok(resp) => {
                debug!(status = resp.status().as_u16(), "probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "probe failed");
                false
            }
        }
    }

    async fn launch(&self) -> Result<(), ServiceError> {
        let mut guard = self.child.lock();
        if let Some(child) = guard.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                debug!(pid = child.id(), "backend process still running, not relaunching");
                return Ok(());
            }
        }

        let mut command = Command::new(&self.program);
        command
            .arg("serve")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // Own process group: a Ctrl+C on our terminal must not take the backend down.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ServiceError::ExecutableMissing(self.program.clone()),
                _ => ServiceError::Launch(e.to_string()),
            })?;
        info!(pid = child.id(), program = %self.program, "backend launched");
        *guard = Some(child);
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        let program = self.program.clone();
        let output = tokio::task::spawn_blocking(move || Command::new(&program).arg("list").output())
            .await
            .map_err(|e| ServiceError::ModelList(format!("list task panicked: {e}")))?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ServiceError::ExecutableMissing(self.program.clone()),
                _ => ServiceError::ModelList(e.to_string()),
            })?;

        if !output.status.success() {
            return Err(ServiceError::ModelList(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let stdout =
            String::from_utf8(output.stdout).map_err(|e| ServiceError::Parse(e.to_string()))?;
        Ok(parse_model_list(&stdout))
    }
}

pub struct ServiceSupervisor {
    backend: Arc<dyn Backend>,
    state_tx: watch::Sender<ServiceState>,
    policy: RetryPolicy,
    settle_delay: Duration,
    metrics: Arc<MetricsRegistry>,
    /// Serializes overlapping recheck requests.
    cycle: tokio::sync::Mutex<()>,
}

impl ServiceSupervisor {
    pub fn new(
        backend: Arc<dyn Backend>,
        policy: RetryPolicy,
        settle_delay: Duration,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ServiceState::Unknown);
        Self {
            backend,
            state_tx,
            policy,
            settle_delay,
            metrics,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, next: ServiceState) {
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "service_state");
        }
    }

    /// Single reachability check; never launches anything.
    pub async fn probe(&self) -> ServiceState {
        let span = self.metrics.span(metric_names::PROBE);
        let up = self.backend.probe().await;
        span.finish();
        let state = if up { ServiceState::Up } else { ServiceState::Down };
        self.set_state(state);
        state
    }

    /// Probe, launching and re-probing on failure, with backoff between cycles.
    /// Leaves the state Down on error; nothing retries until the next call.
    pub async fn ensure_available(&self) -> Result<(), ServiceError> {
        let _cycle = self.cycle.lock().await;
        let mut attempt: u32 = 0;

        loop {
            if self.probe().await == ServiceState::Up {
                return Ok(());
            }
            warn!(attempt, "backend not reachable, launching");

            match self.backend.launch().await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "cannot launch backend");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "backend launch failed"),
            }

            tokio::time::sleep(self.settle_delay).await;
            if self.probe().await == ServiceState::Up {
                info!(attempt, "backend up after launch");
                return Ok(());
            }

            if !self.policy.should_retry(attempt) {
                error!(attempts = attempt + 1, "backend unavailable, giving up");
                return Err(ServiceError::Unavailable {
                    attempts: attempt + 1,
                });
            }
            let wait = self.policy.next_delay(attempt);
            warn!(attempt, wait_ms = wait.as_millis() as u64, "backend still down, retrying");
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
        let models = self.backend.list_models().await?;
        info!(count = models.len(), "models listed");
        Ok(models)
    }
}
