//! Translation: backend client, per-call retry orchestration, cache and
//! text classification helpers.

pub mod cache;
pub mod normalize;
pub mod ollama;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum TranslateError {
    /// Connection refused, DNS failure, broken body.
    #[error("backend request failed: {0}")]
    Service(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("translation timeout")]
    Timeout,
    /// Response payload lacks the generated text.
    #[error("malformed backend response: {0}")]
    Parse(String),
    #[error("translation cancelled")]
    Cancelled,
}

impl TranslateError {
    /// Transport failures and non-2xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TranslateError::Service(_) | TranslateError::Status { .. } | TranslateError::Timeout
        )
    }
}

/// One translation call against a backend. Implementations never retry.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, model: &str) -> Result<String, TranslateError>;
}

/// Run `translator` with backoff on transient failures.
/// The backoff wait observes `cancel`; a call already on the wire is not interrupted.
pub async fn translate_with_retry(
    translator: &dyn Translator,
    text: &str,
    model: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<String, TranslateError> {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        match translator.translate(text, model).await {
            Ok(translated) => return Ok(translated),
            Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                let wait = policy.next_delay(attempt);
                warn!(
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "translate call failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails with the given error for the first `failures` calls.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        parse_error: bool,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                parse_error: false,
            }
        }
    }

    #[async_trait]
    impl Translator for Flaky {
        async fn translate(&self, text: &str, _model: &str) -> Result<String, TranslateError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                if self.parse_error {
                    return Err(TranslateError::Parse("no response field".into()));
                }
                return Err(TranslateError::Service("connection refused".into()));
            }
            Ok(format!("zh:{text}"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let flaky = Flaky::new(2);
        let start = tokio::time::Instant::now();
        let out = translate_with_retry(
            &flaky,
            "hi",
            "m1",
            &RetryPolicy::new(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(out, "zh:hi");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let flaky = Flaky::new(u32::MAX);
        let err = translate_with_retry(
            &flaky,
            "hi",
            "m1",
            &RetryPolicy::new(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TranslateError::Service(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn parse_errors_are_not_retried() {
        let mut flaky = Flaky::new(1);
        flaky.parse_error = true;
        let err = translate_with_retry(
            &flaky,
            "hi",
            "m1",
            &RetryPolicy::new(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TranslateError::Parse(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let flaky = Arc::new(Flaky::new(u32::MAX));
        let cancel = CancellationToken::new();
        let task = {
            let flaky = Arc::clone(&flaky);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                translate_with_retry(flaky.as_ref(), "hi", "m1", &RetryPolicy::new(3), &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, TranslateError::Cancelled));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }
}
