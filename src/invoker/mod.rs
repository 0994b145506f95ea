//! Judge invoker: one backend call under a hard deadline.
//!
//! Every exit path returns a [`JudgeOutcome`] — completed, timed out, or
//! failed. Nothing escapes this boundary, so the orchestrator can never be
//! blocked indefinitely by a malfunctioning judge.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::backend::EvaluationBackend;
use crate::config::OrchestratorConfig;
use crate::types::{Judge, JudgeOutcome};

/// Wraps a backend with timeout and bounded-retry semantics for a single
/// judge call.
#[derive(Debug, Clone)]
pub struct JudgeInvoker {
    backend: Arc<dyn EvaluationBackend>,
    max_retries: u32,
    retry_backoff: Duration,
}

impl JudgeInvoker {
    pub fn new(backend: Arc<dyn EvaluationBackend>, config: &OrchestratorConfig) -> Self {
        Self {
            backend,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        }
    }

    /// Evaluate `content` with `judge`, never running past `deadline`.
    ///
    /// Transient backend failures are retried up to the configured bound
    /// with a fixed backoff, as long as budget remains. Timeouts return
    /// immediately as `timed_out`; exhausted retries, or a transient
    /// failure with too little budget left to back off, return `failed`
    /// with the last backend error.
    pub async fn evaluate(
        &self,
        judge: &Judge,
        content: &serde_json::Value,
        deadline: Instant,
    ) -> JudgeOutcome {
        let started = Instant::now();
        let elapsed_ms = |started: Instant| started.elapsed().as_millis() as u64;
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return JudgeOutcome::timed_out(&judge.id, elapsed_ms(started));
            }

            match tokio::time::timeout(remaining, self.backend.call(judge, content)).await {
                Ok(Ok(verdict)) => {
                    log::debug!(
                        "Judge {} completed in {}ms (attempt {})",
                        judge.id,
                        elapsed_ms(started),
                        attempt + 1
                    );
                    return JudgeOutcome::completed(&judge.id, verdict, elapsed_ms(started));
                }
                Ok(Err(err)) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "Judge {} transient failure (attempt {}): {}; retrying",
                        judge.id,
                        attempt,
                        err
                    );
                    // Backoff must also respect the deadline. The backend
                    // error, not the clock, is the terminal cause here.
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if self.retry_backoff >= remaining {
                        return JudgeOutcome::failed(&judge.id, err.to_string(), elapsed_ms(started));
                    }
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Ok(Err(err)) => {
                    log::warn!("Judge {} failed: {}", judge.id, err);
                    return JudgeOutcome::failed(&judge.id, err.to_string(), elapsed_ms(started));
                }
                Err(_elapsed) => {
                    log::warn!("Judge {} hit its deadline", judge.id);
                    return JudgeOutcome::timed_out(&judge.id, elapsed_ms(started));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::errors::BackendError;
    use crate::types::{OutcomeStatus, Verdict};

    fn judge() -> Judge {
        Judge {
            id: "j1".to_string(),
            name: "J1".to_string(),
            rubric: "r".to_string(),
            model: "m".to_string(),
            endpoint: "https://example.com".to_string(),
            weight: 1.0,
            enabled: true,
        }
    }

    fn config(max_retries: u32, backoff_ms: u64) -> OrchestratorConfig {
        OrchestratorConfig {
            max_retries,
            retry_backoff: Duration::from_millis(backoff_ms),
            ..OrchestratorConfig::default()
        }
    }

    /// Backend that never answers.
    #[derive(Debug)]
    struct HangingBackend;

    #[async_trait]
    impl EvaluationBackend for HangingBackend {
        async fn call(
            &self,
            _judge: &Judge,
            _content: &serde_json::Value,
        ) -> Result<Verdict, BackendError> {
            futures::future::pending().await
        }
    }

    /// Backend failing transiently `failures` times, then succeeding.
    #[derive(Debug)]
    struct FlakyBackend {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EvaluationBackend for FlakyBackend {
        async fn call(
            &self,
            _judge: &Judge,
            _content: &serde_json::Value,
        ) -> Result<Verdict, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(BackendError::Transport {
                    message: "connection reset".to_string(),
                })
            } else {
                Ok(Verdict {
                    label: Some("pass".to_string()),
                    score: None,
                    rationale: String::new(),
                })
            }
        }
    }

    #[tokio::test]
    async fn hanging_backend_times_out_within_margin() {
        let invoker = JudgeInvoker::new(Arc::new(HangingBackend), &config(1, 50));
        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_secs(1);

        let outcome = invoker
            .evaluate(&judge(), &serde_json::json!("text"), deadline)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::TimedOut);
        assert!(
            started.elapsed() <= Duration::from_millis(1200),
            "timed out too late: {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let backend = FlakyBackend {
            failures: 1,
            calls: AtomicU32::new(0),
        };
        let invoker = JudgeInvoker::new(Arc::new(backend), &config(1, 10));
        let deadline = Instant::now() + Duration::from_secs(5);

        let outcome = invoker
            .evaluate(&judge(), &serde_json::json!("text"), deadline)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Completed);
        assert_eq!(outcome.label(), Some("pass"));
    }

    #[tokio::test]
    async fn exhausted_retries_return_failed_with_last_error() {
        let backend = FlakyBackend {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let invoker = JudgeInvoker::new(Arc::new(backend), &config(1, 10));
        let deadline = Instant::now() + Duration::from_secs(5);

        let outcome = invoker
            .evaluate(&judge(), &serde_json::json!("text"), deadline)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn transient_failure_without_backoff_budget_is_failed_not_timed_out() {
        // Backoff (5s) dwarfs the remaining budget (200ms), so the retry
        // is abandoned; the backend error stays the terminal cause.
        let backend = FlakyBackend {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let invoker = JudgeInvoker::new(Arc::new(backend), &config(3, 5_000));
        let deadline = Instant::now() + Duration::from_millis(200);

        let outcome = invoker
            .evaluate(&judge(), &serde_json::json!("text"), deadline)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        #[derive(Debug)]
        struct BadReplyBackend {
            calls: AtomicU32,
        }

        #[async_trait]
        impl EvaluationBackend for BadReplyBackend {
            async fn call(
                &self,
                _judge: &Judge,
                _content: &serde_json::Value,
            ) -> Result<Verdict, BackendError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::InvalidResponse {
                    message: "no JSON".to_string(),
                })
            }
        }

        let backend = Arc::new(BadReplyBackend {
            calls: AtomicU32::new(0),
        });
        let invoker = JudgeInvoker::new(backend.clone(), &config(3, 10));
        let deadline = Instant::now() + Duration::from_secs(5);

        let outcome = invoker
            .evaluate(&judge(), &serde_json::json!("text"), deadline)
            .await;

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
