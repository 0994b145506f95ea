//! Orchestrator configuration.
//!
//! Defaults are overridable through `TRIBUNAL_*` environment variables,
//! read once at startup by the server binary.

use std::time::Duration;

/// Default request-level deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-call deadline inside the request budget.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bounded retry count for transient backend failures.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Default fixed backoff between retries.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Tunables for the evaluation orchestrator and judge invoker.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Shared wall-clock deadline for one evaluation request.
    pub request_timeout: Duration,
    /// Per-judge-call deadline; the effective deadline is the minimum of
    /// this and the remaining request budget.
    pub call_timeout: Duration,
    /// Retry bound for transient backend failures (0 disables retries).
    pub max_retries: u32,
    /// Fixed backoff between retry attempts.
    pub retry_backoff: Duration,
    /// Whether policies may stop collecting once their early-decision
    /// predicate is satisfied. Conservative default: off.
    pub short_circuit: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            short_circuit: false,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from the environment, falling back to defaults for
    /// unset or unparseable variables.
    ///
    /// Recognized variables:
    /// - `TRIBUNAL_REQUEST_TIMEOUT_MS`
    /// - `TRIBUNAL_CALL_TIMEOUT_MS`
    /// - `TRIBUNAL_MAX_RETRIES`
    /// - `TRIBUNAL_RETRY_BACKOFF_MS`
    /// - `TRIBUNAL_SHORT_CIRCUIT` ("1" / "true" to enable)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_timeout: env_millis("TRIBUNAL_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout),
            call_timeout: env_millis("TRIBUNAL_CALL_TIMEOUT_MS").unwrap_or(defaults.call_timeout),
            max_retries: std::env::var("TRIBUNAL_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_backoff: env_millis("TRIBUNAL_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.retry_backoff),
            short_circuit: std::env::var("TRIBUNAL_SHORT_CIRCUIT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.short_circuit),
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
