//! Error taxonomy for the evaluation engine.
//!
//! Only resolution and persistence failures abort a request; individual
//! judge malfunctions are absorbed into the outcome record and never
//! surface here.

use thiserror::Error;

/// Fatal resolution failures, surfaced immediately and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// The requested assembly does not exist.
    #[error("Assembly not found: {id}")]
    AssemblyNotFound { id: String },

    /// The requested judge does not exist.
    #[error("Judge not found: {id}")]
    JudgeNotFound { id: String },

    /// An assembly references a judge id that does not exist.
    #[error("Assembly {assembly_id} references unknown judge: {judge_id}")]
    MemberNotFound {
        assembly_id: String,
        judge_id: String,
    },

    /// An assembly lists the same judge more than once.
    #[error("Assembly {assembly_id} lists judge {judge_id} more than once")]
    DuplicateMember {
        assembly_id: String,
        judge_id: String,
    },

    /// The target judge or assembly is disabled.
    #[error("Target is disabled: {id}")]
    Disabled { id: String },

    /// No enabled judges remain after filtering.
    #[error("Assembly resolves to zero enabled judges: {id}")]
    EmptyAssembly { id: String },

    /// The assembly declares a custom policy with no registered handler.
    #[error("Unknown aggregation policy: {name}")]
    UnknownPolicy { name: String },
}

/// Failures from an evaluation backend call.
///
/// Transient failures are eligible for retry inside the invoker; all
/// backend errors end up as a `failed` outcome, never a request failure.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport-level failure reaching the backend.
    #[error("Backend transport error: {message}")]
    Transport { message: String },

    /// The backend answered with a non-success status.
    #[error("Backend returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The backend reply carried no parseable verdict.
    #[error("Backend response carried no verdict: {message}")]
    InvalidResponse { message: String },
}

impl BackendError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Transport errors and server-side (5xx / 429) statuses are
    /// transient; a malformed reply is not.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Transport { .. } => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            BackendError::InvalidResponse { .. } => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport {
            message: err.to_string(),
        }
    }
}

/// Definition-time validation failures from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid judge definition: {message}")]
    InvalidJudge { message: String },

    #[error("Invalid assembly definition: {message}")]
    InvalidAssembly { message: String },
}

/// Result-store failures.
///
/// Surfaced to the caller as a request failure even though evaluation
/// succeeded: the engine does not silently drop a computed verdict.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Result store error: {message}")]
    Storage { message: String },

    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error("Result serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Request-level failures from the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(BackendError::Transport {
            message: "connection reset".into()
        }
        .is_transient());
        assert!(BackendError::Status {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(BackendError::Status {
            status: 429,
            message: "rate limited".into()
        }
        .is_transient());
        assert!(!BackendError::Status {
            status: 401,
            message: "unauthorized".into()
        }
        .is_transient());
        assert!(!BackendError::InvalidResponse {
            message: "no JSON".into()
        }
        .is_transient());
    }

    #[test]
    fn resolution_errors_display() {
        let err = ResolutionError::EmptyAssembly { id: "a1".into() };
        assert_eq!(err.to_string(), "Assembly resolves to zero enabled judges: a1");
    }
}
