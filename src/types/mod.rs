//! Core data model for the tribunal evaluation engine.
//!
//! Everything that crosses a wire or lands in the result store lives here:
//! judge and assembly definitions, evaluation requests, per-judge outcomes,
//! and the final aggregated result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default weight applied to a judge when none is configured.
pub const DEFAULT_JUDGE_WEIGHT: f64 = 1.0;

// ---------------------------------------------------------------------------
// Judge & Assembly definitions
// ---------------------------------------------------------------------------

/// A single rubric-bound automated evaluator.
///
/// The backend binding (`model` + `endpoint`) is opaque to the engine; the
/// invoker hands it to an [`crate::backend::EvaluationBackend`] unchanged.
/// Judges are immutable during an evaluation and mutated only through the
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judge {
    /// Unique identifier for the judge.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Rubric / criteria description the judge evaluates against.
    pub rubric: String,
    /// Model identifier passed to the evaluation backend.
    pub model: String,
    /// Endpoint URL of the evaluation backend.
    pub endpoint: String,
    /// Weight used by weighted aggregation policies.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Disabled judges are filtered out at resolution time.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_weight() -> f64 {
    DEFAULT_JUDGE_WEIGHT
}

fn default_enabled() -> bool {
    true
}

/// A named, ordered group of judges sharing one aggregation policy.
///
/// Member order is significant: it is the resolution order and the
/// tie-break order during aggregation. Duplicate members are forbidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assembly {
    /// Unique identifier for the assembly.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Ordered member judge ids.
    pub judges: Vec<String>,
    /// Aggregation policy applied to the collected outcomes.
    pub policy: AggregationPolicy,
    /// Disabled assemblies fail resolution.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Declared aggregation policy with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Categorical label with the most completed votes; ties broken by
    /// judge resolution order (first-listed wins).
    Majority,
    /// `sum(weight_i * score_i) / sum(weight_i)` over completed outcomes.
    WeightedAverage,
    /// Decided only when all completed outcomes agree on one label.
    Unanimous,
    /// Decided once at least `k` completed outcomes agree on one label.
    Quorum { k: usize },
    /// A named policy registered in the [`crate::aggregation::PolicyRegistry`].
    Custom { name: String, params: Value },
}

impl std::fmt::Display for AggregationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationPolicy::Majority => write!(f, "majority"),
            AggregationPolicy::WeightedAverage => write!(f, "weighted_average"),
            AggregationPolicy::Unanimous => write!(f, "unanimous"),
            AggregationPolicy::Quorum { k } => write!(f, "quorum({})", k),
            AggregationPolicy::Custom { name, .. } => write!(f, "custom({})", name),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation request
// ---------------------------------------------------------------------------

/// Whether a request targets a single judge or an assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMethod {
    Judge,
    Assembly,
}

/// A submitted evaluation request. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Unique request id; the idempotency key for the result store.
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    /// Judge id or assembly id, depending on `method`.
    pub target_id: String,
    /// Target discriminator.
    pub method: EvaluationMethod,
    /// Content under evaluation: free text or a structured payload.
    pub content: Value,
}

impl EvaluationRequest {
    /// Build a request against a single judge.
    pub fn for_judge(judge_id: impl Into<String>, content: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            target_id: judge_id.into(),
            method: EvaluationMethod::Judge,
            content,
        }
    }

    /// Build a request against an assembly.
    pub fn for_assembly(assembly_id: impl Into<String>, content: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            target_id: assembly_id.into(),
            method: EvaluationMethod::Assembly,
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// Verdicts & outcomes
// ---------------------------------------------------------------------------

/// What a judge produced for a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Categorical label (used by majority / unanimous / quorum policies).
    pub label: Option<String>,
    /// Numeric score (used by weighted_average).
    pub score: Option<f64>,
    /// Free-text rationale from the judge.
    #[serde(default)]
    pub rationale: String,
}

/// Terminal status of one judge's participation in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    TimedOut,
    Failed,
}

/// The terminal record of one dispatched judge call.
///
/// Produced exactly once per dispatched judge per request; a verdict is
/// present only when the status is `completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeOutcome {
    pub judge_id: String,
    pub status: OutcomeStatus,
    pub verdict: Option<Verdict>,
    /// Wall-clock latency of the call in milliseconds.
    pub latency_ms: u64,
    /// Error detail when the status is not `completed`.
    pub error: Option<String>,
}

impl JudgeOutcome {
    pub fn completed(judge_id: impl Into<String>, verdict: Verdict, latency_ms: u64) -> Self {
        Self {
            judge_id: judge_id.into(),
            status: OutcomeStatus::Completed,
            verdict: Some(verdict),
            latency_ms,
            error: None,
        }
    }

    pub fn timed_out(judge_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            judge_id: judge_id.into(),
            status: OutcomeStatus::TimedOut,
            verdict: None,
            latency_ms,
            error: Some("deadline exceeded".to_string()),
        }
    }

    pub fn failed(judge_id: impl Into<String>, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            judge_id: judge_id.into(),
            status: OutcomeStatus::Failed,
            verdict: None,
            latency_ms,
            error: Some(error.into()),
        }
    }

    /// Whether this outcome participates in aggregation.
    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }

    /// The label of a completed verdict, if any.
    pub fn label(&self) -> Option<&str> {
        self.verdict.as_ref().and_then(|v| v.label.as_deref())
    }

    /// The score of a completed verdict, if any.
    pub fn score(&self) -> Option<f64> {
        self.verdict.as_ref().and_then(|v| v.score)
    }
}

// ---------------------------------------------------------------------------
// Aggregated result
// ---------------------------------------------------------------------------

/// Policy-resolution status of an aggregated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// The policy produced a verdict.
    Decided,
    /// Completed outcomes exist but the policy could not decide.
    NoQuorum,
    /// No dispatched judge completed.
    AllFailed,
}

/// The final verdict of an aggregation. Shape depends on the policy:
/// label-based policies set `label` and `supporting`, `weighted_average`
/// sets `score`, and the single-judge bypass copies the lone verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub label: Option<String>,
    pub score: Option<f64>,
    /// Number of completed outcomes supporting this verdict.
    pub supporting: usize,
}

/// The immutable record of one evaluation request.
///
/// Outcomes are ordered by the judge's declared assembly order regardless
/// of completion order, so the audit trail is reproducible. Created once,
/// never mutated; ownership passes to the result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub request_id: Uuid,
    pub target_id: String,
    pub method: EvaluationMethod,
    /// Per-judge outcome trail in declared order. Short-circuited requests
    /// omit the cancelled-not-awaited members.
    pub outcomes: Vec<JudgeOutcome>,
    /// Final verdict; absent when the status is not `decided`.
    pub verdict: Option<FinalVerdict>,
    pub status: ResolutionStatus,
    /// Degraded-result flag: true when status is `all_failed`.
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

impl AggregatedResult {
    /// Assemble a result record from collected outcomes.
    pub fn new(
        request: &EvaluationRequest,
        outcomes: Vec<JudgeOutcome>,
        verdict: Option<FinalVerdict>,
        status: ResolutionStatus,
    ) -> Self {
        Self {
            request_id: request.request_id,
            target_id: request.target_id.clone(),
            method: request.method,
            outcomes,
            verdict,
            status,
            degraded: status == ResolutionStatus::AllFailed,
            created_at: Utc::now(),
        }
    }
}
