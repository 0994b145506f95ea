//! Aggregation policy engine.
//!
//! Pure reduction of a set of per-judge outcomes into one final verdict.
//! Only `completed` outcomes participate; timed-out and failed outcomes
//! are excluded from the computation but retained in the record for audit.
//! Deterministic given its inputs — tie-breaks follow judge resolution
//! order, never wall-clock timing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::ResolutionError;
use crate::types::{
    AggregationPolicy, FinalVerdict, Judge, JudgeOutcome, ResolutionStatus,
};

/// Outcome of one aggregation: the verdict (when decided) and the status.
pub type Aggregation = (Option<FinalVerdict>, ResolutionStatus);

// ---------------------------------------------------------------------------
// Custom policy registration
// ---------------------------------------------------------------------------

/// A named aggregation policy beyond the built-in variants.
///
/// Implementations must be pure: same outcomes, same judges, same params,
/// same answer.
pub trait CustomPolicy: Send + Sync {
    fn aggregate(&self, outcomes: &[JudgeOutcome], judges: &[Judge], params: &Value)
        -> Aggregation;
}

/// Registry of named custom policies. Built-in policies dispatch directly
/// and never consult this table.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: RwLock<HashMap<String, Arc<dyn CustomPolicy>>>,
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.policies.read().keys().cloned().collect();
        f.debug_struct("PolicyRegistry").field("policies", &names).finish()
    }
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a policy under a name, replacing any previous registration.
    pub fn register(&self, name: impl Into<String>, policy: Arc<dyn CustomPolicy>) {
        self.policies.write().insert(name.into(), policy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomPolicy>> {
        self.policies.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.read().contains_key(name)
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Reduce collected outcomes under `policy`.
///
/// `judges` is the resolved member list in declared order; it supplies the
/// weights for `weighted_average`. An empty `completed` set yields
/// `all_failed` regardless of policy. Unknown custom policies error —
/// callers are expected to have validated the name before dispatch.
pub fn aggregate(
    outcomes: &[JudgeOutcome],
    judges: &[Judge],
    policy: &AggregationPolicy,
    registry: &PolicyRegistry,
) -> Result<Aggregation, ResolutionError> {
    if !outcomes.iter().any(|o| o.is_completed()) {
        return Ok((None, ResolutionStatus::AllFailed));
    }

    let aggregation = match policy {
        AggregationPolicy::Majority => majority(outcomes),
        AggregationPolicy::WeightedAverage => weighted_average(outcomes, judges),
        AggregationPolicy::Unanimous => unanimous(outcomes),
        AggregationPolicy::Quorum { k } => quorum(outcomes, *k),
        AggregationPolicy::Custom { name, params } => {
            let custom = registry
                .get(name)
                .ok_or_else(|| ResolutionError::UnknownPolicy { name: name.clone() })?;
            custom.aggregate(outcomes, judges, params)
        }
    };
    Ok(aggregation)
}

/// Vote counts per label, in first-appearance order over completed outcomes.
fn label_counts(outcomes: &[JudgeOutcome]) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for outcome in outcomes.iter().filter(|o| o.is_completed()) {
        let Some(label) = outcome.label() else { continue };
        match counts.iter_mut().find(|(l, _)| l == label) {
            Some((_, n)) => *n += 1,
            None => counts.push((label.to_string(), 1)),
        }
    }
    counts
}

/// Label with the most completed votes; among tied labels the one whose
/// first vote appears earliest in resolution order wins.
fn majority(outcomes: &[JudgeOutcome]) -> Aggregation {
    let counts = label_counts(outcomes);
    let Some(max) = counts.iter().map(|(_, n)| *n).max() else {
        // Completed outcomes exist but none carried a label.
        return (None, ResolutionStatus::NoQuorum);
    };
    // First-appearance order makes the earliest tied label win.
    let (label, votes) = counts
        .into_iter()
        .find(|(_, n)| *n == max)
        .expect("max came from a non-empty count list");
    (
        Some(FinalVerdict {
            label: Some(label),
            score: None,
            supporting: votes,
        }),
        ResolutionStatus::Decided,
    )
}

/// Weighted mean of completed scores. Outcomes without a numeric score do
/// not contribute; if none carries a score the policy cannot decide.
fn weighted_average(outcomes: &[JudgeOutcome], judges: &[Judge]) -> Aggregation {
    let weight_of = |judge_id: &str| -> f64 {
        judges
            .iter()
            .find(|j| j.id == judge_id)
            .map(|j| j.weight)
            .unwrap_or(crate::types::DEFAULT_JUDGE_WEIGHT)
    };

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut scored = 0usize;
    for outcome in outcomes.iter().filter(|o| o.is_completed()) {
        if let Some(score) = outcome.score() {
            let w = weight_of(&outcome.judge_id);
            weighted_sum += w * score;
            weight_total += w;
            scored += 1;
        }
    }

    if scored == 0 || weight_total == 0.0 {
        return (None, ResolutionStatus::NoQuorum);
    }

    (
        Some(FinalVerdict {
            label: None,
            score: Some(weighted_sum / weight_total),
            supporting: scored,
        }),
        ResolutionStatus::Decided,
    )
}

/// Decided only when every completed outcome agrees on one label.
fn unanimous(outcomes: &[JudgeOutcome]) -> Aggregation {
    let counts = label_counts(outcomes);
    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    match counts.as_slice() {
        [(label, votes)] if *votes == completed => (
            Some(FinalVerdict {
                label: Some(label.clone()),
                score: None,
                supporting: *votes,
            }),
            ResolutionStatus::Decided,
        ),
        _ => (None, ResolutionStatus::NoQuorum),
    }
}

/// Decided once at least `k` completed outcomes agree on one label; the
/// first label (in resolution order) to reach `k` wins.
fn quorum(outcomes: &[JudgeOutcome], k: usize) -> Aggregation {
    let mut running: Vec<(String, usize)> = Vec::new();
    let mut winner: Option<String> = None;
    for outcome in outcomes.iter().filter(|o| o.is_completed()) {
        let Some(label) = outcome.label() else { continue };
        let count = match running.iter_mut().find(|(l, _)| l == label) {
            Some((_, n)) => {
                *n += 1;
                *n
            }
            None => {
                running.push((label.to_string(), 1));
                1
            }
        };
        if count >= k {
            winner = Some(label.to_string());
            break;
        }
    }

    match winner {
        Some(label) => {
            let supporting = running
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, n)| *n)
                .unwrap_or(k);
            (
                Some(FinalVerdict {
                    label: Some(label),
                    score: None,
                    supporting,
                }),
                ResolutionStatus::Decided,
            )
        }
        None => (None, ResolutionStatus::NoQuorum),
    }
}

// ---------------------------------------------------------------------------
// Early-decision predicates
// ---------------------------------------------------------------------------

/// Whether the outcome of aggregation is already determined by the
/// outcomes collected so far.
///
/// `total` is the number of dispatched judges; undecided members are
/// assumed to still be capable of completing with any label. Used by the
/// orchestrator's short-circuit path; never consulted when short-circuit
/// is disabled.
pub fn early_decision(
    policy: &AggregationPolicy,
    collected: &[JudgeOutcome],
    total: usize,
) -> bool {
    let pending = total.saturating_sub(collected.len());
    match policy {
        // An unbeatable lead: even if every pending judge backs the
        // runner-up, the leader stays ahead (ties break by order, which
        // timing cannot influence, so a strict lead is required).
        AggregationPolicy::Majority => {
            let counts = label_counts(collected);
            let mut sorted: Vec<usize> = counts.iter().map(|(_, n)| *n).collect();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            match sorted.as_slice() {
                [lead, second, ..] => *lead > second + pending,
                [lead] => *lead > pending,
                [] => false,
            }
        }
        // Needs every score.
        AggregationPolicy::WeightedAverage => false,
        // One disagreement settles it.
        AggregationPolicy::Unanimous => label_counts(collected).len() > 1,
        AggregationPolicy::Quorum { k } => {
            label_counts(collected).iter().any(|(_, n)| *n >= *k)
        }
        // Custom policies declare no predicate; always collect everything.
        AggregationPolicy::Custom { .. } => false,
    }
}
