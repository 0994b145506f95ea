//! Evaluation orchestrator.
//!
//! Drives one request through its state machine: resolve the target, fan
//! out one concurrent invoker task per judge under the shared request
//! deadline, collect outcomes into declared-order slots, optionally
//! short-circuit once the policy's early-decision predicate is satisfied,
//! aggregate, and record.
//!
//! No mutable state is shared across judge tasks: each task writes exactly
//! one slot, so collection needs no locking. Cancellation is best-effort —
//! aborting a task does not guarantee the underlying backend call stops
//! consuming resources.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::time::Instant;

use crate::aggregation::{aggregate, early_decision, PolicyRegistry};
use crate::backend::EvaluationBackend;
use crate::config::OrchestratorConfig;
use crate::errors::{OrchestrationError, ResolutionError};
use crate::invoker::JudgeInvoker;
use crate::recorder::ResultStore;
use crate::registry::Registry;
use crate::resolver::AssemblyResolver;
use crate::types::{
    AggregatedResult, AggregationPolicy, EvaluationMethod, EvaluationRequest, FinalVerdict, Judge,
    JudgeOutcome, ResolutionStatus,
};

/// Per-request lifecycle states, in order. Terminal states are `Recorded`
/// and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Resolving,
    Dispatching,
    Collecting,
    Aggregating,
    Recorded,
    Failed,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RequestState::Received => "received",
            RequestState::Resolving => "resolving",
            RequestState::Dispatching => "dispatching",
            RequestState::Collecting => "collecting",
            RequestState::Aggregating => "aggregating",
            RequestState::Recorded => "recorded",
            RequestState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// The evaluation orchestration engine.
///
/// Owns the in-flight outcome set of each request exclusively until
/// aggregation completes; the finished [`AggregatedResult`] is then handed
/// off to the result store.
#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<dyn Registry>,
    resolver: AssemblyResolver,
    invoker: JudgeInvoker,
    store: Arc<dyn ResultStore>,
    policies: Arc<PolicyRegistry>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn Registry>,
        backend: Arc<dyn EvaluationBackend>,
        store: Arc<dyn ResultStore>,
        policies: Arc<PolicyRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            resolver: AssemblyResolver::new(Arc::clone(&registry)),
            invoker: JudgeInvoker::new(backend, &config),
            registry,
            store,
            policies,
            config,
        }
    }

    /// Run one evaluation request to a terminal state.
    ///
    /// Returns the recorded result, or an error when resolution or
    /// persistence fails. Individual judge malfunctions never surface
    /// here — they are absorbed into the outcome record.
    pub async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<AggregatedResult, OrchestrationError> {
        let started = Instant::now();
        let request_deadline = started + self.config.request_timeout;
        let mut state = RequestState::Received;

        let result = match request.method {
            EvaluationMethod::Judge => {
                self.evaluate_single(&request, request_deadline, &mut state)
                    .await
            }
            EvaluationMethod::Assembly => {
                self.evaluate_assembly(&request, request_deadline, &mut state)
                    .await
            }
        };

        match result {
            Ok(result) => {
                self.advance(&mut state, RequestState::Recorded, &request);
                log::info!(
                    "Request {} {} in {}ms: status={:?}, outcomes={}",
                    request.request_id,
                    state,
                    started.elapsed().as_millis(),
                    result.status,
                    result.outcomes.len()
                );
                Ok(result)
            }
            Err(err) => {
                self.advance(&mut state, RequestState::Failed, &request);
                log::warn!("Request {} failed: {}", request.request_id, err);
                Err(err)
            }
        }
    }

    fn advance(&self, state: &mut RequestState, next: RequestState, request: &EvaluationRequest) {
        log::debug!("Request {}: {} -> {}", request.request_id, state, next);
        *state = next;
    }

    /// Effective deadline for one judge call: the per-call budget capped
    /// by what remains of the request budget.
    fn call_deadline(&self, request_deadline: Instant) -> Instant {
        let per_call = Instant::now() + self.config.call_timeout;
        per_call.min(request_deadline)
    }

    // -----------------------------------------------------------------------
    // Single-judge bypass
    // -----------------------------------------------------------------------

    /// Single-judge requests skip dispatch concurrency entirely: one
    /// invoker call, wrapped into a degenerate result with no policy
    /// applied.
    async fn evaluate_single(
        &self,
        request: &EvaluationRequest,
        request_deadline: Instant,
        state: &mut RequestState,
    ) -> Result<AggregatedResult, OrchestrationError> {
        self.advance(state, RequestState::Resolving, request);
        let judge = self
            .registry
            .get_judge(&request.target_id)
            .await
            .ok_or_else(|| ResolutionError::JudgeNotFound {
                id: request.target_id.clone(),
            })?;
        if !judge.enabled {
            return Err(ResolutionError::Disabled {
                id: judge.id.clone(),
            }
            .into());
        }

        self.advance(state, RequestState::Dispatching, request);
        let outcome = self
            .invoker
            .evaluate(&judge, &request.content, self.call_deadline(request_deadline))
            .await;

        self.advance(state, RequestState::Aggregating, request);
        let (verdict, status) = match &outcome.verdict {
            Some(v) => (
                Some(FinalVerdict {
                    label: v.label.clone(),
                    score: v.score,
                    supporting: 1,
                }),
                ResolutionStatus::Decided,
            ),
            None => (None, ResolutionStatus::AllFailed),
        };

        let result = AggregatedResult::new(request, vec![outcome], verdict, status);
        self.record(&result).await?;
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Assembly fan-out
    // -----------------------------------------------------------------------

    async fn evaluate_assembly(
        &self,
        request: &EvaluationRequest,
        request_deadline: Instant,
        state: &mut RequestState,
    ) -> Result<AggregatedResult, OrchestrationError> {
        self.advance(state, RequestState::Resolving, request);
        let resolved = self.resolver.resolve(&request.target_id).await?;
        let policy = resolved.assembly.policy.clone();

        // An unaggregatable policy is a resolution failure; catching it
        // here means no judge calls are spent on it.
        if let AggregationPolicy::Custom { name, .. } = &policy {
            if !self.policies.contains(name) {
                return Err(ResolutionError::UnknownPolicy { name: name.clone() }.into());
            }
        }

        self.advance(state, RequestState::Dispatching, request);
        let outcomes = self
            .dispatch_and_collect(request, &resolved.judges, &policy, request_deadline, state)
            .await;

        self.advance(state, RequestState::Aggregating, request);
        let (verdict, status) =
            aggregate(&outcomes, &resolved.judges, &policy, &self.policies)
                .map_err(OrchestrationError::Resolution)?;

        let result = AggregatedResult::new(request, outcomes, verdict, status);
        self.record(&result).await?;
        Ok(result)
    }

    /// Launch one task per judge and collect outcomes into declared-order
    /// slots. With short-circuit enabled, stops as soon as the policy's
    /// early-decision predicate holds and aborts the stragglers; their
    /// slots stay empty and the members are dropped from the trail.
    async fn dispatch_and_collect(
        &self,
        request: &EvaluationRequest,
        judges: &[Judge],
        policy: &AggregationPolicy,
        request_deadline: Instant,
        state: &mut RequestState,
    ) -> Vec<JudgeOutcome> {
        let total = judges.len();
        let content: Arc<Value> = Arc::new(request.content.clone());

        let mut abort_handles = Vec::with_capacity(total);
        let mut pending = FuturesUnordered::new();
        for (idx, judge) in judges.iter().enumerate() {
            let judge = judge.clone();
            let judge_id = judge.id.clone();
            let invoker = self.invoker.clone();
            let content = Arc::clone(&content);
            let deadline = self.call_deadline(request_deadline);

            let handle = tokio::spawn(async move {
                (idx, invoker.evaluate(&judge, &content, deadline).await)
            });
            abort_handles.push(handle.abort_handle());
            pending.push(async move {
                match handle.await {
                    Ok(pair) => Some(pair),
                    Err(err) if err.is_cancelled() => None,
                    Err(err) => Some((
                        idx,
                        JudgeOutcome::failed(judge_id, format!("judge task panicked: {}", err), 0),
                    )),
                }
            });
        }

        self.advance(state, RequestState::Collecting, request);
        let mut slots: Vec<Option<JudgeOutcome>> = vec![None; total];
        let mut collected = 0usize;
        while let Some(joined) = pending.next().await {
            let Some((idx, outcome)) = joined else { continue };
            slots[idx] = Some(outcome);
            collected += 1;

            if self.config.short_circuit && collected < total {
                let so_far: Vec<JudgeOutcome> = slots.iter().flatten().cloned().collect();
                if early_decision(policy, &so_far, total) {
                    log::debug!(
                        "Request {}: early decision after {}/{} outcomes, cancelling the rest",
                        request.request_id,
                        collected,
                        total
                    );
                    for handle in &abort_handles {
                        handle.abort();
                    }
                    break;
                }
            }
        }

        slots.into_iter().flatten().collect()
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    async fn record(&self, result: &AggregatedResult) -> Result<(), OrchestrationError> {
        let created = self.store.put(result).await?;
        if !created {
            log::debug!(
                "Result for request {} already recorded; idempotent write skipped",
                result.request_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backend::StaticBackend;
    use crate::recorder::InMemoryResultStore;
    use crate::registry::InMemoryRegistry;
    use crate::types::{Assembly, OutcomeStatus, Verdict};

    fn judge(id: &str) -> Judge {
        Judge {
            id: id.to_string(),
            name: format!("Judge {}", id),
            rubric: "Rate it.".to_string(),
            model: "gpt-4o".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            weight: 1.0,
            enabled: true,
        }
    }

    async fn setup(
        judges: Vec<Judge>,
        assembly: Option<Assembly>,
        backend: StaticBackend,
        config: OrchestratorConfig,
    ) -> (Orchestrator, Arc<InMemoryResultStore>) {
        let registry = Arc::new(InMemoryRegistry::new());
        for j in judges {
            registry.upsert_judge(j).await.unwrap();
        }
        if let Some(a) = assembly {
            registry.upsert_assembly(a).await.unwrap();
        }
        let store = Arc::new(InMemoryResultStore::new());
        let orchestrator = Orchestrator::new(
            registry,
            Arc::new(backend),
            Arc::clone(&store) as Arc<dyn ResultStore>,
            Arc::new(PolicyRegistry::new()),
            config,
        );
        (orchestrator, store)
    }

    fn assembly(id: &str, members: &[&str], policy: AggregationPolicy) -> Assembly {
        Assembly {
            id: id.to_string(),
            name: format!("Assembly {}", id),
            judges: members.iter().map(|s| s.to_string()).collect(),
            policy,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn majority_three_judges_decides() {
        let backend = StaticBackend::new()
            .with_label("a", "A")
            .with_label("b", "A")
            .with_label("c", "B");
        let (orchestrator, store) = setup(
            vec![judge("a"), judge("b"), judge("c")],
            Some(assembly("panel", &["a", "b", "c"], AggregationPolicy::Majority)),
            backend,
            OrchestratorConfig::default(),
        )
        .await;

        let request = EvaluationRequest::for_assembly("panel", serde_json::json!("content"));
        let result = orchestrator.evaluate(request.clone()).await.unwrap();

        assert_eq!(result.status, ResolutionStatus::Decided);
        assert_eq!(result.verdict.as_ref().unwrap().label.as_deref(), Some("A"));
        // One outcome per resolved judge, in declared order.
        assert_eq!(result.outcomes.len(), 3);
        let ids: Vec<&str> = result.outcomes.iter().map(|o| o.judge_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        // Recorded under the request id.
        let stored = store.get(&request.request_id).await.unwrap().unwrap();
        assert_eq!(stored.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn outcomes_keep_declared_order_despite_completion_order() {
        // First judge is the slowest; it must still be listed first.
        let backend = StaticBackend::new()
            .with_label("a", "A")
            .with_delay("a", Duration::from_millis(150))
            .with_label("b", "A")
            .with_label("c", "A");
        let (orchestrator, _) = setup(
            vec![judge("a"), judge("b"), judge("c")],
            Some(assembly("panel", &["a", "b", "c"], AggregationPolicy::Majority)),
            backend,
            OrchestratorConfig::default(),
        )
        .await;

        let result = orchestrator
            .evaluate(EvaluationRequest::for_assembly("panel", serde_json::json!("x")))
            .await
            .unwrap();
        let ids: Vec<&str> = result.outcomes.iter().map(|o| o.judge_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn unanimous_disagreement_is_no_quorum() {
        let backend = StaticBackend::new().with_label("a", "A").with_label("b", "B");
        let (orchestrator, _) = setup(
            vec![judge("a"), judge("b")],
            Some(assembly("panel", &["a", "b"], AggregationPolicy::Unanimous)),
            backend,
            OrchestratorConfig::default(),
        )
        .await;

        let result = orchestrator
            .evaluate(EvaluationRequest::for_assembly("panel", serde_json::json!("x")))
            .await
            .unwrap();
        assert_eq!(result.status, ResolutionStatus::NoQuorum);
        assert!(result.verdict.is_none());
    }

    #[tokio::test]
    async fn all_backend_failures_yield_all_failed_result() {
        // Empty backend: every call fails with a transport error.
        let (orchestrator, store) = setup(
            vec![judge("a"), judge("b"), judge("c")],
            Some(assembly("panel", &["a", "b", "c"], AggregationPolicy::Majority)),
            StaticBackend::new(),
            OrchestratorConfig {
                max_retries: 0,
                ..OrchestratorConfig::default()
            },
        )
        .await;

        let request = EvaluationRequest::for_assembly("panel", serde_json::json!("x"));
        let result = orchestrator.evaluate(request.clone()).await.unwrap();

        assert_eq!(result.status, ResolutionStatus::AllFailed);
        assert!(result.degraded);
        assert!(result.verdict.is_none());
        assert_eq!(result.outcomes.len(), 3);
        assert!(result
            .outcomes
            .iter()
            .all(|o| o.status == OutcomeStatus::Failed));

        // Degraded results are still recorded.
        assert!(store.get(&request.request_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn single_judge_bypass_wraps_lone_outcome() {
        let backend = StaticBackend::new().with_verdict(
            "solo",
            Verdict {
                label: Some("pass".to_string()),
                score: Some(0.9),
                rationale: "fine".to_string(),
            },
        );
        let (orchestrator, _) = setup(
            vec![judge("solo")],
            None,
            backend,
            OrchestratorConfig::default(),
        )
        .await;

        let result = orchestrator
            .evaluate(EvaluationRequest::for_judge("solo", serde_json::json!("x")))
            .await
            .unwrap();

        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.status, ResolutionStatus::Decided);
        let verdict = result.verdict.unwrap();
        assert_eq!(verdict.label.as_deref(), Some("pass"));
        assert_eq!(verdict.score, Some(0.9));
        assert_eq!(verdict.supporting, 1);
    }

    #[tokio::test]
    async fn resolution_errors_abort_before_dispatch() {
        let (orchestrator, store) = setup(
            vec![judge("a")],
            None,
            StaticBackend::new(),
            OrchestratorConfig::default(),
        )
        .await;

        let request = EvaluationRequest::for_assembly("ghost", serde_json::json!("x"));
        let err = orchestrator.evaluate(request.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Resolution(ResolutionError::AssemblyNotFound { .. })
        ));
        // Nothing recorded for a failed request.
        assert!(store.get(&request.request_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_judge_target_is_rejected() {
        let mut disabled = judge("a");
        disabled.enabled = false;
        let (orchestrator, _) = setup(
            vec![disabled],
            None,
            StaticBackend::new(),
            OrchestratorConfig::default(),
        )
        .await;

        let err = orchestrator
            .evaluate(EvaluationRequest::for_judge("a", serde_json::json!("x")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Resolution(ResolutionError::Disabled { .. })
        ));
    }

    #[tokio::test]
    async fn quorum_short_circuit_skips_stragglers() {
        // Two fast agreeing judges satisfy quorum(2); the third hangs far
        // longer than the test runs.
        let backend = StaticBackend::new()
            .with_label("a", "A")
            .with_label("b", "A")
            .with_label("c", "B")
            .with_delay("c", Duration::from_secs(20));
        let (orchestrator, _) = setup(
            vec![judge("a"), judge("b"), judge("c")],
            Some(assembly(
                "panel",
                &["a", "b", "c"],
                AggregationPolicy::Quorum { k: 2 },
            )),
            backend,
            OrchestratorConfig {
                short_circuit: true,
                ..OrchestratorConfig::default()
            },
        )
        .await;

        let started = std::time::Instant::now();
        let result = orchestrator
            .evaluate(EvaluationRequest::for_assembly("panel", serde_json::json!("x")))
            .await
            .unwrap();

        assert_eq!(result.status, ResolutionStatus::Decided);
        assert_eq!(result.verdict.as_ref().unwrap().label.as_deref(), Some("A"));
        // At least the quorum requirement, fewer than all members.
        assert!(result.outcomes.len() >= 2);
        assert!(result.outcomes.len() < 3);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "short-circuit did not cut the slow judge off"
        );
    }

    #[tokio::test]
    async fn unknown_custom_policy_fails_resolution() {
        let backend = StaticBackend::new().with_label("a", "A");
        let (orchestrator, _) = setup(
            vec![judge("a")],
            Some(assembly(
                "panel",
                &["a"],
                AggregationPolicy::Custom {
                    name: "bayes".to_string(),
                    params: serde_json::Value::Null,
                },
            )),
            backend,
            OrchestratorConfig::default(),
        )
        .await;

        let err = orchestrator
            .evaluate(EvaluationRequest::for_assembly("panel", serde_json::json!("x")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::Resolution(ResolutionError::UnknownPolicy { .. })
        ));
    }

    #[tokio::test]
    async fn weighted_average_result_is_bounded() {
        let mut heavy = judge("a");
        heavy.weight = 4.0;
        let backend = StaticBackend::new().with_score("a", 0.9).with_score("b", 0.1);
        let (orchestrator, _) = setup(
            vec![heavy, judge("b")],
            Some(assembly(
                "panel",
                &["a", "b"],
                AggregationPolicy::WeightedAverage,
            )),
            backend,
            OrchestratorConfig::default(),
        )
        .await;

        let result = orchestrator
            .evaluate(EvaluationRequest::for_assembly("panel", serde_json::json!("x")))
            .await
            .unwrap();
        let score = result.verdict.unwrap().score.unwrap();
        assert!((0.1..=0.9).contains(&score));
        assert!((score - 0.74).abs() < 1e-9);
    }
}
