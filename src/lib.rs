//! # Tribunal
//!
//! An evaluation orchestration engine: define rubric-bound automated
//! judges, group them into assemblies, and render a single aggregated
//! verdict from multiple independent judgments.
//!
//! The core coordinates concurrent judge calls under a shared request
//! deadline, absorbs per-judge timeouts and failures into an auditable
//! outcome trail, and reduces the completed verdicts under a declared
//! aggregation policy. Storage, the HTTP surface, and the evaluation
//! backends are thin collaborators behind traits.

pub mod aggregation;
pub mod backend;
pub mod config;
pub mod errors;
pub mod invoker;
pub mod orchestrator;
pub mod recorder;
pub mod registry;
pub mod resolver;
pub mod server;
pub mod types;

pub use aggregation::{CustomPolicy, PolicyRegistry};
pub use backend::{EvaluationBackend, HttpBackend, StaticBackend};
pub use config::OrchestratorConfig;
pub use errors::{BackendError, OrchestrationError, PersistenceError, ResolutionError};
pub use invoker::JudgeInvoker;
pub use orchestrator::Orchestrator;
pub use recorder::{InMemoryResultStore, ResultStore, SqliteResultStore};
pub use registry::{InMemoryRegistry, Registry};
pub use resolver::AssemblyResolver;
pub use types::{
    AggregatedResult, AggregationPolicy, Assembly, EvaluationMethod, EvaluationRequest,
    FinalVerdict, Judge, JudgeOutcome, OutcomeStatus, ResolutionStatus, Verdict,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
