//! HTTP server layer.
//!
//! Thin plumbing over the orchestrator and registry: routing, request
//! envelopes, and error-code mapping live here; no evaluation logic does.

mod routes;

pub use routes::{app_router, AppState};
