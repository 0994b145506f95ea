//! Axum route handlers for the tribunal HTTP server.
//!
//! # Routes
//!
//! - `GET    /health`            — Liveness probe
//! - `GET    /judges`            — List judges (`?name=` substring filter)
//! - `POST   /judges`            — Create/replace a judge
//! - `PUT    /judges/{id}`       — Update a judge (id taken from the path)
//! - `DELETE /judges/{id}`       — Delete a judge
//! - `GET    /assemblies`        — List assemblies (`?name=` filter)
//! - `POST   /assemblies`        — Create/replace an assembly
//! - `PUT    /assemblies/{id}`   — Update an assembly
//! - `DELETE /assemblies/{id}`   — Delete an assembly
//! - `POST   /evaluate`          — Run an evaluation request
//! - `GET    /results/{request_id}` — Fetch a recorded result

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::errors::{OrchestrationError, ResolutionError};
use crate::orchestrator::Orchestrator;
use crate::recorder::ResultStore;
use crate::registry::Registry;
use crate::types::{Assembly, EvaluationRequest, Judge};

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<dyn Registry>,
    pub store: Arc<dyn ResultStore>,
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/judges", get(list_judges_handler).post(create_judge_handler))
        .route("/judges/{id}", put(update_judge_handler))
        .route("/judges/{id}", delete(delete_judge_handler))
        .route(
            "/assemblies",
            get(list_assemblies_handler).post(create_assembly_handler),
        )
        .route("/assemblies/{id}", put(update_assembly_handler))
        .route("/assemblies/{id}", delete(delete_assembly_handler))
        .route("/evaluate", post(evaluate_handler))
        .route("/results/{request_id}", get(get_result_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

fn success(title: &str, message: &str, content: Value) -> Json<Value> {
    Json(json!({
        "success": true,
        "title": title,
        "message": message,
        "content": content,
    }))
}

fn error_body(kind: &str, detail: String) -> Json<Value> {
    Json(json!({
        "success": false,
        "type": kind,
        "detail": detail,
    }))
}

type HandlerError = (StatusCode, Json<Value>);

fn map_orchestration_error(err: OrchestrationError) -> HandlerError {
    match &err {
        OrchestrationError::Resolution(res) => {
            let status = match res {
                ResolutionError::AssemblyNotFound { .. }
                | ResolutionError::JudgeNotFound { .. }
                | ResolutionError::MemberNotFound { .. } => StatusCode::NOT_FOUND,
                ResolutionError::Disabled { .. }
                | ResolutionError::EmptyAssembly { .. }
                | ResolutionError::DuplicateMember { .. }
                | ResolutionError::UnknownPolicy { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (status, error_body("Resolution Error", err.to_string()))
        }
        OrchestrationError::Persistence(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("Persistence Error", err.to_string()),
        ),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// GET /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "tribunal",
    }))
}

// ---------------------------------------------------------------------------
// Judge CRUD
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NameFilter {
    name: Option<String>,
}

/// GET /judges — list judges, optionally filtered by name substring.
async fn list_judges_handler(
    State(state): State<AppState>,
    Query(filter): Query<NameFilter>,
) -> Json<Value> {
    let judges = state.registry.list_judges(filter.name.as_deref()).await;
    success(
        &format!("{} Judges Retrieved", judges.len()),
        "Successfully retrieved judge definitions.",
        json!(judges),
    )
}

/// POST /judges — create or replace a judge.
async fn create_judge_handler(
    State(state): State<AppState>,
    Json(judge): Json<Judge>,
) -> Result<Json<Value>, HandlerError> {
    let name = judge.name.clone();
    state.registry.upsert_judge(judge).await.map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_body("Validation Error", e.to_string()),
        )
    })?;
    Ok(success(
        &format!("Judge {} Created", name),
        "Judge registered and ready for evaluations.",
        Value::Null,
    ))
}

/// PUT /judges/{id} — update a judge; the path id wins over any body id.
async fn update_judge_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut judge): Json<Judge>,
) -> Result<Json<Value>, HandlerError> {
    if state.registry.get_judge(&id).await.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            error_body("Not Found", format!("Judge not found: {}", id)),
        ));
    }
    judge.id = id.clone();
    state.registry.upsert_judge(judge).await.map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_body("Validation Error", e.to_string()),
        )
    })?;
    Ok(success(
        &format!("Judge {} Updated", id),
        "Judge definition has been updated.",
        Value::Null,
    ))
}

/// DELETE /judges/{id}
async fn delete_judge_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, HandlerError> {
    if !state.registry.delete_judge(&id).await {
        return Err((
            StatusCode::NOT_FOUND,
            error_body("Not Found", format!("Judge not found: {}", id)),
        ));
    }
    Ok(success(
        &format!("Judge {} Deleted", id),
        "Judge has been removed from the registry.",
        json!({ "judge_id": id }),
    ))
}

// ---------------------------------------------------------------------------
// Assembly CRUD
// ---------------------------------------------------------------------------

/// GET /assemblies — list assemblies, optionally filtered by name substring.
async fn list_assemblies_handler(
    State(state): State<AppState>,
    Query(filter): Query<NameFilter>,
) -> Json<Value> {
    let assemblies = state.registry.list_assemblies(filter.name.as_deref()).await;
    success(
        &format!("{} Assemblies Retrieved", assemblies.len()),
        "Successfully retrieved assembly definitions.",
        json!(assemblies),
    )
}

/// POST /assemblies — create or replace an assembly.
async fn create_assembly_handler(
    State(state): State<AppState>,
    Json(assembly): Json<Assembly>,
) -> Result<Json<Value>, HandlerError> {
    let name = assembly.name.clone();
    state.registry.upsert_assembly(assembly).await.map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_body("Validation Error", e.to_string()),
        )
    })?;
    Ok(success(
        &format!("Assembly {} Created", name),
        "Assembly registered and ready for evaluations.",
        Value::Null,
    ))
}

/// PUT /assemblies/{id} — update an assembly; the path id wins.
async fn update_assembly_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut assembly): Json<Assembly>,
) -> Result<Json<Value>, HandlerError> {
    if state.registry.get_assembly(&id).await.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            error_body("Not Found", format!("Assembly not found: {}", id)),
        ));
    }
    assembly.id = id.clone();
    state.registry.upsert_assembly(assembly).await.map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            error_body("Validation Error", e.to_string()),
        )
    })?;
    Ok(success(
        &format!("Assembly {} Updated", id),
        "Assembly definition has been updated.",
        Value::Null,
    ))
}

/// DELETE /assemblies/{id}
async fn delete_assembly_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, HandlerError> {
    if !state.registry.delete_assembly(&id).await {
        return Err((
            StatusCode::NOT_FOUND,
            error_body("Not Found", format!("Assembly not found: {}", id)),
        ));
    }
    Ok(success(
        &format!("Assembly {} Deleted", id),
        "Assembly has been removed from the registry.",
        json!({ "assembly_id": id }),
    ))
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// POST /evaluate — run a judge or assembly evaluation.
///
/// A degraded (`all_failed`) result is still a 200: the request was
/// orchestrated and recorded; the caller inspects the `degraded` flag.
async fn evaluate_handler(
    State(state): State<AppState>,
    Json(request): Json<EvaluationRequest>,
) -> Result<Json<Value>, HandlerError> {
    let result = state
        .orchestrator
        .evaluate(request)
        .await
        .map_err(map_orchestration_error)?;

    Ok(success(
        "Evaluation Complete",
        if result.degraded {
            "Evaluation finished with no completed judge outcomes."
        } else {
            "Judging completed successfully."
        },
        json!(result),
    ))
}

/// GET /results/{request_id} — fetch a recorded aggregated result.
async fn get_result_handler(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Value>, HandlerError> {
    let result = state.store.get(&request_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            error_body("Persistence Error", e.to_string()),
        )
    })?;

    match result {
        Some(result) => Ok(success(
            "Result Retrieved",
            "Recorded aggregated result.",
            json!(result),
        )),
        None => Err((
            StatusCode::NOT_FOUND,
            error_body("Not Found", format!("No result for request {}", request_id)),
        )),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
