//! Tribunal HTTP server binary.
//!
//! Wires the in-memory registry, an evaluation backend, and a result
//! store into the orchestrator and serves the management + evaluation
//! API over axum.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `TRIBUNAL_API_KEY` — bearer token for the HTTP evaluation backend
//! - `TRIBUNAL_STORE` — "memory" (default) or "sqlite"
//! - `TRIBUNAL_DB` — sqlite path (default: tribunal.db) when TRIBUNAL_STORE=sqlite
//! - `TRIBUNAL_REQUEST_TIMEOUT_MS`, `TRIBUNAL_CALL_TIMEOUT_MS`,
//!   `TRIBUNAL_MAX_RETRIES`, `TRIBUNAL_RETRY_BACKOFF_MS`,
//!   `TRIBUNAL_SHORT_CIRCUIT` — orchestrator tunables
//! - `RUST_LOG` — tracing filter (default: "info")

use std::sync::Arc;

use anyhow::Context;

use tribunal::recorder::{InMemoryResultStore, ResultStore, SqliteResultStore};
use tribunal::server::{app_router, AppState};
use tribunal::{HttpBackend, InMemoryRegistry, Orchestrator, OrchestratorConfig, PolicyRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tribunal=debug".into()),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let config = OrchestratorConfig::from_env();
    tracing::info!(?config, "Orchestrator configuration loaded");

    let registry = Arc::new(InMemoryRegistry::new());
    let backend = Arc::new(HttpBackend::new(std::env::var("TRIBUNAL_API_KEY").ok()));

    let store: Arc<dyn ResultStore> = match std::env::var("TRIBUNAL_STORE").as_deref() {
        Ok("sqlite") => {
            let path = std::env::var("TRIBUNAL_DB").unwrap_or_else(|_| "tribunal.db".to_string());
            tracing::info!("Using sqlite result store at {}", path);
            Arc::new(SqliteResultStore::new(path.into()).context("opening sqlite result store")?)
        }
        _ => Arc::new(InMemoryResultStore::new()),
    };

    let orchestrator = Orchestrator::new(
        Arc::clone(&registry) as _,
        backend,
        Arc::clone(&store),
        Arc::new(PolicyRegistry::new()),
        config,
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        registry,
        store,
    };
    let app = app_router(state);

    tracing::info!("tribunal server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health     — liveness probe");
    tracing::info!("  POST /evaluate   — judge/assembly evaluation");
    tracing::info!("  *    /judges     — judge management");
    tracing::info!("  *    /assemblies — assembly management");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
