use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use rapport_agent::AgentRegistry;
use rapport_db::DbPool;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    registry: Arc<AgentRegistry>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, registry: Arc<AgentRegistry>) -> Self {
        Self { db_pool, registry }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AgentsCheck {
    pub status: &'static str,
    pub registered: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub agents: AgentsCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Serves `/health` until `shutdown` flips to `true`.
pub async fn spawn(
    bind_address: &str,
    port: u16,
    state: HealthState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    Ok(tokio::spawn(async move {
        let serve = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        });
        if let Err(error) = serve.await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    }))
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let agents = agents_check(&state.registry).await;
    let ready = database.status == "ready" && agents.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "rapport-server runtime initialized".to_string(),
        },
        database,
        agents,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn agents_check(registry: &AgentRegistry) -> AgentsCheck {
    let mut registered = registry.agents().await;
    registered.sort();
    let status = if registered.is_empty() { "degraded" } else { "ready" };
    AgentsCheck { status, registered }
}
