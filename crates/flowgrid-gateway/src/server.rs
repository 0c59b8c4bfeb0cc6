//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use flowgrid_core::config::{DeliveryConfig, FlowGridConfig};
use flowgrid_delivery::{DeliveryClient, DeliveryOptions};
use flowgrid_engine::{RunOrchestrator, ScheduleQueue};
use flowgrid_quota::UsageGate;
use flowgrid_security::CredentialStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
pub struct AppState {
    /// Run lifecycle state machine over the engine store.
    pub orchestrator: Arc<tokio::sync::Mutex<RunOrchestrator>>,
    /// Plan-tier admission gate.
    pub gate: Arc<tokio::sync::Mutex<UsageGate>>,
    /// Webhook secret store (inbound verification + outbound signing).
    pub credentials: Arc<tokio::sync::Mutex<CredentialStore>>,
    /// Min-heap of next-due scheduled occurrences, drained by the poller.
    pub queue: Arc<tokio::sync::Mutex<ScheduleQueue>>,
    /// Outbound webhook delivery.
    pub delivery: Arc<DeliveryClient>,
    pub delivery_options: DeliveryOptions,
    pub config: FlowGridConfig,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        orchestrator: RunOrchestrator,
        gate: UsageGate,
        credentials: CredentialStore,
        config: FlowGridConfig,
    ) -> Self {
        let delivery_options = delivery_options_from(&config.delivery);
        Self {
            orchestrator: Arc::new(tokio::sync::Mutex::new(orchestrator)),
            gate: Arc::new(tokio::sync::Mutex::new(gate)),
            credentials: Arc::new(tokio::sync::Mutex::new(credentials)),
            queue: Arc::new(tokio::sync::Mutex::new(ScheduleQueue::new())),
            delivery: Arc::new(DeliveryClient::new()),
            delivery_options,
            config,
            start_time: std::time::Instant::now(),
        }
    }
}

fn delivery_options_from(config: &DeliveryConfig) -> DeliveryOptions {
    DeliveryOptions {
        timeout: Duration::from_secs(config.timeout_secs),
        max_retries: config.max_retries,
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(super::routes::health_check))
        // Tenants
        .route("/api/v1/tenants", post(super::routes::upsert_tenant))
        // Automation lifecycle
        .route("/api/v1/automations", post(super::routes::create_automation))
        .route("/api/v1/automations", get(super::routes::list_automations))
        .route("/api/v1/automations/{id}", get(super::routes::get_automation))
        .route(
            "/api/v1/automations/{id}/activate",
            post(super::routes::activate_automation),
        )
        .route(
            "/api/v1/automations/{id}/pause",
            post(super::routes::pause_automation),
        )
        .route(
            "/api/v1/automations/{id}/archive",
            post(super::routes::archive_automation),
        )
        .route(
            "/api/v1/automations/{id}/trigger",
            post(super::routes::trigger_automation),
        )
        // Inbound webhook triggers
        .route("/api/v1/hooks/{webhook_id}", post(super::routes::inbound_hook))
        .route(
            "/api/v1/hooks/{webhook_id}/rotate",
            post(super::routes::rotate_credential),
        )
        // Worker-pool completion callback
        .route("/api/v1/runs/complete", post(super::routes::complete_run))
        // Run reads and archival
        .route("/api/v1/runs", get(super::routes::list_runs))
        .route("/api/v1/runs/stale", get(super::routes::stale_runs))
        .route("/api/v1/runs/{id}", get(super::routes::get_run))
        .route("/api/v1/runs/{id}/logs", get(super::routes::run_logs))
        .route("/api/v1/runs/{id}/logs", post(super::routes::append_run_log))
        .route("/api/v1/runs/{id}/archive", post(super::routes::archive_run))
        .route("/api/v1/runs/{id}/purge", post(super::routes::purge_run))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> flowgrid_core::Result<()> {
    let router = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| flowgrid_core::FlowGridError::Gateway(format!("bind {addr}: {e}")))?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, router)
        .await
        .map_err(|e| flowgrid_core::FlowGridError::Gateway(format!("serve: {e}")))?;
    Ok(())
}
