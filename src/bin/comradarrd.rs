//! comradarrd — Comradarr server binary.
//!
//! Reads config from env vars:
//!   COMRADARR_DATABASE_URL — Postgres connection string (required)
//!   COMRADARR_BIND_ADDR    — listen address (default: 0.0.0.0:7878)
//!   COMRADARR_DB_POOL_SIZE — pool size (default: 10)

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use comradarr::context::{self, RequestContext};
use comradarr::db::{self, DatabaseConfig, PgStores};
use comradarr::health::HealthService;
use comradarr::logging;
use comradarr::notify::{Notifier, NotifyEvent, TracingNotifier};
use comradarr::pending::PendingCommandTracker;
use comradarr::reconnect::ReconnectSupervisor;
use comradarr::scheduler::{Orchestrator, OrchestratorDeps};
use comradarr::secrets::{PlaintextCipher, SecretCipher};
use comradarr::settings::SettingsBridge;
use comradarr::snapshot::SnapshotService;
use comradarr::sweep::{SweepKind, SweepRunner};
use comradarr::throttle::ThrottleGovernor;

#[derive(Clone)]
struct AppState {
    health: Arc<HealthService>,
    stores: Arc<PgStores>,
    governor: Arc<ThrottleGovernor>,
    reconnect: Arc<ReconnectSupervisor>,
    runner: Arc<SweepRunner>,
    shutdown: watch::Receiver<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,comradarr=debug".into()),
        )
        .init();

    let bind_addr =
        std::env::var("COMRADARR_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:7878".into());

    let db_config = DatabaseConfig::default();
    let pool = db::connect(&db_config).await?;
    let stores = Arc::new(PgStores::new(pool.clone()));

    let settings = Arc::new(SettingsBridge::new(stores.settings.clone()));
    let timezone = settings.timezone().await?;

    // Log sink: ring buffer always, batched DB writer when enabled.
    let sink = logging::init(logging::DEFAULT_CAPACITY);
    let mut writer_handle = None;
    if settings.log_persistence_enabled().await? {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        sink.attach_writer(tx);
        let writer = logging::LogWriter::new(pool.clone(), rx);
        writer_handle = Some(tokio::spawn(writer.run()));
    }

    let cipher: Arc<dyn SecretCipher> = Arc::new(PlaintextCipher);
    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let governor = Arc::new(ThrottleGovernor::new(timezone));

    let runner = Arc::new(SweepRunner::new(
        Arc::clone(&stores),
        Arc::clone(&governor),
        Arc::clone(&settings),
        Arc::clone(&cipher),
        Arc::clone(&notifier),
    ));
    let tracker = Arc::new(PendingCommandTracker::new(
        Arc::clone(&stores),
        Arc::clone(&settings),
        Arc::clone(&cipher),
        Arc::clone(&notifier),
    ));
    let reconnect = Arc::new(ReconnectSupervisor::new(
        Arc::clone(&stores),
        Arc::clone(&cipher),
        Arc::clone(&notifier),
    ));
    let snapshots = Arc::new(SnapshotService::new(Arc::clone(&stores)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
        pool: pool.clone(),
        stores: Arc::clone(&stores),
        governor: Arc::clone(&governor),
        settings: Arc::clone(&settings),
        runner: Arc::clone(&runner),
        tracker: Arc::clone(&tracker),
        reconnect: Arc::clone(&reconnect),
        snapshots: Arc::clone(&snapshots),
    }));
    orchestrator.start(shutdown_rx.clone()).await?;

    // The tracker runs its own tick loop alongside the orchestrator.
    {
        let tracker = Arc::clone(&tracker);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            tracker.run(shutdown).await;
        });
    }

    notifier
        .notify(
            NotifyEvent::AppStarted,
            serde_json::json!({ "app": settings.app_name().await? }),
        )
        .await;

    let health = Arc::new(HealthService::new(
        pool.clone(),
        Arc::clone(&stores),
        Arc::clone(&governor),
    ));
    let state = AppState {
        health,
        stores,
        governor,
        reconnect,
        runner,
        shutdown: shutdown_rx.clone(),
    };

    let app = Router::new()
        .route("/api/health", get(health_report))
        .route("/api/connectors/:id/reconnect", post(reconnect_connector))
        .route("/api/connectors/:id/throttle/resume", post(resume_throttle))
        .route("/api/registry/:id/clear", post(clear_registry_entry))
        .route("/api/registry/:id/exhaust", post(exhaust_registry_entry))
        .route("/api/sweeps/run", post(run_manual_sweep))
        .with_state(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("comradarrd listening on {bind_addr}");

    let mut serve_shutdown = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = serve_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Cancel background work, let the server drain, then flush the log
    // writer.
    let _ = shutdown_tx.send(true);
    let _ = server_handle.await;
    logging::shutdown();
    if let Some(handle) = writer_handle {
        let _ = handle.await;
    }
    info!("comradarrd stopped");
    Ok(())
}

fn failure(error: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": false, "error": error.to_string() }))
}

fn success() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true }))
}

async fn health_report(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state.health.report().await;
    Json(serde_json::to_value(&report).unwrap_or_default())
}

async fn reconnect_connector(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<serde_json::Value>) {
    let ctx = RequestContext::manual(None);
    match context::scope(ctx, state.reconnect.reconnect_now(id)).await {
        Ok(true) => (StatusCode::OK, success()),
        Ok(false) => (
            StatusCode::CONFLICT,
            failure("reconnect is paused or connector not found"),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, failure(e)),
    }
}

async fn resume_throttle(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.governor.resume(id);
    (StatusCode::OK, success())
}

async fn clear_registry_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.stores.registry.clear(id).await {
        Ok(true) => (StatusCode::OK, success()),
        Ok(false) => (StatusCode::NOT_FOUND, failure("registry entry not found")),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, failure(e)),
    }
}

async fn exhaust_registry_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.stores.registry.mark_exhausted(id).await {
        Ok(true) => (StatusCode::OK, success()),
        Ok(false) => (
            StatusCode::CONFLICT,
            failure("entry is searching or not found"),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, failure(e)),
    }
}

#[derive(Debug, Deserialize)]
struct ManualSweepRequest {
    connector_id: Option<i64>,
    #[serde(default)]
    full: bool,
}

async fn run_manual_sweep(
    State(state): State<AppState>,
    Json(request): Json<ManualSweepRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let kind = if request.full {
        SweepKind::FullReconciliation
    } else {
        SweepKind::Incremental
    };
    let runner = Arc::clone(&state.runner);
    let cancel = state.shutdown.clone();
    let ctx = RequestContext::manual(None);
    context::spawn_with_context(ctx, async move {
        if let Err(e) = runner
            .run_sweep(kind, request.connector_id, None, cancel)
            .await
        {
            warn!(error = %e, "manual sweep failed");
        }
    });
    (StatusCode::ACCEPTED, success())
}
