use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::channels::{ConfigStore, Configuration};
use crate::config::ConsoleConfig;
use crate::deployment::Deployment;
use crate::geo::{GeoLocator, ProxyCountry};
use crate::lock::ConsoleLock;
use crate::logs;
use crate::stats::HistoryStats;
use crate::status::{ControlReply, StatusReport};
use crate::supervisor::{Supervisor, SupervisorError};

type ApiError = (StatusCode, Json<serde_json::Value>);

#[derive(Clone)]
pub struct AppState {
    supervisor: Arc<Supervisor>,
    store: ConfigStore,
    deployment: Deployment,
    geo: GeoLocator,
}

impl AppState {
    pub fn new(supervisor: Arc<Supervisor>, deployment: Deployment, geo: GeoLocator) -> Self {
        Self {
            supervisor,
            store: ConfigStore::new(deployment.config_file()),
            deployment,
            geo,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/control", post(control))
        .route("/logs", get(tail_logs))
        .route("/config", get(get_config).post(put_config))
        .route("/check-proxy", post(check_proxy))
        .route("/stats", get(stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the console API until ctrl-c. Refuses to start while another
/// console holds the deployment lock.
pub async fn run(
    config: &ConsoleConfig,
    supervisor: Arc<Supervisor>,
) -> Result<(), Box<dyn std::error::Error>> {
    let deployment = Deployment::from_config(&config.worker);
    let lock = ConsoleLock::acquire(&deployment.lock())?;

    let geo = GeoLocator::new(&config.geo);
    let app = router(AppState::new(supervisor, deployment, geo));

    let addr = format!("{}:{}", config.serve.bind, config.serve.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(lock = %lock.path().display(), "serve listening on {local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("serve stopped");
    drop(lock);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c, serving until killed");
        std::future::pending::<()>().await;
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({"error": message.into()})))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusReport>, ApiError> {
    let operation = state.supervisor.operation();
    match state.supervisor.status() {
        Ok(s) => Ok(Json(StatusReport::new(&s, operation))),
        Err(e) => {
            tracing::error!(error = %e, "status check failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"running": false, "error": e.to_string()})),
            ))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Restart,
}

impl Action {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Action::Start),
            "stop" => Some(Action::Stop),
            "restart" => Some(Action::Restart),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ControlRequest {
    #[serde(default)]
    action: String,
}

async fn control(
    State(state): State<AppState>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlReply>, ApiError> {
    let Json(req) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    let action = Action::parse(req.action.trim())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Invalid action"))?;

    // Detached so a client that hangs up cannot abort a kill half-way.
    let supervisor = Arc::clone(&state.supervisor);
    let outcome = tokio::spawn(async move { perform(&supervisor, action).await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "control task failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("control task failed: {e}"))
        })?;

    match outcome {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            tracing::error!(?action, error = %e, "control action failed");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Expected refusals become unsuccessful replies; only infrastructure
/// failures are returned as errors.
async fn perform(
    supervisor: &Supervisor,
    action: Action,
) -> Result<ControlReply, SupervisorError> {
    match action {
        Action::Start => match supervisor.start().await {
            Ok(worker) => Ok(ControlReply::started(&worker)),
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => Ok(ControlReply::refused(&e)),
        },
        Action::Stop => {
            let report = supervisor.stop().await?;
            Ok(ControlReply::stopped(&report))
        }
        Action::Restart => {
            let report = supervisor.restart().await?;
            let reply = ControlReply::restarted(&report);
            match report.start {
                Err(e) if e.is_infrastructure() => Err(e),
                _ => Ok(reply),
            }
        }
    }
}

/// `lines` stays a string so a bad value falls back to the default window
/// instead of rejecting the request.
#[derive(Deserialize)]
struct LogsQuery {
    lines: Option<String>,
}

async fn tail_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let requested = query
        .lines
        .as_deref()
        .and_then(|s| s.trim().parse::<usize>().ok());
    let lines = logs::tail(state.deployment.log_file(), logs::clamp_lines(requested));
    Json(serde_json::json!({"logs": lines}))
}

async fn get_config(State(state): State<AppState>) -> Json<Configuration> {
    Json(state.store.load())
}

async fn put_config(
    State(state): State<AppState>,
    body: Result<Json<Configuration>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rejected = |status: StatusCode, error: String| {
        (
            status,
            Json(serde_json::json!({"success": false, "error": error})),
        )
    };

    let Json(config) = body.map_err(|e| rejected(StatusCode::BAD_REQUEST, e.body_text()))?;
    if let Err(problems) = config.validate() {
        return Err(rejected(StatusCode::BAD_REQUEST, problems.join("; ")));
    }
    state.store.save(&config).map_err(|e| {
        tracing::error!(error = %e, "failed to save worker config");
        rejected(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(serde_json::json!({"success": true})))
}

/// Only the host is used; credentials are accepted so the settings form can
/// post the whole proxy block.
#[derive(Deserialize)]
struct CheckProxyRequest {
    #[serde(default)]
    host: String,
}

async fn check_proxy(
    State(state): State<AppState>,
    body: Result<Json<CheckProxyRequest>, JsonRejection>,
) -> Result<Json<ProxyCountry>, ApiError> {
    let Json(req) = body.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    Ok(Json(state.geo.lookup(&req.host).await))
}

async fn stats(State(state): State<AppState>) -> Json<HistoryStats> {
    Json(HistoryStats::load(state.deployment.history_file()))
}
