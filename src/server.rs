//! HTTP control surface for the presence agent.
//!
//! Routes:
//! - `GET  /health`        liveness, never authenticated
//! - `GET  /status`        current session snapshot
//! - `POST /session/start` start a session (`mode` plus advisory options)
//! - `POST /session/stop`  stop the session (idempotent)
//! - `POST /policy/lock`   set or clear the policy lock
//! - `GET  /logs`          event log, optionally `?since=<RFC3339>`
//! - `GET  /stream`        server-sent `status` events
//!
//! When a pairing token is configured every route except `/health` needs
//! `Authorization: Bearer <token>`.

use crate::config::{Config, EngineConfig};
use crate::engine::PresenceEngine;
use crate::events::{create_shared_log, LogEntry};
use crate::notifier::StatusNotifier;
use crate::platform::SharedPlatform;
use crate::session::{SessionError, SessionManager, SessionState, StartOptions};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, Request, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (port 0 for random)
    pub addr: SocketAddr,
    /// Bearer token; `None` leaves the API open
    pub token: Option<String>,
    /// Allowed CORS origins; empty echoes the caller's origin
    pub allowed_origins: Vec<String>,
    /// Presence engine tuning
    pub engine: EngineConfig,
    /// Interval between live status pushes
    pub status_interval: Duration,
    /// Event log cap
    pub log_capacity: Option<usize>,
}

impl ServerConfig {
    /// Create a configuration with default engine settings.
    pub fn new(addr: SocketAddr) -> Self {
        let defaults = Config::default();
        Self {
            addr,
            token: None,
            allowed_origins: Vec::new(),
            engine: defaults.engine,
            status_interval: defaults.status_interval,
            log_capacity: defaults.log_capacity,
        }
    }

    /// Require a bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build from the agent configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let addr: SocketAddr = config
            .bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", config.bind, e))?;
        Ok(Self {
            addr,
            token: config.token(),
            allowed_origins: config.allowed_origins.clone(),
            engine: config.engine.clone(),
            status_interval: config.status_interval,
            log_capacity: config.log_capacity,
        })
    }
}

/// Shared server state
pub struct ServerState {
    sessions: Arc<SessionManager>,
    notifier: StatusNotifier,
    token: Option<String>,
}

impl ServerState {
    /// Create new server state
    pub fn new(config: &ServerConfig, platform: SharedPlatform) -> Self {
        let engine = PresenceEngine::new(platform, config.engine.clone());
        let sessions = Arc::new(SessionManager::new(
            engine,
            create_shared_log(config.log_capacity),
        ));
        let notifier = StatusNotifier::new(Arc::clone(&sessions), config.status_interval);
        Self {
            sessions,
            notifier,
            token: config.token.clone(),
        }
    }
}

/// Start request body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub mode: String,
    #[serde(flatten)]
    pub options: StartOptions,
}

/// Policy lock request body
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRequest {
    pub locked: bool,
}

/// Query for `/logs`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsQuery {
    /// RFC3339 lower bound on entry timestamps
    pub since: Option<String>,
}

/// Response for state-changing operations
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Response from the logs endpoint
#[derive(Debug, Clone, Serialize)]
pub struct LogsResponse {
    pub entries: Vec<LogEntry>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::AlreadyActive => {
                api_error(StatusCode::CONFLICT, e.to_string(), "ALREADY_ACTIVE")
            }
            SessionError::PolicyLocked => {
                api_error(StatusCode::FORBIDDEN, e.to_string(), "POLICY_LOCKED")
            }
            SessionError::InvalidInput(_) => {
                api_error(StatusCode::BAD_REQUEST, e.to_string(), "INVALID_PAYLOAD")
            }
        }
    }
}

fn invalid(detail: String) -> ApiError {
    tracing::debug!("rejected request: {}", detail);
    SessionError::InvalidInput(detail).into()
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /status
async fn status(State(state): State<Arc<ServerState>>) -> Json<SessionState> {
    Json(state.sessions.snapshot())
}

/// POST /session/start
async fn start_session(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = body.map_err(|e| invalid(e.body_text()))?;
    state.sessions.start_session(&req.mode, &req.options)?;
    Ok(Json(StatusResponse {
        status: "started".to_string(),
    }))
}

/// POST /session/stop
async fn stop_session(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    state.sessions.stop_session();
    Json(StatusResponse {
        status: "stopped".to_string(),
    })
}

/// POST /policy/lock
async fn policy_lock(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<PolicyRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Json(req) = body.map_err(|e| invalid(e.body_text()))?;
    let action = state.sessions.set_policy_lock(req.locked);
    Ok(Json(StatusResponse {
        status: action.to_string(),
    }))
}

/// GET /logs
async fn logs(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<LogsResponse>, ApiError> {
    let Query(query) = query.map_err(|e| invalid(e.body_text()))?;
    let log = state.sessions.log();
    let entries = match query.since.as_deref() {
        Some(since) => {
            let since = DateTime::parse_from_rfc3339(since)
                .map_err(|e| invalid(format!("invalid since '{since}': {e}")))?;
            log.since(since.with_timezone(&Utc))
        }
        None => log.read_all(),
    };
    Ok(Json(LogsResponse { entries }))
}

/// GET /stream
async fn stream(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    let snapshots = state
        .notifier
        .subscribe()
        .map(|snapshot| SseEvent::default().event("status").json_data(snapshot));
    Sse::new(snapshots).keep_alive(KeepAlive::default())
}

/// Reject requests without the configured bearer token.
async fn require_token(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected);

    if authorized {
        next.run(request).await
    } else {
        api_error(StatusCode::UNAUTHORIZED, "unauthorized", "UNAUTHORIZED").into_response()
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Build the router over shared state.
pub fn router(state: Arc<ServerState>, allowed_origins: &[String]) -> Router {
    let protected = Router::new()
        .route("/status", get(status))
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/policy/lock", post(policy_lock))
        .route("/logs", get(logs))
        .route("/stream", get(stream))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_token,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// A server running in the background.
pub struct RunningServer {
    /// Address actually bound
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningServer {
    /// Stop accepting requests, end live streams and drain the engine.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Server task failed: {}", e);
        }
    }
}

/// Run the HTTP server
pub async fn run(config: ServerConfig, platform: SharedPlatform) -> anyhow::Result<RunningServer> {
    let state = Arc::new(ServerState::new(&config, platform));
    let app = router(Arc::clone(&state), &config.allowed_origins);

    let listener = TcpListener::bind(config.addr).await?;
    let actual_addr = listener.local_addr()?;

    if config.token.is_none() {
        tracing::warn!("No pairing token configured; the API is open to any caller");
    }
    tracing::info!("Presence agent listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let notifier = state.notifier.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
                notifier.shutdown();
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        state.sessions.shutdown().await;
    });

    Ok(RunningServer {
        addr: actual_addr,
        shutdown_tx,
        task,
    })
}
