//! HTTP route handlers

use crate::protocol::{
    AgentsResponse, ErrorResponse, ExecuteRequest, ExecuteResponse, ExecutionQuery, ExecutionRecord,
    ExecutionsResponse, HealthResponse,
};
use crate::server::{
    auth,
    pool::{EnqueueError, Job},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tracing::{info, warn};

/// Error response with a JSON `{error}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

/// Build the server router
///
/// `/health` is always unauthenticated; every other route goes through
/// [`auth::require_auth`].
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/execute", post(execute))
        .route("/status/{id}", get(status))
        .route("/executions", get(list_executions))
        .route("/agents", get(list_agents))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        mode: state.config.auth,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /execute
async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<ExecuteResponse>), ApiError> {
    if request.agent.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "agent is required"));
    }
    if request.task.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "task is required"));
    }
    if !state.executor.has_agent(&request.agent) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("unknown agent '{}'", request.agent),
        ));
    }

    let timeout = request
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(state.config.default_timeout)
        .min(state.config.max_timeout);

    let record = state
        .registry
        .create(&request.agent, &request.task, request.remote.clone());
    let job = Job {
        execution_id: record.id.clone(),
        agent: request.agent,
        task: request.task,
        timeout,
    };

    match state.pool.try_enqueue(job) {
        Ok(()) => {
            info!(execution_id = %record.id, agent = %record.agent, "Execution accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(ExecuteResponse {
                    execution_id: record.id,
                }),
            ))
        }
        Err(e) => {
            state.registry.discard(&record.id);
            warn!(agent = %record.agent, "Execution rejected: {:?}", e);
            let message = match e {
                EnqueueError::Full => "execution queue is full",
                EnqueueError::Closed => "server is shutting down",
            };
            Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, message))
        }
    }
}

/// GET /status/{id}
async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    state
        .registry
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("execution '{}' not found", id)))
}

/// GET /executions?agent&state&limit
async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionQuery>,
) -> Json<ExecutionsResponse> {
    let (executions, total) = state.registry.list(&query);
    Json(ExecutionsResponse { executions, total })
}

/// GET /agents
async fn list_agents(State(state): State<AppState>) -> Result<Json<AgentsResponse>, ApiError> {
    state
        .executor
        .catalog()
        .list()
        .map(|agents| Json(AgentsResponse { agents }))
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
