//! Execution server - authenticated HTTP API for running agents remotely

pub mod auth;
pub mod pool;
pub mod registry;
pub mod routes;

pub use pool::{EnqueueError, Job, WorkerPool};
pub use registry::{Completion, ExecutionRegistry};
pub use routes::router;

use crate::agent::AgentExecutor;
use crate::persistence::{StateStore, StoreError};
use crate::protocol::{self, AuthMode, DEFAULT_PORT};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

/// Error types for starting and running the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid server configuration: {0}")]
    Config(String),

    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub auth: AuthMode,
    /// Shared secret (hmac mode)
    pub secret: Option<String>,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Timeout used when a request sets none
    pub default_timeout: Duration,
    /// Upper bound on requested timeouts
    pub max_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            auth: AuthMode::Tailscale,
            secret: None,
            workers: 2,
            queue_capacity: 32,
            default_timeout: Duration::from_secs(10 * 60),
            max_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl ServerConfig {
    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.auth == AuthMode::Hmac {
            let secret = self
                .secret
                .as_deref()
                .ok_or_else(|| ServerError::Config("hmac mode requires a secret".to_string()))?;
            protocol::validate_secret(secret).map_err(|e| ServerError::Config(e.to_string()))?;
        }
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(ServerError::Config(
                "workers and queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Address to listen on: loopback only when there is no auth
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = match self.auth {
            AuthMode::None => IpAddr::V4(Ipv4Addr::LOCALHOST),
            AuthMode::Tailscale | AuthMode::Hmac => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, self.port)
    }
}

/// Shared state of all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ExecutionRegistry>,
    pub pool: Arc<WorkerPool>,
    pub executor: AgentExecutor,
    pub started_at: Instant,
}

impl AppState {
    /// Start the worker pool and build handler state
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: ServerConfig,
        executor: AgentExecutor,
        registry: Arc<ExecutionRegistry>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let pool = WorkerPool::start(
            config.workers,
            config.queue_capacity,
            executor.clone(),
            registry.clone(),
        );
        Ok(Self {
            config: Arc::new(config),
            registry,
            pool: Arc::new(pool),
            executor,
            started_at: Instant::now(),
        })
    }
}

/// Run the server until `shutdown` resolves
///
/// Previously flushed executions are reloaded from `store`. On shutdown,
/// executions still queued or running are cancelled and flushed.
pub async fn serve<F>(
    config: ServerConfig,
    executor: AgentExecutor,
    store: Arc<dyn StateStore>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = Arc::new(ExecutionRegistry::load(store)?);
    let addr = config.bind_addr();
    let auth = config.auth;
    let state = AppState::new(config, executor, registry.clone())?;
    let pool = state.pool.clone();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, mode = %auth, "Execution server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    pool.shutdown();
    let cancelled = registry.cancel_pending();
    info!(cancelled, "Execution server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentBackend, AgentDefinition, AgentError, AgentOutput, EventSink, InMemoryCatalog};
    use crate::protocol::{ExecutionRecord, ExecutionState, SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret-test-secret-test-secret";

    struct QuickBackend;

    #[async_trait]
    impl AgentBackend for QuickBackend {
        async fn invoke(
            &self,
            _definition: &AgentDefinition,
            task: &str,
            _env: &HashMap<String, String>,
            _events: &EventSink,
        ) -> Result<AgentOutput, AgentError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(AgentOutput::text(format!("did {}", task)))
        }
    }

    fn state(auth: AuthMode) -> AppState {
        let catalog = InMemoryCatalog::new().with_agent("backend", "");
        let executor = AgentExecutor::new(Arc::new(catalog), Arc::new(QuickBackend));
        let config = ServerConfig {
            auth,
            secret: Some(SECRET.to_string()),
            ..ServerConfig::default()
        };
        AppState::new(config, executor, Arc::new(ExecutionRegistry::in_memory())).unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_execute(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/execute")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_config_validation_and_bind() {
        let mut config = ServerConfig {
            auth: AuthMode::Hmac,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
        config.secret = Some("short".to_string());
        assert!(config.validate().is_err());
        config.secret = Some(SECRET.to_string());
        assert!(config.validate().is_ok());
        assert!(config.bind_addr().ip().is_unspecified());

        config.auth = AuthMode::None;
        assert!(config.bind_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn test_health_is_always_open() {
        let app = router(state(AuthMode::Hmac));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: protocol::HealthResponse = body_json(response).await;
        assert_eq!(health.mode, AuthMode::Hmac);
    }

    #[tokio::test]
    async fn test_hmac_rejects_unsigned_and_accepts_signed() {
        let app = router(state(AuthMode::Hmac));

        let response = app
            .clone()
            .oneshot(Request::get("/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let now = protocol::now_ms();
        let signature = protocol::sign(SECRET, "GET", "/agents", now, b"");
        let response = app
            .oneshot(
                Request::get("/agents")
                    .header(TIMESTAMP_HEADER, now.to_string())
                    .header(SIGNATURE_HEADER, signature)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let agents: protocol::AgentsResponse = body_json(response).await;
        assert_eq!(agents.agents, vec!["backend"]);
    }

    #[tokio::test]
    async fn test_execute_validation() {
        let app = router(state(AuthMode::None));

        let response = app
            .clone()
            .oneshot(post_execute(r#"{"agent":"backend","task":""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(post_execute(r#"{"agent":"ghost","task":"boo"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_execute_then_status_progresses() {
        let state = state(AuthMode::None);
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(post_execute(r#"{"agent":"backend","task":"work"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let accepted: protocol::ExecuteResponse = body_json(response).await;

        let mut last = ExecutionState::Queued;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/status/{}", accepted.execution_id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let record: ExecutionRecord = body_json(response).await;
            assert!(record.state == last || last.can_transition_to(record.state));
            last = record.state;
            if last.is_terminal() {
                assert_eq!(record.output, "did work");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last, ExecutionState::Completed);

        let response = app
            .oneshot(Request::get("/status/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
