//! HTTP client for remote execution servers

use crate::protocol::{
    self, AgentsResponse, AuthMode, ErrorResponse, ExecuteRequest, ExecuteResponse, ExecutionQuery,
    ExecutionRecord, ExecutionsResponse, HealthResponse, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::remote::{RemoteConfig, RemoteError, RemoteRegistry, RetryPolicy};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Time between two status polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive failed polls tolerated before giving up
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 5;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// How [`RemoteClient::poll_execution`] polls
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_poll_failures: u32,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
        }
    }
}

impl PollOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}

/// Client for the execution servers in a [`RemoteRegistry`]
#[derive(Clone)]
pub struct RemoteClient {
    registry: RemoteRegistry,
    http: Client,
    retry: RetryPolicy,
}

impl RemoteClient {
    pub fn new(registry: RemoteRegistry) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(concat!("agentful/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Validation(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            http,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &RemoteRegistry {
        &self.registry
    }

    /// Start `agent` on `task` at a remote
    pub async fn execute_remote_agent(
        &self,
        remote_name: &str,
        agent: &str,
        task: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecuteResponse, RemoteError> {
        let remote = self.registry.get(remote_name)?;
        let request = ExecuteRequest {
            agent: agent.to_string(),
            task: task.to_string(),
            timeout: timeout.map(|t| t.as_millis() as u64),
            remote: Some(remote.name.clone()),
        };
        let body = serde_json::to_vec(&request).map_err(|e| RemoteError::Decode(e.to_string()))?;

        let response: ExecuteResponse = self
            .send(&remote, Method::POST, endpoint(&remote, "/execute")?, Some(body), REQUEST_TIMEOUT, self.retry)
            .await?;
        info!(remote = %remote.name, agent, execution_id = %response.execution_id, "Remote execution started");
        Ok(response)
    }

    pub async fn get_remote_execution_status(
        &self,
        remote_name: &str,
        execution_id: &str,
    ) -> Result<ExecutionRecord, RemoteError> {
        let remote = self.registry.get(remote_name)?;
        self.status(&remote, execution_id, self.retry).await
    }

    /// Poll an execution until it is terminal or `on_update` breaks
    ///
    /// `on_update` sees every polled record. The last observed record is
    /// returned; it is only non-terminal when the caller broke out early.
    pub async fn poll_execution<F>(
        &self,
        remote_name: &str,
        execution_id: &str,
        options: PollOptions,
        mut on_update: F,
    ) -> Result<ExecutionRecord, RemoteError>
    where
        F: FnMut(&ExecutionRecord) -> ControlFlow<()>,
    {
        let remote = self.registry.get(remote_name)?;
        let mut ticker = tokio::time::interval(options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0;

        loop {
            ticker.tick().await;

            let record = match self.status(&remote, execution_id, RetryPolicy::none()).await {
                Ok(record) => record,
                Err(e) if e.is_transient() && failures < options.max_poll_failures => {
                    failures += 1;
                    warn!(
                        remote = %remote.name,
                        execution_id,
                        failures,
                        "Status poll failed: {}",
                        e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            failures = 0;

            debug!(execution_id, state = %record.state, "Polled execution");
            let flow = on_update(&record);
            if record.state.is_terminal() || flow.is_break() {
                return Ok(record);
            }
        }
    }

    pub async fn list_remote_executions(
        &self,
        remote_name: &str,
        query: &ExecutionQuery,
    ) -> Result<ExecutionsResponse, RemoteError> {
        let remote = self.registry.get(remote_name)?;
        let mut url = endpoint(&remote, "/executions")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(agent) = &query.agent {
                pairs.append_pair("agent", agent);
            }
            if let Some(state) = query.state {
                pairs.append_pair("state", &state.to_string());
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        self.send(&remote, Method::GET, url, None, REQUEST_TIMEOUT, self.retry)
            .await
    }

    pub async fn list_remote_agents(&self, remote_name: &str) -> Result<Vec<String>, RemoteError> {
        let remote = self.registry.get(remote_name)?;
        let response: AgentsResponse = self
            .send(&remote, Method::GET, endpoint(&remote, "/agents")?, None, REQUEST_TIMEOUT, self.retry)
            .await?;
        Ok(response.agents)
    }

    /// Health check with a short timeout and no retries
    pub async fn check_remote_health(&self, remote_name: &str) -> Result<HealthResponse, RemoteError> {
        let remote = self.registry.get(remote_name)?;
        self.send(
            &remote,
            Method::GET,
            endpoint(&remote, "/health")?,
            None,
            HEALTH_TIMEOUT,
            RetryPolicy::none(),
        )
        .await
    }

    async fn status(
        &self,
        remote: &RemoteConfig,
        execution_id: &str,
        retry: RetryPolicy,
    ) -> Result<ExecutionRecord, RemoteError> {
        let mut url = endpoint(remote, "/status")?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Validation(format!("invalid url '{}'", remote.url)))?
            .push(execution_id);
        self.send(remote, Method::GET, url, None, REQUEST_TIMEOUT, retry)
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        remote: &RemoteConfig,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<T, RemoteError> {
        let operation = format!("{} {}", method, url.path());
        retry
            .run(&operation, || self.send_once(remote, method.clone(), url.clone(), body.clone(), timeout))
            .await
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        remote: &RemoteConfig,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<T, RemoteError> {
        let body = body.unwrap_or_default();
        let mut request = self.http.request(method.clone(), url.clone()).timeout(timeout);

        if remote.auth == AuthMode::Hmac {
            let secret = remote
                .secret
                .as_deref()
                .ok_or_else(|| RemoteError::Validation("hmac auth requires a secret".to_string()))?;
            let path = match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            };
            let timestamp = protocol::now_ms();
            let signature = protocol::sign(secret, method.as_str(), &path, timestamp, &body);
            request = request
                .header(TIMESTAMP_HEADER, timestamp.to_string())
                .header(SIGNATURE_HEADER, signature);
        }
        if !body.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| RemoteError::Decode(e.to_string()));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or(text);
        if status == StatusCode::UNAUTHORIZED {
            return Err(RemoteError::Auth(message));
        }
        Err(RemoteError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

fn endpoint(remote: &RemoteConfig, path: &str) -> Result<Url, RemoteError> {
    Url::parse(&format!("{}{}", remote.base_url(), path))
        .map_err(|e| RemoteError::Validation(format!("invalid url '{}': {}", remote.url, e)))
}
