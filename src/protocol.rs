//! HTTP wire contract shared by the execution server and the remote client
//!
//! Request signing (hmac mode): the client sends
//! `X-Agentful-Timestamp` (unix milliseconds) and `X-Agentful-Signature`, the
//! hex HMAC-SHA256 of
//!
//! ```text
//! METHOD\nPATH_AND_QUERY\nTIMESTAMP\nBODY
//! ```
//!
//! keyed with the shared secret.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature
pub const SIGNATURE_HEADER: &str = "x-agentful-signature";

/// Header carrying the signing timestamp in unix milliseconds
pub const TIMESTAMP_HEADER: &str = "x-agentful-timestamp";

/// Largest accepted difference between client and server clocks
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

/// Shortest accepted shared secret
pub const MIN_SECRET_LEN: usize = 32;

/// Default server port
pub const DEFAULT_PORT: u16 = 3737;

/// How requests to the server are authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Network-level isolation (tailnet), no application auth
    Tailscale,
    /// Shared-secret request signing
    Hmac,
    /// No auth; server binds to localhost only
    None,
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthMode::Tailscale => "tailscale",
            AuthMode::Hmac => "hmac",
            AuthMode::None => "none",
        })
    }
}

/// Lifecycle state of a remote execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    /// Whether moving to `next` keeps the state machine monotonic
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionState::Queued => "queued",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
        })
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(ExecutionState::Queued),
            "running" => Ok(ExecutionState::Running),
            "completed" => Ok(ExecutionState::Completed),
            "failed" => Ok(ExecutionState::Failed),
            "cancelled" => Ok(ExecutionState::Cancelled),
            other => Err(format!("unknown execution state '{}'", other)),
        }
    }
}

/// One execution as tracked by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub agent: String,
    pub task: String,
    pub state: ExecutionState,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Remote that submitted the execution, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

/// `POST /execute` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub agent: String,
    pub task: String,
    /// Timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

/// `POST /execute` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub execution_id: String,
}

/// `GET /health` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    /// Seconds since the server started
    pub uptime: u64,
    pub mode: AuthMode,
    #[serde(default)]
    pub version: String,
}

/// `GET /agents` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsResponse {
    pub agents: Vec<String>,
}

/// `GET /executions` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionsResponse {
    pub executions: Vec<ExecutionRecord>,
    pub total: usize,
}

/// `GET /executions` query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ExecutionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Error body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Request authentication failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing signature or timestamp header")]
    MissingHeaders,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("request timestamp outside the allowed window ({skew_ms} ms skew)")]
    StaleTimestamp { skew_ms: u64 },

    #[error("invalid signature")]
    BadSignature,

    #[error("secret must be at least {} characters", MIN_SECRET_LEN)]
    WeakSecret,
}

/// Reject secrets too short to sign with
pub fn validate_secret(secret: &str) -> Result<(), AuthError> {
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(AuthError::WeakSecret);
    }
    Ok(())
}

/// String covered by the signature
pub fn canonical_string(method: &str, path: &str, timestamp_ms: i64, body: &[u8]) -> Vec<u8> {
    let mut canonical = format!("{}\n{}\n{}\n", method.to_ascii_uppercase(), path, timestamp_ms).into_bytes();
    canonical.extend_from_slice(body);
    canonical
}

/// Hex HMAC-SHA256 signature of a request
pub fn sign(secret: &str, method: &str, path: &str, timestamp_ms: i64, body: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(&canonical_string(method, path, timestamp_ms, body));
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signed request against the current time `now_ms`
pub fn verify(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now_ms: i64,
) -> Result<(), AuthError> {
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(AuthError::MissingHeaders);
    };

    let timestamp_ms: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| AuthError::InvalidTimestamp)?;
    let skew_ms = now_ms.abs_diff(timestamp_ms);
    if skew_ms > MAX_CLOCK_SKEW_MS.unsigned_abs() {
        return Err(AuthError::StaleTimestamp { skew_ms });
    }

    let provided = hex::decode(signature.trim()).map_err(|_| AuthError::BadSignature)?;
    let mut mac = mac_for(secret);
    mac.update(&canonical_string(method, path, timestamp_ms, body));
    mac.verify_slice(&provided).map_err(|_| AuthError::BadSignature)
}

fn mac_for(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC key of any length is valid"))
}

/// Current time in unix milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_sign_and_verify() {
        let now = 1_700_000_000_000;
        let body = br#"{"agent":"backend","task":"x"}"#;
        let signature = sign(SECRET, "post", "/execute", now, body);

        assert_eq!(signature.len(), 64);
        assert!(verify(SECRET, "POST", "/execute", Some(&now.to_string()), Some(&signature), body, now).is_ok());
    }

    #[test]
    fn test_tampered_request_is_rejected() {
        let now = 1_700_000_000_000;
        let signature = sign(SECRET, "GET", "/executions?limit=5", now, b"");
        let ts = now.to_string();

        assert_eq!(
            verify(SECRET, "GET", "/executions?limit=500", Some(&ts), Some(&signature), b"", now),
            Err(AuthError::BadSignature)
        );
        assert_eq!(
            verify("another-secret-that-is-long-enough!", "GET", "/executions?limit=5", Some(&ts), Some(&signature), b"", now),
            Err(AuthError::BadSignature)
        );
        assert_eq!(
            verify(SECRET, "GET", "/executions?limit=5", Some(&ts), Some("not-hex"), b"", now),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_stale_and_missing_timestamps() {
        let now = 1_700_000_000_000;
        let old = now - MAX_CLOCK_SKEW_MS - 1;
        let signature = sign(SECRET, "GET", "/agents", old, b"");

        assert!(matches!(
            verify(SECRET, "GET", "/agents", Some(&old.to_string()), Some(&signature), b"", now),
            Err(AuthError::StaleTimestamp { .. })
        ));
        assert_eq!(
            verify(SECRET, "GET", "/agents", None, Some(&signature), b"", now),
            Err(AuthError::MissingHeaders)
        );
        assert_eq!(
            verify(SECRET, "GET", "/agents", Some("yesterday"), Some(&signature), b"", now),
            Err(AuthError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        let now = 1_700_000_000_000;
        for timestamp in [i64::MIN, i64::MAX] {
            assert!(matches!(
                verify(SECRET, "GET", "/agents", Some(&timestamp.to_string()), Some("00"), b"", now),
                Err(AuthError::StaleTimestamp { .. })
            ));
        }
    }

    #[test]
    fn test_state_machine_is_monotonic() {
        use ExecutionState::*;
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert_eq!(validate_secret("short"), Err(AuthError::WeakSecret));
        assert!(validate_secret(SECRET).is_ok());
    }

    #[test]
    fn test_record_wire_format() {
        let record = ExecutionRecord {
            id: "e1".to_string(),
            agent: "backend".to_string(),
            task: "t".to_string(),
            state: ExecutionState::Running,
            start_time: Utc::now(),
            end_time: None,
            exit_code: None,
            output: String::new(),
            error: None,
            remote: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "running");
        assert!(json.get("startTime").is_some());
        assert!(json.get("endTime").is_none());
    }
}
