//! Request authentication middleware

use crate::protocol::{self, AuthMode, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::server::routes::ApiError;
use crate::server::AppState;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Largest request body accepted for signature verification
const MAX_SIGNED_BODY: usize = 1024 * 1024;

/// Verify the request signature in hmac mode; other modes pass through
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if state.config.auth != AuthMode::Hmac {
        return next.run(request).await;
    }
    let Some(secret) = state.config.secret.as_deref() else {
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "server has no secret").into_response();
    };

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_SIGNED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        }
    };

    let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());

    if let Err(e) = protocol::verify(
        secret,
        parts.method.as_str(),
        path,
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        &bytes,
        protocol::now_ms(),
    ) {
        warn!(method = %parts.method, path = %path, "Rejected request: {}", e);
        return ApiError::new(StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
