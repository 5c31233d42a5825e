//! Error responses.
//!
//! # Responsibilities
//! - Map dependency failures to client-facing status codes
//! - Render a uniform JSON error body
//!
//! # Design Decisions
//! - An open circuit is 503 with `Retry-After`, never a 5xx from the dependency
//! - Upstream gateway statuses pass through unchanged
//! - Credentials never appear in error messages

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the gateway's own handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("service '{name}' is temporarily unavailable")]
    CircuitOpen { name: String, retry_after_secs: u64 },

    #[error("all API credentials are exhausted, try again later")]
    CredentialsExhausted,

    #[error("upstream returned {0}")]
    UpstreamStatus(StatusCode),

    #[error("upstream request failed")]
    BadGateway,

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::CredentialsExhausted => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UpstreamStatus(status) => *status,
            ApiError::BadGateway => StatusCode::BAD_GATEWAY,
            ApiError::NotConfigured(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::CircuitOpen { .. } => "circuit_open",
            ApiError::CredentialsExhausted => "credentials_exhausted",
            ApiError::UpstreamStatus(_) | ApiError::BadGateway => "upstream_error",
            ApiError::NotConfigured(_) => "not_configured",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        let mut response = (self.status(), Json(body)).into_response();
        if let ApiError::CircuitOpen { retry_after_secs, .. } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_open_response() {
        let response = ApiError::CircuitOpen {
            name: "upstream".into(),
            retry_after_secs: 30,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[RETRY_AFTER], "30");

        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "circuit_open");
        assert!(body["message"].as_str().unwrap().contains("upstream"));
    }

    #[test]
    fn test_upstream_status_passes_through() {
        let response = ApiError::UpstreamStatus(StatusCode::GATEWAY_TIMEOUT).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
