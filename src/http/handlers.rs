//! Request handlers.
//!
//! # Responsibilities
//! - Forward everything not handled locally to the upstream backend
//! - Serve text generation through the credential pool
//! - Report liveness with breaker states
//!
//! Each dependency call runs inside its own Failure Breaker.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;

use crate::clients::generative::{GenerateRequest, GenerativeError};
use crate::clients::upstream::UpstreamError;
use crate::http::request::RequestContext;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CallError, CircuitBreaker, CircuitState};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub breakers: BTreeMap<String, CircuitState>,
}

/// Liveness. Always 200; `degraded` while any circuit is not closed.
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let breakers: BTreeMap<String, CircuitState> = state
        .breakers
        .snapshots()
        .into_iter()
        .map(|(name, snapshot)| (name, snapshot.state))
        .collect();
    let degraded = breakers.values().any(|s| *s != CircuitState::Closed);

    Json(HealthStatus {
        status: if degraded { "degraded" } else { "healthy" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        breakers,
    })
}

#[derive(Debug, Serialize)]
pub struct GenerateReply {
    pub text: String,
    pub model: String,
    pub correlation_id: String,
}

/// `POST /api/ai/generate`
pub async fn generate_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateReply>, ApiError> {
    let start = Instant::now();
    let result = generate(&state, &context, request).await;
    let status = match &result {
        Ok(_) => 200,
        Err(e) => e.status().as_u16(),
    };
    metrics::record_request("generate", status, start);
    result
}

async fn generate(
    state: &AppState,
    context: &RequestContext,
    request: GenerateRequest,
) -> Result<Json<GenerateReply>, ApiError> {
    let client = state
        .generative
        .as_ref()
        .ok_or(ApiError::NotConfigured("generative API"))?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }

    let breaker = &state.generative_breaker;
    let response = breaker
        .call(|| client.generate(&request, context))
        .await
        .map_err(|e| match e {
            CallError::Operation(GenerativeError::Exhausted { attempts, .. }) => {
                tracing::error!(
                    correlation_id = %context.correlation_id,
                    attempts,
                    "Generative credentials exhausted"
                );
                ApiError::CredentialsExhausted
            }
            other => breaker_error(breaker, other),
        })?;

    Ok(Json(GenerateReply {
        text: response.text,
        model: response.model,
        correlation_id: context.correlation_id.clone(),
    }))
}

/// Fallback handler forwarding to the upstream backend.
pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let context = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_else(RequestContext::generate);

    let Some(upstream) = state.upstream.as_ref() else {
        let error = ApiError::NotConfigured("upstream backend");
        metrics::record_request("proxy", error.status().as_u16(), start);
        return error.into_response();
    };

    let breaker = &state.upstream_breaker;
    let response = match breaker.call(|| upstream.forward(request, &context)).await {
        Ok(response) => response,
        Err(CallError::Operation(UpstreamError::Unavailable(status))) => {
            ApiError::UpstreamStatus(status).into_response()
        }
        Err(e) => breaker_error(breaker, e).into_response(),
    };

    metrics::record_request("proxy", response.status().as_u16(), start);
    response
}

fn breaker_error<E>(breaker: &CircuitBreaker, error: CallError<E>) -> ApiError
where
    E: std::error::Error + 'static,
{
    match error {
        CallError::Open { name } => ApiError::CircuitOpen {
            name,
            retry_after_secs: breaker.timeout().as_secs().max(1),
        },
        CallError::Operation(e) | CallError::Fallback(e) => {
            tracing::error!(breaker = %breaker.name(), error = %e, "Dependency call failed");
            ApiError::BadGateway
        }
    }
}
