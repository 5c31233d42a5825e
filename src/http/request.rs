//! Per-request context.
//!
//! # Responsibilities
//! - Accept the caller's correlation ID or mint a new one
//! - Carry it to handlers in a `RequestContext` extension
//! - Echo it on the response and into the request span
//!
//! # Design Decisions
//! - Context travels with the request, never through globals
//! - Outbound clients receive the context as an argument

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Span;

pub const X_CORRELATION_ID: &str = "x-correlation-id";

/// Context attached to every request by [`correlation_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
        }
    }

    /// Fresh context with a random ID.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Reuse the caller's ID when present and usable.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        request
            .headers()
            .get(X_CORRELATION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= 128)
            .map(Self::new)
            .unwrap_or_else(Self::generate)
    }
}

/// Outermost middleware: attach the context and echo the header.
pub async fn correlation_middleware(mut request: Request<Body>, next: Next) -> Response {
    let context = RequestContext::from_request(&request);
    let header = HeaderValue::from_str(&context.correlation_id).ok();
    request.extensions_mut().insert(context);

    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert(X_CORRELATION_ID, value);
    }
    response
}

/// Span factory for `TraceLayer`, tagging the span with the correlation ID.
pub fn request_span(request: &Request<Body>) -> Span {
    let correlation_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.correlation_id.as_str())
        .unwrap_or("-");

    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        correlation_id = %correlation_id,
    )
}
