//! Pass-through client for the upstream backend service.

use std::str::FromStr;

use axum::{
    body::Body,
    http::{
        uri::{Authority, Scheme},
        HeaderValue, Request, Response, StatusCode, Uri,
    },
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::http::request::{RequestContext, X_CORRELATION_ID};

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream address '{0}'")]
    InvalidAddress(String),

    #[error("failed to build upstream request: {0}")]
    Build(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    /// The backend answered but reported itself unavailable.
    #[error("upstream unavailable: {0}")]
    Unavailable(StatusCode),
}

/// Forwards requests to a single upstream backend.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    authority: Authority,
}

impl UpstreamClient {
    pub fn new(address: &str) -> Result<Self, UpstreamError> {
        let authority = Authority::from_str(address)
            .map_err(|_| UpstreamError::InvalidAddress(address.to_string()))?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { client, authority })
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Forward `request` unchanged apart from the target authority and the
    /// correlation header. 502/503/504 answers count as failures.
    pub async fn forward(
        &self,
        request: Request<Body>,
        context: &RequestContext,
    ) -> Result<Response<Body>, UpstreamError> {
        let (mut parts, body) = request.into_parts();

        let mut uri_parts = parts.uri.clone().into_parts();
        uri_parts.scheme = Some(Scheme::HTTP);
        uri_parts.authority = Some(self.authority.clone());
        if uri_parts.path_and_query.is_none() {
            uri_parts.path_and_query = Some("/".parse().map_err(axum::http::Error::from)?);
        }
        parts.uri = Uri::from_parts(uri_parts).map_err(axum::http::Error::from)?;

        parts.headers.remove(axum::http::header::HOST);
        if let Ok(value) = HeaderValue::from_str(&context.correlation_id) {
            parts.headers.insert(X_CORRELATION_ID, value);
        }

        tracing::debug!(
            correlation_id = %context.correlation_id,
            method = %parts.method,
            uri = %parts.uri,
            "Forwarding to upstream"
        );

        let response = self.client.request(Request::from_parts(parts, body)).await?;
        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(UpstreamError::Unavailable(status));
        }

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("authority", &self.authority)
            .finish()
    }
}
