use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::resilience::circuit_breaker::BreakerSnapshot;
use crate::resilience::credentials::PoolStatus;
use crate::security::rate_limit::RouteRule;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub upstream_enabled: bool,
    pub generative_enabled: bool,
    pub rate_limit_backend: &'static str,
}

#[derive(Serialize)]
pub struct RateLimitStatus {
    pub backend: &'static str,
    pub active: bool,
    pub key_margin_secs: u64,
    pub routes: Vec<RouteRule>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        upstream_enabled: state.upstream.is_some(),
        generative_enabled: state.generative.is_some(),
        rate_limit_backend: state.limiter.backend(),
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<BTreeMap<String, BreakerSnapshot>> {
    Json(state.breakers.snapshots())
}

/// 404 when no credential pool is configured.
pub async fn get_credentials(State(state): State<AppState>) -> Result<Json<PoolStatus>, StatusCode> {
    state
        .credential_pool()
        .map(|pool| Json(pool.status()))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<RateLimitStatus> {
    let limiter = &state.limiter;
    Json(RateLimitStatus {
        backend: limiter.backend(),
        active: limiter.is_active(),
        key_margin_secs: limiter.key_margin().as_secs(),
        routes: limiter.rules().rules().to_vec(),
    })
}
