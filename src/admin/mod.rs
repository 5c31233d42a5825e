//! Admin API: read-only views of the resilience components.
//!
//! All routes require `Authorization: Bearer <admin.api_key>`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/credentials", get(get_credentials))
        .route("/admin/rate-limits", get(get_rate_limits))
        .route_layer(middleware::from_fn_with_state(
            state.admin.clone(),
            admin_auth_middleware,
        ))
}
