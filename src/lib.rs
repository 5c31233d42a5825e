//! Chat gateway library: a resilience layer in front of quota-limited and
//! occasionally unreliable dependencies.

pub mod admin;
pub mod clients;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
