//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (correlation ID into RequestContext)
//!     → security::rate_limit (admission)
//!     → handlers.rs (breaker-wrapped dependency calls)
//!     → response.rs (errors as JSON)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestContext, X_CORRELATION_ID};
pub use response::ApiError;
pub use server::{AppState, HttpServer, StartupError};
