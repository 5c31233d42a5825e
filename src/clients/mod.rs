//! Outbound clients for the protected dependencies.
//!
//! # Data Flow
//! ```text
//! handler
//!     → Failure Breaker("upstream")   → upstream.rs   → backend service
//!     → Failure Breaker("generative") → generative.rs → credential pool → AI API
//! ```

pub mod generative;
pub mod upstream;

pub use generative::{GenerateRequest, GenerateResponse, GenerativeClient, GenerativeError};
pub use upstream::{UpstreamClient, UpstreamError};
