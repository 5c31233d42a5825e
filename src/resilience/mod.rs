//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (refuse fast while the dependency is failing)
//!     → credentials.rs (rotate API keys on quota errors)
//!         → backoff.rs (pause between rotated attempts)
//! ```
//!
//! # Design Decisions
//! - Breaker and credential pool account failures independently
//! - No lock is held across an await point
//! - State is per process; nothing is shared between replicas

pub mod backoff;
pub mod circuit_breaker;
pub mod credentials;

pub use backoff::Backoff;
pub use circuit_breaker::{BreakerSnapshot, Breakers, CallError, CircuitBreaker, CircuitState};
pub use credentials::{CredentialPool, PoolError, PoolStatus, QuotaClassifier, RetryError};
