//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (user header, forwarded hop, or peer address)
//!     → rate_limit.rs (resolve route pattern, check sliding window)
//!         → store.rs (atomic evict/count/insert in Redis or memory)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Fail open: a store outage admits requests instead of rejecting them
//! - Identities are namespaced so users and addresses never share a window
//! - Route table is hot-swappable without touching in-flight checks

pub mod identity;
pub mod rate_limit;
pub mod store;

pub use identity::ClientIdentity;
pub use rate_limit::{rate_limit_middleware, Decision, RateLimiter, RouteRule, RouteRules};
pub use store::{build_store, MemoryStore, RedisStore, StoreError, WindowStore};
