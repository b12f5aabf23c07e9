//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (answer trusted preflights, echo trusted origins)
//!     → rate_limit.rs (check per-IP token bucket)
//!     → Pass to authentication
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input (proxy headers are opt-in)

pub mod cors;
pub mod rate_limit;

pub use cors::CorsPolicy;
pub use rate_limit::{ClientStore, Evictor, RateLimiter};
