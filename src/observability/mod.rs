//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every request:
//!     → request id (x-request-id, UUID v4) + TraceLayer span
//!     → metrics.rs (counters, in-flight gauge, Prometheus mirror)
//!     → recover.rs (panic → 500 + Connection: close)
//!
//! Consumers:
//!     → logging.rs (stdout, pretty or JSON)
//!     → GET /debug/vars (admin)
//!     → Prometheus scrape (optional)
//! ```

pub mod logging;
pub mod metrics;
pub mod recover;

pub use metrics::{MetricsSnapshot, ResponseMetrics};
