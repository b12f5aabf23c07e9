//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, pipeline assembly, graceful shutdown)
//!     → request.rs (request ID, per-request span)
//!     → [security, auth stages]
//!     → application route
//!     → response.rs (error envelope, status mapping)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::ApiError;
pub use server::{GateServer, Pipeline};
