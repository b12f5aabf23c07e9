//! Access gate: the request pipeline in front of a JSON HTTP API.
//!
//! Rate limiting, CORS, bearer-token authentication and per-route
//! authorization gates, with panic containment and response metrics.

pub mod admin;
pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;

pub use config::schema::GateConfig;
pub use http::GateServer;
pub use lifecycle::Shutdown;
