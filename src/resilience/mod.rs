//! Resilience subsystem.
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - A timed-out lookup is a server error, never "not found"

pub mod timeouts;

pub use timeouts::with_deadline;
