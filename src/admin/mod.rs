//! Read-only diagnostics surface.

pub mod handlers;

use axum::{routing::get, Router};

use self::handlers::get_debug_vars;
pub use self::handlers::DiagnosticsState;

pub fn setup_diagnostics_router(state: DiagnosticsState) -> Router {
    Router::new()
        .route("/debug/vars", get(get_debug_vars))
        .with_state(state)
}
