use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, Json};
use serde::Serialize;

use crate::observability::{MetricsSnapshot, ResponseMetrics};
use crate::resilience::with_deadline;
use crate::security::ClientStore;
use crate::store::UserStore;

/// Everything `/debug/vars` reads. Nothing here is written by the handler.
#[derive(Clone)]
pub struct DiagnosticsState {
    pub metrics: Arc<ResponseMetrics>,
    pub clients: Arc<ClientStore>,
    pub users: Arc<dyn UserStore>,
    pub lookup_timeout: Duration,
    pub started_at: Instant,
}

#[derive(Serialize)]
pub struct DependencyHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct DebugVars {
    pub version: &'static str,
    pub timestamp: i64,
    pub uptime_secs: u64,
    pub active_tasks: usize,
    pub rate_limited_clients: usize,
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    pub database: DependencyHealth,
}

pub async fn get_debug_vars(State(state): State<DiagnosticsState>) -> Json<DebugVars> {
    let database = match with_deadline(state.lookup_timeout, state.users.ping()).await {
        Ok(()) => DependencyHealth {
            status: "ok",
            error: None,
        },
        Err(e) => DependencyHealth {
            status: "unavailable",
            error: Some(e.to_string()),
        },
    };

    Json(DebugVars {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_tasks: tokio::runtime::Handle::current().metrics().num_alive_tasks(),
        rate_limited_clients: state.clients.tracked(),
        counters: state.metrics.snapshot(),
        database,
    })
}
