//! Access gate (v1)
//!
//! Serves a small demonstration API behind the full request pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!                   ┌───────────────────────────────────────────────────────┐
//!                   │                      ACCESS GATE                       │
//!                   │                                                        │
//!  Client Request   │  ┌──────────┐  ┌────────┐  ┌─────────┐  ┌──────────┐  │
//!  ─────────────────┼─▶│ request  │─▶│metrics │─▶│ panic   │─▶│  CORS    │  │
//!                   │  │ id/trace │  │        │  │ recover │  │          │  │
//!                   │  └──────────┘  └────────┘  └─────────┘  └────┬─────┘  │
//!                   │                                              │        │
//!                   │                                              ▼        │
//!                   │  ┌──────────┐  ┌─────────────┐         ┌──────────┐  │
//!  Client Response  │  │  route   │◀─│ authenticate│◀────────│   rate   │  │
//!  ◀────────────────┼──│  gates   │  │  (bearer)   │         │  limit   │  │
//!                   │  └────┬─────┘  └──────┬──────┘         └──────────┘  │
//!                   │       │               │                               │
//!                   │       ▼               ▼                               │
//!                   │  ┌───────────────────────────┐                        │
//!                   │  │ store: users, tokens,      │                        │
//!                   │  │ permissions                │                        │
//!                   │  └───────────────────────────┘                        │
//!                   └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use access_gate::auth::guard::require_activated;
use access_gate::auth::{enforce, CurrentPrincipal, Requirement, User};
use access_gate::config::{self, AuthMode};
use access_gate::http::ApiError;
use access_gate::lifecycle::signals::shutdown_on_signal;
use access_gate::observability::{logging, metrics};
use access_gate::store::{MemoryStore, Services};
use access_gate::{GateServer, Shutdown};

#[derive(Parser)]
#[command(name = "access-gate")]
#[command(about = "HTTP access gate: rate limiting, CORS and bearer-token auth", long_about = None)]
struct Args {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file with users, permissions and opaque tokens to preload.
    #[arg(short, long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::loader::default_config()?,
    };

    logging::init_logging(&config.observability);
    tracing::info!("access-gate v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        auth_mode = ?config.auth.mode,
        rate_limit = config.rate_limit.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = match &args.seed {
        Some(path) => {
            let store = MemoryStore::load_from_file(path)?;
            tracing::info!(path = %path.display(), "Store seeded");
            store
        }
        None => MemoryStore::new(),
    };
    let services = Services::from_store(Arc::new(store));

    let guard = GateServer::guard(&config, &services);
    let mode = config.auth.mode;
    let routes = Router::new()
        .route("/v1/healthcheck", get(move || healthcheck(mode)))
        .route(
            "/v1/me",
            get(me).route_layer(from_fn_with_state(guard.require(Requirement::Activated), enforce)),
        );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    GateServer::new(config, services, routes)
        .run(listener, shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn healthcheck(mode: AuthMode) -> Json<Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "version": env!("CARGO_PKG_VERSION"),
            "auth_mode": mode,
        }
    }))
}

async fn me(CurrentPrincipal(principal): CurrentPrincipal) -> Result<Json<User>, ApiError> {
    let user = require_activated(&principal)?;
    Ok(Json(user.clone()))
}
