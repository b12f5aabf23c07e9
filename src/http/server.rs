//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the request pipeline around the application's routes
//! - Mount the diagnostics endpoint and the 404 fallback
//! - Run the rate-limit evictor for the lifetime of the server
//! - Serve with graceful shutdown
//!
//! # Pipeline order (outermost first)
//! ```text
//! request id → trace → metrics → panic containment → CORS
//!     → rate limit → authenticate → [route gates] → timeout → handler
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{middleware::from_fn_with_state, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use crate::admin::{setup_diagnostics_router, DiagnosticsState};
use crate::auth::credentials::authenticate_middleware;
use crate::auth::{CredentialResolver, Guard};
use crate::config::GateConfig;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, trace_layer};
use crate::http::response::not_found;
use crate::lifecycle::{shutdown, Shutdown};
use crate::observability::metrics::metrics_middleware;
use crate::observability::{recover, ResponseMetrics};
use crate::security::cors::cors_middleware;
use crate::security::rate_limit::rate_limit_middleware;
use crate::security::{CorsPolicy, RateLimiter};
use crate::store::Services;

/// Shared state of every global stage.
#[derive(Clone)]
pub struct Pipeline {
    pub metrics: Arc<ResponseMetrics>,
    pub cors: Arc<CorsPolicy>,
    pub limiter: Arc<RateLimiter>,
    pub resolver: Arc<CredentialResolver>,
    pub request_timeout: Duration,
}

impl Pipeline {
    pub fn from_config(config: &GateConfig, services: &Services) -> Self {
        Self {
            metrics: Arc::new(ResponseMetrics::new()),
            cors: Arc::new(CorsPolicy::from_config(&config.cors)),
            limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            resolver: Arc::new(CredentialResolver::from_config(
                config,
                services.tokens.clone(),
                services.users.clone(),
            )),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        }
    }

    /// Wrap `routes` in every global stage. Each request passes each stage once.
    #[allow(deprecated)]
    pub fn wrap(&self, routes: Router) -> Router {
        routes.layer(TimeoutLayer::new(self.request_timeout)).layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(propagate_request_id_layer())
                .layer(trace_layer())
                .layer(from_fn_with_state(self.metrics.clone(), metrics_middleware))
                .layer(recover::layer())
                .layer(from_fn_with_state(self.cors.clone(), cors_middleware))
                .layer(from_fn_with_state(self.limiter.clone(), rate_limit_middleware))
                .layer(from_fn_with_state(self.resolver.clone(), authenticate_middleware)),
        )
    }
}

/// HTTP server for the access gate.
pub struct GateServer {
    router: Router,
    config: GateConfig,
    limiter: Arc<RateLimiter>,
}

impl GateServer {
    /// Build the server around the application's `routes`.
    ///
    /// Per-route gates are attached by the caller with [`Guard::require`];
    /// see [`GateServer::guard`].
    pub fn new(config: GateConfig, services: Services, routes: Router) -> Self {
        let pipeline = Pipeline::from_config(&config, &services);

        let mut routes = routes;
        if config.observability.debug_vars_enabled {
            routes = routes.merge(setup_diagnostics_router(DiagnosticsState {
                metrics: pipeline.metrics.clone(),
                clients: pipeline.limiter.store().clone(),
                users: services.users.clone(),
                lookup_timeout: Duration::from_millis(config.timeouts.lookup_ms),
                started_at: Instant::now(),
            }));
        }

        let router = pipeline.wrap(routes.fallback(not_found));

        tracing::debug!(
            mode = ?pipeline.resolver.mode(),
            rate_limit = config.rate_limit.enabled,
            trusted_origins = config.cors.trusted_origins.len(),
            "Pipeline assembled"
        );

        Self {
            router,
            config,
            limiter: pipeline.limiter,
        }
    }

    /// Guard reading permissions from `services`, with this config's lookup deadline.
    pub fn guard(config: &GateConfig, services: &Services) -> Guard {
        Guard::new(
            services.permissions.clone(),
            Duration::from_millis(config.timeouts.lookup_ms),
        )
    }

    /// The fully wrapped router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    ///
    /// The evictor is stopped and joined before this returns.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let evictor = self
            .config
            .rate_limit
            .enabled
            .then(|| self.limiter.evictor(&self.config.rate_limit).spawn(shutdown.subscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown.subscribe()))
            .await;

        // The server may have stopped on an error rather than the signal.
        shutdown.trigger();
        if let Some(handle) = evictor {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Evictor task failed");
            }
        }

        served?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
