//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use access_gate::auth::opaque::{OpaqueToken, SCOPE_AUTHENTICATION};
use access_gate::auth::{enforce, CurrentPrincipal, Requirement, User};
use access_gate::config::GateConfig;
use access_gate::store::{MemoryStore, Services};
use access_gate::{GateServer, Shutdown};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SECRET: &str = "an-integration-test-secret-of-sufficient-length";

pub const READER: i64 = 1;
pub const WRITER: i64 = 2;
pub const INACTIVE: i64 = 3;

/// A gate listening on an ephemeral port.
pub struct TestGate {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
    shutdown: Shutdown,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestGate {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Mint and store an opaque authentication token for `user_id`.
    pub fn opaque_token(&self, user_id: i64, ttl: Duration) -> String {
        let token = OpaqueToken::generate(user_id, ttl, SCOPE_AUTHENTICATION).unwrap();
        self.store.insert_token(&token);
        token.plaintext
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

/// Config with rate limiting off, so tests can send freely.
pub fn quiet_config() -> GateConfig {
    let mut config = GateConfig::default();
    config.rate_limit.enabled = false;
    config.auth.secret = SECRET.to_string();
    config
}

fn user(id: i64, name: &str, activated: bool) -> User {
    User {
        id,
        name: name.to_string(),
        email: format!("{}@example.com", name),
        activated,
        created_at: Utc::now(),
    }
}

fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert_user(user(READER, "reader", true));
    store.insert_user(user(WRITER, "writer", true));
    store.insert_user(user(INACTIVE, "inactive", false));
    store.grant(READER, ["movies:read"]);
    store.grant(WRITER, ["movies:read", "movies:write"]);
    store
}

async fn me(CurrentPrincipal(principal): CurrentPrincipal) -> Json<Option<User>> {
    Json(principal.user().cloned())
}

async fn boom() -> &'static str {
    panic!("handler exploded")
}

/// Start a gate with a small route table covering every gate kind.
pub async fn start_gate(config: GateConfig) -> TestGate {
    let store = Arc::new(seeded_store());
    let services = Services::from_store(store.clone());
    let guard = GateServer::guard(&config, &services);

    let routes = Router::new()
        .route("/v1/open", get(|| async { "open" }))
        .route("/v1/whoami", get(me))
        .route(
            "/v1/me",
            get(me).route_layer(from_fn_with_state(guard.require(Requirement::Activated), enforce)),
        )
        .route(
            "/v1/movies",
            get(|| async { "list" }).route_layer(from_fn_with_state(
                guard.require(Requirement::permission("movies:read")),
                enforce,
            )),
        )
        .route(
            "/v1/movies",
            post(|| async { "created" }).route_layer(from_fn_with_state(
                guard.require(Requirement::permission("movies:write")),
                enforce,
            )),
        )
        .route("/v1/panic", get(boom));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = GateServer::new(config, services, routes);
    let handle = tokio::spawn(server.run(listener, shutdown.clone()));

    TestGate {
        addr,
        store,
        client: reqwest::Client::new(),
        shutdown,
        handle,
    }
}
