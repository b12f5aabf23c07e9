//! Per-client token-bucket rate limiting.
//!
//! # Responsibilities
//! - Keep one bucket per client address, created on first sight
//! - Admit or deny each request against that bucket
//! - Sweep out clients that have gone quiet (background evictor)
//!
//! # Design Decisions
//! - One mutex guards the whole map: lookup, creation, refill and the
//!   allow/deny decision happen in a single critical section, released
//!   before the downstream stage runs
//! - The evictor reads "last seen" and deletes under that same lock, so a
//!   client touched within the idle window is never removed
//! - Eviction is housekeeping only; an evicted client starts over with a
//!   full bucket

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{connect_info::MockConnectInfo, ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use crate::config::RateLimitConfig;
use crate::http::response::ApiError;
use crate::observability::metrics;

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct Client {
    bucket: TokenBucket,
    last_seen: Instant,
}

/// Rate-limit state for every client address seen recently.
///
/// Only [`ClientStore::admit`] and the eviction sweep touch the map.
#[derive(Debug)]
pub struct ClientStore {
    clients: Mutex<HashMap<IpAddr, Client>>,
    rps: f64,
    burst: f64,
}

impl ClientStore {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            rps: requests_per_second,
            burst: f64::from(burst),
        }
    }

    /// Take one token for `addr`, creating its bucket if needed.
    pub fn admit(&self, addr: IpAddr) -> bool {
        self.admit_at(addr, Instant::now())
    }

    fn admit_at(&self, addr: IpAddr, now: Instant) -> bool {
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        let client = clients.entry(addr).or_insert_with(|| Client {
            bucket: TokenBucket::new(self.burst, now),
            last_seen: now,
        });
        client.last_seen = now;
        client.bucket.try_acquire(self.burst, self.rps, now)
    }

    /// Drop every client idle for longer than `idle`. Returns how many went.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        self.evict_idle_at(idle, Instant::now())
    }

    fn evict_idle_at(&self, idle: Duration, now: Instant) -> usize {
        let mut clients = self.clients.lock().expect("rate limiter mutex poisoned");
        let before = clients.len();
        clients.retain(|_, client| now.saturating_duration_since(client.last_seen) <= idle);
        before - clients.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked(&self) -> usize {
        self.clients.lock().expect("rate limiter mutex poisoned").len()
    }
}

/// Background sweep of idle clients.
pub struct Evictor {
    store: Arc<ClientStore>,
    period: Duration,
    idle: Duration,
}

impl Evictor {
    pub fn new(store: Arc<ClientStore>, period: Duration, idle: Duration) -> Self {
        Self { store, period, idle }
    }

    /// Sweep every `period` until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            period = ?self.period,
            idle = ?self.idle,
            "Rate limit evictor starting"
        );

        let mut ticker = time::interval_at(Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.store.evict_idle(self.idle);
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.store.tracked(), "Evicted idle clients");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limit evictor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Admission control stage of the pipeline.
pub struct RateLimiter {
    store: Arc<ClientStore>,
    enabled: bool,
    trust_proxy_headers: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<ClientStore>, enabled: bool, trust_proxy_headers: bool) -> Self {
        Self {
            store,
            enabled,
            trust_proxy_headers,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let store = Arc::new(ClientStore::new(config.requests_per_second, config.burst_size));
        Self::new(store, config.enabled, config.trust_proxy_headers)
    }

    pub fn store(&self) -> &Arc<ClientStore> {
        &self.store
    }

    /// Evictor sharing this limiter's client map.
    pub fn evictor(&self, config: &RateLimitConfig) -> Evictor {
        Evictor::new(
            self.store.clone(),
            Duration::from_secs(config.eviction_interval_secs),
            Duration::from_secs(config.idle_timeout_secs),
        )
    }

    /// Whether a request from `addr` may proceed. Always true when disabled.
    pub fn admit(&self, addr: IpAddr) -> bool {
        !self.enabled || self.store.admit(addr)
    }
}

/// Resolve the rate-limit key for a request.
///
/// Proxy headers are only honoured when explicitly trusted. Entries to the
/// left of `X-Forwarded-For` are client-controlled, so the rightmost public
/// hop wins; private and loopback hops are the proxies' own.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_proxy_headers: bool) -> IpAddr {
    if trust_proxy_headers {
        let hops: Vec<IpAddr> = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|v| v.trim().parse().ok())
            .collect();
        let forwarded = hops
            .iter()
            .rev()
            .find(|ip| !is_internal(ip))
            .or_else(|| hops.last());
        if let Some(ip) = forwarded {
            return *ip;
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        if let Some(ip) = real_ip {
            return ip;
        }
    }
    peer.ip()
}

fn is_internal(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Middleware function for per-client rate limiting.
///
/// Disabled limiting is a pure pass-through and needs no peer address.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.enabled {
        return next.run(request).await;
    }

    let Some(peer) = peer_addr(&request) else {
        return ApiError::ServerError("peer address missing; serve with connect info".to_string())
            .into_response();
    };

    let ip = client_ip(request.headers(), peer, limiter.trust_proxy_headers);
    if limiter.admit(ip) {
        next.run(request).await
    } else {
        tracing::warn!(client = %ip, "Rate limit exceeded");
        metrics::record_rate_limited();
        ApiError::RateLimitExceeded.into_response()
    }
}

fn peer_addr(request: &Request<Body>) -> Option<SocketAddr> {
    let extensions = request.extensions();
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .or_else(|| extensions.get::<MockConnectInfo<SocketAddr>>().map(|MockConnectInfo(addr)| *addr))
}
