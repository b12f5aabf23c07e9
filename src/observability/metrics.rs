//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Count requests received, responses sent (total and per status code)
//!   and cumulative processing time, exactly once per request
//! - Track requests currently in flight
//! - Mirror the same events to the `metrics` facade for Prometheus
//!
//! # Metrics
//! - `gate_requests_total` (counter): responses by status code
//! - `gate_request_duration_seconds` (histogram): end-to-end latency
//! - `gate_rate_limited_total` (counter): requests denied by the limiter
//! - `gate_auth_failures_total` (counter): rejected bearer tokens
//!
//! # Design Decisions
//! - Independent atomic counters, no lock; increments commute
//! - Status is read from the finished response, which is 200 unless a
//!   stage set something else

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

/// `http::StatusCode` admits 100..=999.
const STATUS_SLOTS: usize = 1000;

/// Process-wide response counters.
#[derive(Debug)]
pub struct ResponseMetrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    processing_time_us: AtomicU64,
    in_flight: Arc<AtomicU64>,
    by_status: Box<[AtomicU64; STATUS_SLOTS]>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    pub total_processing_time_us: u64,
    pub in_flight_requests: u64,
    pub total_responses_sent_by_status: BTreeMap<u16, u64>,
}

impl Default for ResponseMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseMetrics {
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            responses_sent: AtomicU64::new(0),
            processing_time_us: AtomicU64::new(0),
            in_flight: Arc::new(AtomicU64::new(0)),
            by_status: Box::new(std::array::from_fn(|_| AtomicU64::new(0))),
        }
    }

    /// Count a new request. The guard keeps it in flight until dropped.
    pub fn begin(&self) -> InFlightGuard {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Count a finished response.
    pub fn finish(&self, status: u16, started: Instant) {
        let elapsed = started.elapsed();
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.processing_time_us.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if let Some(slot) = self.by_status.get(usize::from(status)) {
            slot.fetch_add(1, Ordering::Relaxed);
        }

        metrics::counter!("gate_requests_total", "status" => status.to_string()).increment(1);
        metrics::histogram!("gate_request_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_responses_sent_by_status = self
            .by_status
            .iter()
            .enumerate()
            .filter_map(|(code, count)| {
                let count = count.load(Ordering::Relaxed);
                (count > 0).then(|| (code as u16, count))
            })
            .collect();

        MetricsSnapshot {
            total_requests_received: self.requests_received.load(Ordering::Relaxed),
            total_responses_sent: self.responses_sent.load(Ordering::Relaxed),
            total_processing_time_us: self.processing_time_us.load(Ordering::Relaxed),
            in_flight_requests: self.in_flight.load(Ordering::Relaxed),
            total_responses_sent_by_status,
        }
    }
}

/// Decrements the in-flight gauge when dropped, including on panic unwind.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Outermost pipeline stage: time the rest of the chain and count the result.
pub async fn metrics_middleware(
    State(metrics): State<Arc<ResponseMetrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    let _in_flight = metrics.begin();

    let response = next.run(request).await;

    metrics.finish(response.status().as_u16(), started);
    response
}

pub fn record_rate_limited() {
    metrics::counter!("gate_rate_limited_total").increment(1);
}

pub fn record_auth_failure() {
    metrics::counter!("gate_auth_failures_total").increment(1);
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}
