//! Cross-origin request negotiation.
//!
//! Trusted origins are echoed back in `Access-Control-Allow-Origin`.
//! A preflight from a trusted origin is answered here with 200 and never
//! reaches later stages. Everything else passes through untouched apart
//! from the `Vary` headers, which are always added.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::CorsConfig;

const ALLOW_METHODS: &str = "OPTIONS, PUT, PATCH, DELETE";
const ALLOW_HEADERS: &str = "Authorization, Content-Type";

/// The configured allow-list.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    trusted_origins: HashSet<String>,
}

impl CorsPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted_origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(config.trusted_origins.iter().cloned())
    }

    pub fn is_trusted(&self, origin: &str) -> bool {
        self.trusted_origins.contains(origin)
    }
}

/// CORS stage of the pipeline.
pub async fn cors_middleware(
    State(policy): State<Arc<CorsPolicy>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let trusted_origin = request
        .headers()
        .get(header::ORIGIN)
        .filter(|origin| origin.to_str().map_or(false, |o| policy.is_trusted(o)))
        .cloned();

    let is_preflight = request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

    let mut response = match &trusted_origin {
        Some(_) if is_preflight => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::OK;
            let headers = response.headers_mut();
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOW_METHODS),
            );
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(ALLOW_HEADERS),
            );
            response
        }
        _ => next.run(request).await,
    };

    let headers = response.headers_mut();
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    headers.append(
        header::VARY,
        HeaderValue::from_static("Access-Control-Request-Method"),
    );
    if let Some(origin) = trusted_origin {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    response
}
