//! Carries the resolved principal from the authentication stage to
//! everything downstream of it.
//!
//! The principal lives in the request extensions. Handlers take it with
//! the [`CurrentPrincipal`] extractor.

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{request::Parts, Request},
};
use std::convert::Infallible;

use crate::auth::principal::Principal;

/// Attach `principal` to the request for later stages.
pub fn attach(mut request: Request<Body>, principal: Principal) -> Request<Body> {
    request.extensions_mut().insert(principal);
    request
}

/// The principal resolved for this request.
///
/// # Panics
///
/// If the authentication stage did not run. That is a wiring bug in the
/// pipeline, not a client error; the panic is turned into a 500 by the
/// panic containment stage.
pub fn retrieve<B>(request: &Request<B>) -> &Principal {
    from_extensions(request.extensions())
}

fn from_extensions(extensions: &axum::http::Extensions) -> &Principal {
    extensions
        .get::<Principal>()
        .expect("missing principal in request extensions; authentication stage not installed")
}

/// Extractor form of [`retrieve`].
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for CurrentPrincipal {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentPrincipal(from_extensions(&parts.extensions).clone()))
    }
}
