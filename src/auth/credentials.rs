//! Credential resolution.
//!
//! Turns the `Authorization` header into a [`Principal`]. Exactly one token
//! scheme is active per process (see [`AuthMode`]).
//!
//! Store failures follow one policy in both schemes: a missing record means
//! the token is invalid, anything else (outage, timeout) is a server error.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::auth::context;
use crate::auth::opaque::{self, SCOPE_AUTHENTICATION};
use crate::auth::principal::Principal;
use crate::auth::signed::SignedTokens;
use crate::config::{AuthMode, GateConfig};
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::resilience::with_deadline;
use crate::store::{StoreError, TokenStore, UserStore};

/// Why a header did not resolve to a principal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Malformed, unknown, expired or forged. Never more specific than this.
    #[error("invalid authentication token")]
    InvalidToken,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::InvalidToken,
            other => AuthError::Store(other),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => ApiError::InvalidAuthenticationToken,
            AuthError::Store(err) => ApiError::from(err),
        }
    }
}

enum Scheme {
    Opaque(Arc<dyn TokenStore>),
    Signed(SignedTokens),
}

/// Validates bearer tokens and looks up who they belong to.
pub struct CredentialResolver {
    scheme: Scheme,
    users: Arc<dyn UserStore>,
    lookup_timeout: Duration,
}

impl CredentialResolver {
    /// Resolver for opaque tokens looked up by hash.
    pub fn opaque(tokens: Arc<dyn TokenStore>, users: Arc<dyn UserStore>, lookup_timeout: Duration) -> Self {
        Self {
            scheme: Scheme::Opaque(tokens),
            users,
            lookup_timeout,
        }
    }

    /// Resolver for signed tokens.
    pub fn signed(tokens: SignedTokens, users: Arc<dyn UserStore>, lookup_timeout: Duration) -> Self {
        Self {
            scheme: Scheme::Signed(tokens),
            users,
            lookup_timeout,
        }
    }

    pub fn from_config(config: &GateConfig, tokens: Arc<dyn TokenStore>, users: Arc<dyn UserStore>) -> Self {
        let lookup_timeout = Duration::from_millis(config.timeouts.lookup_ms);
        match config.auth.mode {
            AuthMode::Opaque => Self::opaque(tokens, users, lookup_timeout),
            AuthMode::Signed => Self::signed(SignedTokens::from_config(&config.auth), users, lookup_timeout),
        }
    }

    pub fn mode(&self) -> AuthMode {
        match self.scheme {
            Scheme::Opaque(_) => AuthMode::Opaque,
            Scheme::Signed(_) => AuthMode::Signed,
        }
    }

    /// Resolve an `Authorization` header value. Absent or empty means anonymous.
    pub async fn resolve(&self, authorization: Option<&str>) -> Result<Principal, AuthError> {
        let authorization = match authorization {
            None | Some("") => return Ok(Principal::Anonymous),
            Some(value) => value,
        };

        let token = bearer_token(authorization).ok_or(AuthError::InvalidToken)?;

        let user = match &self.scheme {
            Scheme::Opaque(tokens) => {
                if !opaque::validate_plaintext(token) {
                    return Err(AuthError::InvalidToken);
                }
                let hash = opaque::hash_plaintext(token);
                with_deadline(self.lookup_timeout, tokens.user_for_token(&hash, SCOPE_AUTHENTICATION)).await?
            }
            Scheme::Signed(signed) => {
                let user_id = signed.verify(token).map_err(|_| AuthError::InvalidToken)?;
                with_deadline(self.lookup_timeout, self.users.user_by_id(user_id)).await?
            }
        };

        Ok(Principal::User(user))
    }
}

/// Split `Bearer <token>`. Exactly two space-separated fields.
fn bearer_token(value: &str) -> Option<&str> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Some(token),
        _ => None,
    }
}

/// Authentication stage of the pipeline.
pub async fn authenticate_middleware(
    State(resolver): State<Arc<CredentialResolver>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorization = match request.headers().get(header::AUTHORIZATION) {
        None => Ok(None),
        Some(value) => value.to_str().map(Some),
    };

    let outcome = match authorization {
        Ok(value) => resolver.resolve(value).await,
        Err(_) => Err(AuthError::InvalidToken),
    };

    let mut response = match outcome {
        Ok(principal) => next.run(context::attach(request, principal)).await,
        Err(err) => {
            if err == AuthError::InvalidToken {
                tracing::debug!(path = %request.uri().path(), "Invalid authentication token");
                metrics::record_auth_failure();
            }
            ApiError::from(err).into_response()
        }
    };

    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}
