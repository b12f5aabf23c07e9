//! Lookup contracts for user, credential and permission data.
//!
//! The gate never writes through these traits. Every call made from the
//! request path is wrapped in [`crate::resilience::timeouts::with_deadline`].

pub mod memory;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::principal::User;

pub use memory::MemoryStore;

/// Failure modes shared by every lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call exceeded {0:?} deadline")]
    Timeout(Duration),
}

/// User records by identity.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_id(&self, id: i64) -> Result<User, StoreError>;

    /// Cheap liveness probe for the diagnostics endpoint.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Opaque credential lookups. Expired tokens are reported as `NotFound`.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn user_for_token(&self, hash: &[u8; 32], scope: &str) -> Result<User, StoreError>;
}

/// Permission codes granted to a user.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn permissions_for_user(&self, user_id: i64) -> Result<Permissions, StoreError>;
}

/// The collaborators the pipeline needs, shared across requests.
#[derive(Clone)]
pub struct Services {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl Services {
    /// Use one store for every contract.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserStore + TokenStore + PermissionStore + 'static,
    {
        Self {
            users: store.clone(),
            tokens: store.clone(),
            permissions: store,
        }
    }
}

/// A set of permission codes such as `movies:read`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
