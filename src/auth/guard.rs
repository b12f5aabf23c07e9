//! Per-route authorization gates.
//!
//! Three gates, each implying the previous one:
//! authenticated → activated → has permission `code`.
//! They are attached to individual routes, never globally:
//!
//! ```ignore
//! Router::new().route(
//!     "/v1/movies",
//!     get(list_movies).route_layer(from_fn_with_state(
//!         guard.require(Requirement::permission("movies:read")),
//!         enforce,
//!     )),
//! )
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::context;
use crate::auth::principal::{Principal, User};
use crate::http::response::ApiError;
use crate::resilience::with_deadline;
use crate::store::PermissionStore;

/// What a route demands of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Authenticated,
    Activated,
    Permission(String),
}

impl Requirement {
    pub fn permission(code: impl Into<String>) -> Self {
        Requirement::Permission(code.into())
    }
}

/// Fails with "authentication required" for the anonymous principal.
pub fn require_authenticated(principal: &Principal) -> Result<&User, ApiError> {
    principal.user().ok_or(ApiError::AuthenticationRequired)
}

/// Additionally fails with "account inactive" for unactivated users.
pub fn require_activated(principal: &Principal) -> Result<&User, ApiError> {
    let user = require_authenticated(principal)?;
    if user.activated {
        Ok(user)
    } else {
        Err(ApiError::InactiveAccount)
    }
}

/// Checks permission codes against the permission store.
#[derive(Clone)]
pub struct Guard {
    permissions: Arc<dyn PermissionStore>,
    lookup_timeout: Duration,
}

impl Guard {
    pub fn new(permissions: Arc<dyn PermissionStore>, lookup_timeout: Duration) -> Self {
        Self {
            permissions,
            lookup_timeout,
        }
    }

    /// Activated, and the user's current permission set includes `code`.
    /// The set is fetched fresh on every call.
    pub async fn require_permission<'p>(&self, principal: &'p Principal, code: &str) -> Result<&'p User, ApiError> {
        let user = require_activated(principal)?;
        let permissions = with_deadline(self.lookup_timeout, self.permissions.permissions_for_user(user.id)).await?;
        if permissions.include(code) {
            Ok(user)
        } else {
            tracing::debug!(user_id = user.id, code, "Permission denied");
            Err(ApiError::NotPermitted)
        }
    }

    pub async fn check(&self, principal: &Principal, requirement: &Requirement) -> Result<(), ApiError> {
        match requirement {
            Requirement::Authenticated => require_authenticated(principal).map(|_| ()),
            Requirement::Activated => require_activated(principal).map(|_| ()),
            Requirement::Permission(code) => self.require_permission(principal, code).await.map(|_| ()),
        }
    }

    /// Middleware state for one route's requirement.
    pub fn require(&self, requirement: Requirement) -> Gate {
        Gate {
            guard: self.clone(),
            requirement: Arc::new(requirement),
        }
    }
}

/// A guard bound to one requirement; state for [`enforce`].
#[derive(Clone)]
pub struct Gate {
    guard: Guard,
    requirement: Arc<Requirement>,
}

/// Run the downstream handler only if the gate's requirement holds.
pub async fn enforce(State(gate): State<Gate>, request: Request<Body>, next: Next) -> Response {
    let principal = context::retrieve(&request).clone();
    let outcome = gate.guard.check(&principal, &gate.requirement).await;

    match outcome {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use chrono::Utc;

    fn user(id: i64, activated: bool) -> User {
        User {
            id,
            name: format!("user-{id}"),
            email: format!("user-{id}@example.com"),
            activated,
            created_at: Utc::now(),
        }
    }

    fn guard(store: &Arc<MemoryStore>) -> Guard {
        Guard::new(store.clone(), Duration::from_secs(1))
    }

    #[test]
    fn anonymous_is_not_authenticated() {
        assert!(matches!(
            require_authenticated(&Principal::Anonymous),
            Err(ApiError::AuthenticationRequired)
        ));
        assert!(matches!(
            require_activated(&Principal::Anonymous),
            Err(ApiError::AuthenticationRequired)
        ));
    }

    #[test]
    fn inactive_user_is_authenticated_but_not_activated() {
        let principal = Principal::User(user(1, false));
        assert!(require_authenticated(&principal).is_ok());
        assert!(matches!(require_activated(&principal), Err(ApiError::InactiveAccount)));
    }

    #[tokio::test]
    async fn permission_must_be_in_set() {
        let store = Arc::new(MemoryStore::new());
        store.grant(1, ["movies:read"]);
        store.grant(2, ["movies:read", "movies:write"]);
        let guard = guard(&store);

        let reader = Principal::User(user(1, true));
        let writer = Principal::User(user(2, true));

        assert!(matches!(
            guard.require_permission(&reader, "movies:write").await,
            Err(ApiError::NotPermitted)
        ));
        assert_eq!(guard.require_permission(&writer, "movies:write").await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn permission_implies_activation() {
        let store = Arc::new(MemoryStore::new());
        store.grant(1, ["movies:write"]);
        let inactive = Principal::User(user(1, false));

        assert!(matches!(
            guard(&store).require_permission(&inactive, "movies:write").await,
            Err(ApiError::InactiveAccount)
        ));
    }

    #[tokio::test]
    async fn grants_are_read_fresh() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let principal = Principal::User(user(1, true));
        let requirement = Requirement::permission("movies:write");

        assert!(guard.check(&principal, &requirement).await.is_err());
        store.grant(1, ["movies:write"]);
        assert!(guard.check(&principal, &requirement).await.is_ok());
    }

    struct SlowPermissions;

    #[async_trait::async_trait]
    impl PermissionStore for SlowPermissions {
        async fn permissions_for_user(&self, _user_id: i64) -> Result<crate::store::Permissions, StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(["movies:read"].into_iter().collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_permission_lookup_is_server_error() {
        let guard = Guard::new(Arc::new(SlowPermissions), Duration::from_secs(1));
        let err = guard
            .check(&Principal::User(user(1, true)), &Requirement::permission("movies:read"))
            .await
            .unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let expected = StoreError::Timeout(Duration::from_secs(1)).to_string();
        assert!(matches!(err, ApiError::ServerError(ref detail) if *detail == expected));
    }

    #[tokio::test]
    async fn store_failure_is_server_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let err = guard(&store)
            .require_permission(&Principal::User(user(1, true)), "movies:read")
            .await
            .unwrap_err();
        let expected = StoreError::Unavailable("memory store disabled".into()).to_string();
        assert!(matches!(err, ApiError::ServerError(ref detail) if *detail == expected));
    }
}
