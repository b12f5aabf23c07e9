//! Authentication and authorization subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization header
//!     → credentials.rs (parse "Bearer <token>", verify by active scheme)
//!         → opaque.rs (hash + store lookup) | signed.rs (HS256 JWT)
//!     → principal.rs (Anonymous | User)
//!     → context.rs (principal stored on the request)
//!     → guard.rs (per-route: authenticated / activated / permission)
//! ```
//!
//! # Design Decisions
//! - One scheme per process, chosen by configuration
//! - Every token rejection looks the same to the caller
//! - Permissions are fetched per check, never cached

pub mod context;
pub mod credentials;
pub mod guard;
pub mod opaque;
pub mod principal;
pub mod signed;

pub use context::CurrentPrincipal;
pub use credentials::{AuthError, CredentialResolver};
pub use guard::{enforce, Gate, Guard, Requirement};
pub use principal::{Principal, User};
pub use signed::SignedTokens;
