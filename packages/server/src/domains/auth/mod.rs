//! Auth domain - identity backends, tokens and role gates
//!
//! Three interchangeable backends sit behind [`providers::IdentityProvider`]:
//! a hosted remote directory, local users in the credential store, and an
//! in-memory mock. [`AuthService`] fronts the configured one with the
//! identity cache.

pub mod cache;
pub mod data;
pub mod errors;
pub mod jwt;
pub mod models;
pub mod password;
pub mod providers;
pub mod service;

pub use errors::AuthError;
pub use jwt::{Claims, JwtService, TokenError};
pub use models::{Role, Roles, User};
pub use providers::{build_provider, IdentityProvider, PasswordProvider};
pub use service::AuthService;
