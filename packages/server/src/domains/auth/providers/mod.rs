//! Identity backends.
//!
//! Every backend implements [`IdentityProvider`]. Password operations are a
//! separate capability, [`PasswordProvider`], exposed through
//! [`IdentityProvider::password_provider`]; backends without it return
//! `None` and the service answers with `UnsupportedOperation`.

pub mod local;
pub mod mock;
pub mod remote;

pub use local::LocalProvider;
pub use mock::MockProvider;
pub use remote::RemoteProvider;

use std::sync::Arc;

use async_trait::async_trait;

use super::errors::AuthError;
use super::models::{Roles, User};
use crate::common::RequestScope;
use crate::config::{AuthBackend, AuthConfig};
use crate::kernel::CredentialStore;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_user_by_id(&self, scope: &RequestScope, id: &str) -> Result<User, AuthError>;

    async fn get_user_by_email(&self, scope: &RequestScope, email: &str)
        -> Result<User, AuthError>;

    /// All users with the backend's total count.
    async fn list_users(&self, scope: &RequestScope) -> Result<(Vec<User>, usize), AuthError>;

    /// Create a user, or return the existing one for this email after
    /// reconciling its roles.
    async fn create_user(
        &self,
        scope: &RequestScope,
        email: &str,
        name: &str,
        roles: &Roles,
    ) -> Result<User, AuthError>;

    /// Returns the roles the backend holds for the user afterwards.
    async fn assign_roles(
        &self,
        scope: &RequestScope,
        id: &str,
        roles: &Roles,
    ) -> Result<Roles, AuthError>;

    /// Verify a bearer token and return the subject id it names.
    async fn validate_token(&self, scope: &RequestScope, token: &str) -> Result<String, AuthError>;

    async fn issue_token(
        &self,
        scope: &RequestScope,
        email: &str,
        roles: &Roles,
    ) -> Result<String, AuthError>;

    fn password_provider(&self) -> Option<&dyn PasswordProvider> {
        None
    }
}

#[async_trait]
pub trait PasswordProvider: Send + Sync {
    async fn check_password(
        &self,
        scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError>;

    /// An empty password disables password login for the user.
    async fn set_password(
        &self,
        scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError>;
}

/// Construct the backend named by configuration.
pub fn build_provider(
    config: &AuthConfig,
    store: Arc<dyn CredentialStore>,
) -> Result<Arc<dyn IdentityProvider>, AuthError> {
    let provider: Arc<dyn IdentityProvider> = match config.backend {
        AuthBackend::Local => Arc::new(LocalProvider::new(
            store,
            &config.jwt_secret,
            &config.jwt_issuer,
        )),
        AuthBackend::Remote => Arc::new(RemoteProvider::from_config(&config.remote)?),
        AuthBackend::Mock => Arc::new(MockProvider::new()),
    };

    tracing::info!(provider = provider.name(), "Auth provider ready");
    Ok(provider)
}
