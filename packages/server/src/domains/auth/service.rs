use std::future::Future;
use std::sync::Arc;

use super::cache::IdentityCache;
use super::errors::AuthError;
use super::models::{Role, Roles, User};
use super::providers::IdentityProvider;
use crate::common::RequestScope;

/// Front door for identity operations. Wraps one provider with the
/// identity cache and enforces role gates.
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    cache: IdentityCache,
}

impl AuthService {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self::with_cache(provider, IdentityCache::in_memory())
    }

    pub fn with_cache(provider: Arc<dyn IdentityProvider>, cache: IdentityCache) -> Self {
        Self { provider, cache }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn get_users(&self, scope: &RequestScope) -> Result<(Vec<User>, usize), AuthError> {
        self.provider.list_users(scope).await
    }

    pub async fn get_user(&self, scope: &RequestScope, email: &str) -> Result<User, AuthError> {
        if let Some(user) = self.cache.get_by_email(email).await? {
            return Ok(user);
        }

        let user = self.provider.get_user_by_email(scope, email).await?;
        self.cache.put(&user).await?;
        Ok(user)
    }

    pub async fn get_user_by_id(&self, scope: &RequestScope, id: &str) -> Result<User, AuthError> {
        if let Some(user) = self.cache.get_by_id(id).await? {
            return Ok(user);
        }

        let user = self.provider.get_user_by_id(scope, id).await?;
        self.cache.put(&user).await?;
        Ok(user)
    }

    pub async fn get_user_roles(
        &self,
        scope: &RequestScope,
        email: &str,
    ) -> Result<Roles, AuthError> {
        Ok(self.get_user(scope, email).await?.roles)
    }

    pub async fn create_user(
        &self,
        scope: &RequestScope,
        email: &str,
        name: &str,
        roles: &Roles,
    ) -> Result<User, AuthError> {
        let user = self.provider.create_user(scope, email, name, roles).await?;
        self.cache.invalidate(&user).await?;
        Ok(user)
    }

    /// Resolve `email`, hand the roles to the provider and drop the cached
    /// identity so the next lookup sees the change.
    pub async fn assign_roles(
        &self,
        scope: &RequestScope,
        email: &str,
        roles: &Roles,
    ) -> Result<Roles, AuthError> {
        let user = self.provider.get_user_by_email(scope, email).await?;
        let confirmed = self.provider.assign_roles(scope, &user.id, roles).await?;
        self.cache.invalidate(&user).await?;

        tracing::info!(email = %email, roles = %confirmed, "Roles assigned");
        Ok(confirmed)
    }

    pub async fn issue_token(&self, scope: &RequestScope, user: &User) -> Result<String, AuthError> {
        self.provider
            .issue_token(scope, &user.email, &user.roles)
            .await
    }

    /// Subject id named by a valid token.
    pub async fn validate_token(
        &self,
        scope: &RequestScope,
        token: &str,
    ) -> Result<String, AuthError> {
        self.provider.validate_token(scope, token).await
    }

    pub async fn check_password(
        &self,
        scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError> {
        let passwords = self
            .provider
            .password_provider()
            .ok_or(AuthError::UnsupportedOperation(
                "password login not available with this backend",
            ))?;
        passwords.check_password(scope, user, password).await
    }

    pub async fn set_password(
        &self,
        scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError> {
        let passwords = self
            .provider
            .password_provider()
            .ok_or(AuthError::UnsupportedOperation(
                "password change not available with this backend",
            ))?;
        passwords.set_password(scope, user, password).await?;
        self.cache.invalidate(user).await
    }

    /// Password login: resolve the user, check the password, issue a token.
    pub async fn login(
        &self,
        scope: &RequestScope,
        email: &str,
        password: &str,
    ) -> Result<String, AuthError> {
        let user = self.provider.get_user_by_email(scope, email).await?;
        self.check_password(scope, &user, password).await?;
        self.issue_token(scope, &user).await
    }

    /// Run `next` only if the scope's identity holds `role`.
    pub async fn has_role<F, Fut, T, E>(
        &self,
        scope: &RequestScope,
        role: Role,
        next: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<AuthError>,
    {
        match scope.identity() {
            Some(user) if user.has_role(role) => next().await,
            Some(user) => {
                tracing::debug!(email = %user.email, required = %role, "Role check failed");
                Err(AuthError::NotAuthorized.into())
            }
            None => Err(AuthError::NotAuthorized.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domains::auth::providers::MockProvider;

    fn service() -> AuthService {
        AuthService::new(Arc::new(MockProvider::new()))
    }

    #[tokio::test]
    async fn test_gate_without_identity_never_runs_next() {
        let service = service();
        let calls = AtomicUsize::new(0);

        let res: Result<(), AuthError> = service
            .has_role(&RequestScope::new(), Role::User, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(res, Err(AuthError::NotAuthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_gate_checks_role() {
        let service = service();
        let scope = RequestScope::new()
            .with_identity(User::new("u3", "User Three", "user.three@example.com", [Role::User]));

        let denied: Result<u32, AuthError> = service
            .has_role(&scope, Role::Admin, || async { Ok(1) })
            .await;
        assert!(matches!(denied, Err(AuthError::NotAuthorized)));

        let allowed: Result<u32, AuthError> = service
            .has_role(&scope, Role::User, || async { Ok(2) })
            .await;
        assert_eq!(allowed.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_super_admin_passes_every_gate() {
        let service = service();
        let scope = RequestScope::new()
            .with_identity(User::new("u1", "User One", "user.one@example.com", [Role::SuperAdmin]));

        for role in Role::ALL {
            let res: Result<(), AuthError> =
                service.has_role(&scope, role, || async { Ok(()) }).await;
            assert!(res.is_ok(), "super admin denied {}", role);
        }
    }

    #[tokio::test]
    async fn test_assign_roles_invalidates_cache() {
        let service = service();
        let scope = RequestScope::new();

        let before = service.get_user(&scope, "user.three@example.com").await.unwrap();
        assert_eq!(before.roles, Roles::from([Role::User]));

        service
            .assign_roles(&scope, "user.three@example.com", &Roles::from([Role::Admin]))
            .await
            .unwrap();

        let after = service.get_user_by_id(&scope, "u3").await.unwrap();
        assert_eq!(after.roles, Roles::from([Role::Admin]));
        assert_eq!(
            service
                .get_user_roles(&scope, "user.three@example.com")
                .await
                .unwrap(),
            Roles::from([Role::Admin])
        );
    }

    #[tokio::test]
    async fn test_assign_roles_unknown_email() {
        let service = service();
        let err = service
            .assign_roles(&RequestScope::new(), "ghost@example.com", &Roles::from([Role::User]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_login_round_trip() {
        let service = service();
        let scope = RequestScope::new();

        let token = service
            .login(&scope, "user.two@example.com", "123")
            .await
            .unwrap();
        assert_eq!(service.validate_token(&scope, &token).await.unwrap(), "u2");

        let err = service
            .login(&scope, "user.two@example.com", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidPassword));
    }

    #[tokio::test]
    async fn test_password_ops_need_capability() {
        use crate::domains::auth::providers::RemoteProvider;
        use crate::kernel::test_dependencies::{MockIdentityManagement, MockSigningKeys};

        let service = AuthService::new(Arc::new(RemoteProvider::new(
            Arc::new(MockIdentityManagement::new()),
            Arc::new(MockSigningKeys::empty()),
            "https://tenant.example.com/",
            "",
            "con_1",
        )));
        let scope = RequestScope::new();
        let user = User::new("auth0|1", "A", "a@ex.com", [Role::User]);

        let err = service.check_password(&scope, &user, "pw").await.unwrap_err();
        assert_eq!(err.to_string(), "password login not available with this backend");

        let err = service.set_password(&scope, &user, "pw").await.unwrap_err();
        assert_eq!(err.to_string(), "password change not available with this backend");
    }

    #[tokio::test]
    async fn test_create_user_is_idempotent_on_mock() {
        let service = service();
        let scope = RequestScope::new();

        let first = service
            .create_user(&scope, "new@example.com", "New", &Roles::from([Role::User]))
            .await
            .unwrap();
        let second = service
            .create_user(&scope, "new@example.com", "New", &Roles::from([Role::User]))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(service.get_users(&scope).await.unwrap().1, 4);
    }
}
