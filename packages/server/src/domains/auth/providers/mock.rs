use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use tokio::sync::RwLock;

use super::{IdentityProvider, PasswordProvider};
use crate::common::RequestScope;
use crate::domains::auth::errors::AuthError;
use crate::domains::auth::jwt::TokenError;
use crate::domains::auth::models::{Role, Roles, User};

/// Tokens issued by the mock backend are this prefix followed by the email.
pub const MOCK_TOKEN_PREFIX: &str = "mocktoken:";

const SEED_PASSWORD: &str = "123";

/// In-memory backend for development and tests. Ships with three seeded
/// users, one per role.
pub struct MockProvider {
    users: RwLock<Vec<User>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        let seed = [
            ("u1", "User One", "user.one@example.com", Role::SuperAdmin),
            ("u2", "User Two", "user.two@example.com", Role::Admin),
            ("u3", "User Three", "user.three@example.com", Role::User),
        ];

        let users = seed
            .into_iter()
            .map(|(id, name, email, role)| {
                let mut user = User::new(id, name, email, [role]);
                user.pwd_hash = SEED_PASSWORD.to_string();
                user
            })
            .collect();

        Self {
            users: RwLock::new(users),
        }
    }

    async fn find(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users.read().await.iter().find(|u| pred(u)).cloned()
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_user_by_id(&self, _scope: &RequestScope, id: &str) -> Result<User, AuthError> {
        self.find(|u| u.id == id)
            .await
            .ok_or_else(|| AuthError::NotFound(id.to_string()))
    }

    async fn get_user_by_email(
        &self,
        _scope: &RequestScope,
        email: &str,
    ) -> Result<User, AuthError> {
        self.find(|u| u.email.eq_ignore_ascii_case(email))
            .await
            .ok_or_else(|| AuthError::NotFound(email.to_string()))
    }

    async fn list_users(&self, _scope: &RequestScope) -> Result<(Vec<User>, usize), AuthError> {
        let users = self.users.read().await.clone();
        let count = users.len();
        Ok((users, count))
    }

    async fn create_user(
        &self,
        _scope: &RequestScope,
        email: &str,
        name: &str,
        roles: &Roles,
    ) -> Result<User, AuthError> {
        let mut users = self.users.write().await;
        if let Some(existing) = users.iter().find(|u| u.email.eq_ignore_ascii_case(email)) {
            return Ok(existing.clone());
        }

        let user = User::new(email, name, email, roles.clone());
        users.push(user.clone());
        Ok(user)
    }

    async fn assign_roles(
        &self,
        _scope: &RequestScope,
        id: &str,
        roles: &Roles,
    ) -> Result<Roles, AuthError> {
        let mut users = self.users.write().await;
        let user = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AuthError::NotFound(id.to_string()))?;

        user.roles = roles.clone();
        Ok(user.roles.clone())
    }

    async fn validate_token(&self, _scope: &RequestScope, token: &str) -> Result<String, AuthError> {
        let email = token
            .strip_prefix(MOCK_TOKEN_PREFIX)
            .ok_or_else(|| TokenError::Malformed(ErrorKind::InvalidToken.into()))?;

        self.find(|u| u.email.eq_ignore_ascii_case(email))
            .await
            .map(|u| u.id)
            .ok_or_else(|| TokenError::Rejected(ErrorKind::InvalidSubject.into()).into())
    }

    async fn issue_token(
        &self,
        _scope: &RequestScope,
        email: &str,
        _roles: &Roles,
    ) -> Result<String, AuthError> {
        Ok(format!("{}{}", MOCK_TOKEN_PREFIX, email))
    }

    fn password_provider(&self) -> Option<&dyn PasswordProvider> {
        Some(self)
    }
}

/// Plaintext comparison; the mock never hashes.
#[async_trait]
impl PasswordProvider for MockProvider {
    async fn check_password(
        &self,
        scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError> {
        let stored = self.get_user_by_email(scope, &user.email).await?;
        if stored.pwd_hash.is_empty() {
            return Err(AuthError::PasswordNotSet);
        }
        if stored.pwd_hash != password {
            return Err(AuthError::InvalidPassword);
        }
        Ok(())
    }

    async fn set_password(
        &self,
        _scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError> {
        let mut users = self.users.write().await;
        let stored = users
            .iter_mut()
            .find(|u| u.email.eq_ignore_ascii_case(&user.email))
            .ok_or_else(|| AuthError::NotFound(user.email.clone()))?;
        stored.pwd_hash = password.to_string();
        Ok(())
    }
}
