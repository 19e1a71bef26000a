use std::sync::Arc;

use async_trait::async_trait;

use super::{IdentityProvider, PasswordProvider};
use crate::common::RequestScope;
use crate::domains::auth::errors::AuthError;
use crate::domains::auth::jwt::JwtService;
use crate::domains::auth::models::{Roles, User};
use crate::domains::auth::password::{hash_password, verify_password, PasswordError};
use crate::kernel::dao::{CredentialStore, HistoryEntry, LocalUserInsertParams};

const HISTORY_NAMESPACE: &str = "local_user";

/// Users kept in the credential store; tokens signed with a shared secret.
pub struct LocalProvider {
    store: Arc<dyn CredentialStore>,
    jwt: JwtService,
}

impl LocalProvider {
    pub fn new(store: Arc<dyn CredentialStore>, secret: &str, issuer: &str) -> Self {
        Self {
            store,
            jwt: JwtService::new(secret, issuer),
        }
    }

    pub fn with_jwt(store: Arc<dyn CredentialStore>, jwt: JwtService) -> Self {
        Self { store, jwt }
    }

    async fn create_user_in(
        &self,
        tx: &dyn CredentialStore,
        scope: &RequestScope,
        email: &str,
        name: &str,
        roles: &Roles,
    ) -> Result<User, AuthError> {
        let existing = match tx.local_user_get_by_email(scope, email).await {
            Ok(row) => Some(row),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                return Err(AuthError::store(format!(
                    "cannot look up local user {}",
                    email
                ))(e))
            }
        };

        let (reference, event) = match existing {
            Some(row) => {
                let merged = Roles::from_delimited(&row.roles).union(roles);
                tx.local_user_update_roles(scope, &row.email, &merged.to_delimited())
                    .await
                    .map_err(AuthError::store(format!(
                        "cannot reconcile roles for {}",
                        email
                    )))?;
                (row.email, "roles_reconciled")
            }
            None => {
                let params = LocalUserInsertParams::builder()
                    .id(email)
                    .email(email)
                    .display_name(name)
                    .roles(roles.to_delimited())
                    .build();
                tx.local_user_insert(scope, &params)
                    .await
                    .map_err(AuthError::store(format!("cannot insert local user {}", email)))?;
                (email.to_string(), "created")
            }
        };

        tx.history_insert(
            scope,
            &HistoryEntry::new(HISTORY_NAMESPACE, &reference, event, &reference),
        )
        .await
        .map_err(AuthError::store("cannot record user history"))?;

        let row = tx
            .local_user_get_by_email(scope, email)
            .await
            .map_err(AuthError::store(format!("cannot re-read local user {}", email)))?;

        tx.commit(scope)
            .await
            .map_err(AuthError::store("cannot commit user creation"))?;

        Ok(User::from(row))
    }

    async fn assign_roles_in(
        &self,
        tx: &dyn CredentialStore,
        scope: &RequestScope,
        id: &str,
        roles: &Roles,
    ) -> Result<Roles, AuthError> {
        let row = tx
            .local_user_get_by_id(scope, id)
            .await
            .map_err(AuthError::store(format!("cannot get local user {}", id)))?;

        tx.local_user_update_roles(scope, &row.email, &roles.to_delimited())
            .await
            .map_err(AuthError::store(format!("cannot update roles for {}", row.email)))?;

        tx.history_insert(
            scope,
            &HistoryEntry::new(HISTORY_NAMESPACE, &row.id, "roles_assigned", &row.email),
        )
        .await
        .map_err(AuthError::store("cannot record user history"))?;

        let row = tx
            .local_user_get_by_id(scope, id)
            .await
            .map_err(AuthError::store(format!("cannot re-read local user {}", id)))?;

        tx.commit(scope)
            .await
            .map_err(AuthError::store("cannot commit role assignment"))?;

        Ok(Roles::from_delimited(&row.roles))
    }
}

#[async_trait]
impl IdentityProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get_user_by_id(&self, scope: &RequestScope, id: &str) -> Result<User, AuthError> {
        self.store
            .local_user_get_by_id(scope, id)
            .await
            .map(User::from)
            .map_err(AuthError::store(format!("cannot get local user {}", id)))
    }

    async fn get_user_by_email(
        &self,
        scope: &RequestScope,
        email: &str,
    ) -> Result<User, AuthError> {
        self.store
            .local_user_get_by_email(scope, email)
            .await
            .map(User::from)
            .map_err(AuthError::store(format!(
                "cannot get local user by email {}",
                email
            )))
    }

    async fn list_users(&self, scope: &RequestScope) -> Result<(Vec<User>, usize), AuthError> {
        let rows = self
            .store
            .local_user_list(scope)
            .await
            .map_err(AuthError::store("cannot list local users"))?;

        let users: Vec<User> = rows.into_iter().map(User::from).collect();
        let count = users.len();
        Ok((users, count))
    }

    async fn create_user(
        &self,
        scope: &RequestScope,
        email: &str,
        name: &str,
        roles: &Roles,
    ) -> Result<User, AuthError> {
        let (tx, release) = self
            .store
            .begin_tx(scope)
            .await
            .map_err(AuthError::store("cannot begin transaction"))?;

        let result = self
            .create_user_in(tx.as_ref(), scope, email, name, roles)
            .await;
        release.release().await;

        if let Ok(user) = &result {
            tracing::info!(email = %user.email, roles = %user.roles, "Local user saved");
        }
        result
    }

    async fn assign_roles(
        &self,
        scope: &RequestScope,
        id: &str,
        roles: &Roles,
    ) -> Result<Roles, AuthError> {
        let (tx, release) = self
            .store
            .begin_tx(scope)
            .await
            .map_err(AuthError::store("cannot begin transaction"))?;

        let result = self.assign_roles_in(tx.as_ref(), scope, id, roles).await;
        release.release().await;
        result
    }

    async fn validate_token(&self, scope: &RequestScope, token: &str) -> Result<String, AuthError> {
        scope
            .run(async {
                self.jwt
                    .verify_token(token)
                    .map(|claims| claims.sub)
                    .map_err(AuthError::from)
            })
            .await
    }

    async fn issue_token(
        &self,
        scope: &RequestScope,
        email: &str,
        roles: &Roles,
    ) -> Result<String, AuthError> {
        scope
            .run(async { self.jwt.create_token(email, roles).map_err(AuthError::from) })
            .await
    }

    fn password_provider(&self) -> Option<&dyn PasswordProvider> {
        Some(self)
    }
}

#[async_trait]
impl PasswordProvider for LocalProvider {
    async fn check_password(
        &self,
        scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError> {
        let row = self
            .store
            .local_user_get_by_email(scope, &user.email)
            .await
            .map_err(AuthError::store(format!(
                "cannot get local user by email {}",
                user.email
            )))?;

        if row.pwdhash.is_empty() {
            return Err(AuthError::PasswordNotSet);
        }

        let password = password.to_string();
        let verified =
            tokio::task::spawn_blocking(move || verify_password(&password, &row.pwdhash))
                .await
                .map_err(|e| AuthError::Internal(e.into()))?;

        match verified {
            Ok(()) => Ok(()),
            Err(PasswordError::Mismatch) => Err(AuthError::InvalidPassword),
            Err(e) => Err(AuthError::Internal(e.into())),
        }
    }

    async fn set_password(
        &self,
        scope: &RequestScope,
        user: &User,
        password: &str,
    ) -> Result<(), AuthError> {
        let hash = if password.is_empty() {
            String::new()
        } else {
            let password = password.to_string();
            tokio::task::spawn_blocking(move || hash_password(&password))
                .await
                .map_err(|e| AuthError::Internal(e.into()))?
                .map_err(|e| AuthError::Internal(e.into()))?
        };

        self.store
            .local_user_set_pass(scope, &user.email, &hash)
            .await
            .map_err(AuthError::store(format!(
                "cannot set password for {}",
                user.email
            )))
    }
}
