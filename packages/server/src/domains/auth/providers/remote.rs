//! Hosted identity directory reached through its management API.
//!
//! Bearer tokens are RS256 JWTs signed by the tenant; verification keys come
//! from the tenant's JWKS endpoint. Users are created against a configured
//! connection with a throwaway password, so they sign in through the hosted
//! flow rather than through this service.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use auth0_client::jwks::DEFAULT_REFRESH_INTERVAL;
use auth0_client::{CreateUserRequest, JwksCache, ManagementClient, ManagementOptions};
use chrono::Utc;
use futures::future::join_all;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use uuid::Uuid;

use super::IdentityProvider;
use crate::common::RequestScope;
use crate::config::RemoteAuthConfig;
use crate::domains::auth::errors::AuthError;
use crate::domains::auth::jwt::TokenError;
use crate::domains::auth::models::{Role, Roles, User};
use crate::kernel::{Auth0Adapter, BaseIdentityManagement, BaseSigningKeys, JwksAdapter};

const PAGE_SIZE: u32 = 50;

/// Clock skew tolerated on `exp` and `nbf`.
const TOKEN_LEEWAY_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct RemoteClaims {
    sub: String,
}

pub struct RemoteProvider {
    api: Arc<dyn BaseIdentityManagement>,
    keys: Arc<dyn BaseSigningKeys>,
    issuer: String,
    audience: String,
    connection_id: String,
}

impl RemoteProvider {
    pub fn new(
        api: Arc<dyn BaseIdentityManagement>,
        keys: Arc<dyn BaseSigningKeys>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            api,
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            connection_id: connection_id.into(),
        }
    }

    pub fn from_config(config: &RemoteAuthConfig) -> Result<Self, AuthError> {
        let client = ManagementClient::new(ManagementOptions::new(
            &config.domain,
            &config.client_id,
            &config.client_secret,
        ))
        .map_err(AuthError::remote("cannot build management client"))?;
        let issuer = client.base().to_string();

        let jwks = JwksCache::new(&config.domain, DEFAULT_REFRESH_INTERVAL)
            .map_err(AuthError::remote("cannot build key set client"))?;

        Ok(Self::new(
            Arc::new(Auth0Adapter::new(Arc::new(client))),
            Arc::new(JwksAdapter::new(Arc::new(jwks))),
            issuer,
            &config.audience,
            &config.connection_id,
        ))
    }

    async fn roles_of(&self, user_id: &str) -> Result<Roles, AuthError> {
        let remote = self
            .api
            .user_roles(user_id)
            .await
            .map_err(AuthError::remote(format!("cannot get roles for {}", user_id)))?;
        Ok(map_roles(remote.iter().map(|r| r.name.as_str())))
    }

    async fn to_user(&self, remote: auth0_client::User) -> Result<User, AuthError> {
        let roles = self.roles_of(&remote.user_id).await?;
        Ok(into_user(remote, roles))
    }

    async fn fetch_by_email(&self, email: &str) -> Result<auth0_client::User, AuthError> {
        self.api
            .users_by_email(email)
            .await
            .map_err(AuthError::remote(format!("cannot get remote user by email {}", email)))?
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::NotFound(email.to_string()))
    }

    async fn list_all(&self) -> Result<(Vec<User>, usize), AuthError> {
        let mut users = Vec::new();
        let mut page = 0;
        loop {
            let batch = self
                .api
                .list_users(page, PAGE_SIZE)
                .await
                .map_err(AuthError::remote("cannot list remote users"))?;
            let fetched = batch.users.len();
            let total = batch.total.max(0) as usize;

            // Role lookups run concurrently within one page only. A user
            // whose roles cannot be read is listed without roles.
            let lookups = batch.users.iter().map(|u| self.roles_of(&u.user_id));
            let roles = join_all(lookups).await;

            users.extend(batch.users.into_iter().zip(roles).map(|(remote, roles)| {
                let roles = roles.unwrap_or_else(|e| {
                    tracing::error!(user_id = %remote.user_id, error = %e, "Failed to get user roles");
                    Roles::default()
                });
                into_user(remote, roles)
            }));

            if fetched < PAGE_SIZE as usize || users.len() >= total {
                return Ok((users, total));
            }
            page += 1;
        }
    }

    /// Remote role ids for `roles`. Every requested role must be defined in
    /// the directory.
    async fn role_ids(&self, roles: &Roles) -> Result<Vec<String>, AuthError> {
        let defined = self
            .api
            .list_roles()
            .await
            .map_err(AuthError::remote("cannot list remote roles"))?;

        roles
            .iter()
            .map(|role| {
                defined
                    .iter()
                    .find(|d| d.name.parse::<Role>().ok() == Some(*role))
                    .map(|d| d.id.clone())
                    .ok_or_else(|| {
                        AuthError::Internal(anyhow!(
                            "roles missing in remote backend, provision them first: {}",
                            role
                        ))
                    })
            })
            .collect()
    }

    async fn grant(&self, user_id: &str, roles: &Roles) -> Result<Roles, AuthError> {
        let ids = self.role_ids(roles).await?;
        if !ids.is_empty() {
            self.api
                .assign_roles(user_id, &ids)
                .await
                .map_err(AuthError::remote(format!("cannot assign roles to {}", user_id)))?;
        }
        self.roles_of(user_id).await
    }

    async fn create(&self, email: &str, name: &str, roles: &Roles) -> Result<User, AuthError> {
        let connection = self
            .api
            .get_connection(&self.connection_id)
            .await
            .map_err(AuthError::remote(format!(
                "cannot get connection {}",
                self.connection_id
            )))?;

        let request = CreateUserRequest {
            connection: connection.name,
            email: email.to_string(),
            name: name.to_string(),
            password: throwaway_password(),
            email_verified: false,
        };

        let created = match self.api.create_user(&request).await {
            Ok(user) => user,
            Err(e) if e.is_conflict() => {
                tracing::info!(email = %email, "Remote user already exists, reusing");
                self.fetch_by_email(email).await?
            }
            Err(e) => {
                return Err(AuthError::remote(format!(
                    "cannot create remote user {}",
                    email
                ))(e))
            }
        };

        self.grant(&created.user_id, roles).await?;
        let user = self.to_user(self.fetch_by_email(email).await?).await?;
        tracing::info!(user_id = %user.id, roles = %user.roles, "Remote user saved");
        Ok(user)
    }

    async fn verify(&self, token: &str) -> Result<String, AuthError> {
        let header = decode_header(token).map_err(TokenError::Malformed)?;
        let kid = header.kid.ok_or(TokenError::MissingKeyId)?;
        let key = self
            .keys
            .decoding_key(&kid)
            .await
            .map_err(|e| TokenError::KeyUnavailable(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        if self.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[&self.audience]);
        }
        validation.validate_nbf = true;
        validation.leeway = TOKEN_LEEWAY_SECS;

        let data =
            decode::<RemoteClaims>(token, &key, &validation).map_err(TokenError::from_decode)?;

        // Custom claims (tenant-specific namespaces) are not checked yet.
        Ok(data.claims.sub)
    }
}

#[async_trait]
impl IdentityProvider for RemoteProvider {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn get_user_by_id(&self, scope: &RequestScope, id: &str) -> Result<User, AuthError> {
        scope
            .run(async {
                let remote = self
                    .api
                    .get_user(id)
                    .await
                    .map_err(AuthError::remote(format!("cannot get remote user {}", id)))?;
                self.to_user(remote).await
            })
            .await
    }

    async fn get_user_by_email(
        &self,
        scope: &RequestScope,
        email: &str,
    ) -> Result<User, AuthError> {
        scope
            .run(async {
                let remote = self.fetch_by_email(email).await?;
                self.to_user(remote).await
            })
            .await
    }

    async fn list_users(&self, scope: &RequestScope) -> Result<(Vec<User>, usize), AuthError> {
        scope.run(self.list_all()).await
    }

    async fn create_user(
        &self,
        scope: &RequestScope,
        email: &str,
        name: &str,
        roles: &Roles,
    ) -> Result<User, AuthError> {
        scope.run(self.create(email, name, roles)).await
    }

    async fn assign_roles(
        &self,
        scope: &RequestScope,
        id: &str,
        roles: &Roles,
    ) -> Result<Roles, AuthError> {
        scope.run(self.grant(id, roles)).await
    }

    async fn validate_token(&self, scope: &RequestScope, token: &str) -> Result<String, AuthError> {
        scope.run(self.verify(token)).await
    }

    async fn issue_token(
        &self,
        _scope: &RequestScope,
        _email: &str,
        _roles: &Roles,
    ) -> Result<String, AuthError> {
        Err(AuthError::UnsupportedOperation(
            "remote backend does not issue tokens",
        ))
    }
}

fn map_roles<'a>(names: impl Iterator<Item = &'a str>) -> Roles {
    names.filter_map(|name| name.parse().ok()).collect()
}

fn into_user(remote: auth0_client::User, roles: Roles) -> User {
    let mut user = User::new(remote.user_id, remote.name, remote.email, roles);
    user.created_at = remote.created_at.unwrap_or_else(Utc::now);
    user
}

/// Users never sign in with this password; it only satisfies the
/// connection's password policy.
fn throwaway_password() -> String {
    format!(
        "{}-{}-Aa1!",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}
