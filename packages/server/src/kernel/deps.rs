//! Adapters binding external clients to the kernel traits.

use std::sync::Arc;

use async_trait::async_trait;
use auth0_client::{
    Connection, CreateUserRequest, JwksCache, ManagementClient, ManagementError, Role, User,
    UserPage,
};
use jsonwebtoken::DecodingKey;

use crate::kernel::{BaseIdentityManagement, BaseSigningKeys};

// =============================================================================
// ManagementClient Adapter (implements BaseIdentityManagement trait)
// =============================================================================

/// Wrapper around ManagementClient that implements BaseIdentityManagement trait
pub struct Auth0Adapter(pub Arc<ManagementClient>);

impl Auth0Adapter {
    pub fn new(client: Arc<ManagementClient>) -> Self {
        Self(client)
    }
}

#[async_trait]
impl BaseIdentityManagement for Auth0Adapter {
    async fn list_users(&self, page: u32, per_page: u32) -> Result<UserPage, ManagementError> {
        self.0.list_users(page, per_page).await
    }

    async fn users_by_email(&self, email: &str) -> Result<Vec<User>, ManagementError> {
        self.0.users_by_email(email).await
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ManagementError> {
        self.0.get_user(user_id).await
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, ManagementError> {
        self.0.user_roles(user_id).await
    }

    async fn create_user(&self, request: &CreateUserRequest) -> Result<User, ManagementError> {
        self.0.create_user(request).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>, ManagementError> {
        self.0.list_roles().await
    }

    async fn assign_roles(
        &self,
        user_id: &str,
        role_ids: &[String],
    ) -> Result<(), ManagementError> {
        self.0.assign_roles(user_id, role_ids).await
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Connection, ManagementError> {
        self.0.get_connection(connection_id).await
    }
}

// =============================================================================
// JwksCache Adapter (implements BaseSigningKeys trait)
// =============================================================================

pub struct JwksAdapter(pub Arc<JwksCache>);

impl JwksAdapter {
    pub fn new(cache: Arc<JwksCache>) -> Self {
        Self(cache)
    }
}

#[async_trait]
impl BaseSigningKeys for JwksAdapter {
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ManagementError> {
        self.0.decoding_key(kid).await
    }
}
