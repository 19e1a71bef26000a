// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
//
// Naming convention: Base* for trait names (e.g., BaseIdentityManagement)

use async_trait::async_trait;
use auth0_client::{Connection, CreateUserRequest, ManagementError, Role, User, UserPage};
use jsonwebtoken::DecodingKey;

// =============================================================================
// Identity Management Trait (Infrastructure - remote user directory)
// =============================================================================

#[async_trait]
pub trait BaseIdentityManagement: Send + Sync {
    /// One page of users plus the directory-wide total
    async fn list_users(&self, page: u32, per_page: u32) -> Result<UserPage, ManagementError>;

    async fn users_by_email(&self, email: &str) -> Result<Vec<User>, ManagementError>;

    async fn get_user(&self, user_id: &str) -> Result<User, ManagementError>;

    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, ManagementError>;

    /// Returns an error with `is_conflict()` when the email is taken
    async fn create_user(&self, request: &CreateUserRequest) -> Result<User, ManagementError>;

    /// All roles defined in the directory
    async fn list_roles(&self) -> Result<Vec<Role>, ManagementError>;

    async fn assign_roles(&self, user_id: &str, role_ids: &[String])
        -> Result<(), ManagementError>;

    async fn get_connection(&self, connection_id: &str) -> Result<Connection, ManagementError>;
}

// =============================================================================
// Signing Keys Trait (Infrastructure - token verification keys)
// =============================================================================

#[async_trait]
pub trait BaseSigningKeys: Send + Sync {
    /// Verification key for the `kid` named in a token header
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ManagementError>;
}
