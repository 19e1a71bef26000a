//! GraphQL data types for users.

use serde::{Deserialize, Serialize};

use crate::domains::auth::models::{Role, User};

/// GraphQL-friendly representation of a user
#[derive(Debug, Clone, Serialize, Deserialize, juniper::GraphQLObject)]
#[graphql(description = "A user known to the configured identity backend")]
pub struct UserData {
    /// Backend-specific identifier (the email for local users)
    pub id: String,

    pub display_name: String,

    pub email: String,

    pub roles: Vec<Role>,

    /// When the user was created (ISO 8601)
    pub created_at: String,
}

impl From<User> for UserData {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            display_name: u.display_name,
            email: u.email,
            roles: u.roles.into(),
            created_at: u.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, juniper::GraphQLObject)]
pub struct UserListData {
    pub users: Vec<UserData>,

    /// Total reported by the backend; may exceed `users` on partial reads
    pub total_count: i32,
}

#[derive(Debug, Clone, juniper::GraphQLInputObject)]
pub struct NewUserInput {
    pub email: String,
    pub display_name: String,
}
