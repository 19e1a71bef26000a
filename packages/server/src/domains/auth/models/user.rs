use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::{Role, Roles};
use crate::kernel::dao::LocalUser;

/// A resolved identity.
///
/// `email` is the lookup key shared by every backend. `id` is opaque and
/// backend-specific: the email itself for local users, a provider id for
/// remote ones.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub roles: Roles,
    pub created_at: DateTime<Utc>,
    /// Only populated by the local backend; never leaves the process.
    #[serde(skip)]
    pub(crate) pwd_hash: String,
}

impl User {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        email: impl Into<String>,
        roles: impl Into<Roles>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            email: email.into(),
            roles: roles.into(),
            created_at: Utc::now(),
            pwd_hash: String::new(),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.has(role)
    }

    /// False when password login is disabled for this user.
    pub fn has_password(&self) -> bool {
        !self.pwd_hash.is_empty()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("roles", &self.roles)
            .field("created_at", &self.created_at)
            .field("pwd_hash", &"<redacted>")
            .finish()
    }
}

impl From<LocalUser> for User {
    fn from(row: LocalUser) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name,
            email: row.email,
            roles: Roles::from_delimited(&row.roles),
            created_at: row.created_at,
            pwd_hash: row.pwdhash,
        }
    }
}
