use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user record as returned by the Management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// One page of `GET /api/v2/users?include_totals=true`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPage {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub strategy: Option<String>,
}

/// Body for `POST /api/v2/users`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateUserRequest {
    pub connection: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AssignRolesRequest<'a> {
    pub roles: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ClientCredentialsRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub audience: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
}
