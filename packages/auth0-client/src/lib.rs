//! Pure Auth0 Management API v2 client.
//!
//! Covers the handful of endpoints the budget server needs: user lookup and
//! creation, role listing and assignment, connection lookup, plus a cached
//! JWKS fetcher for verifying access tokens.
//!
//! # Example
//!
//! ```rust,ignore
//! use auth0_client::{ManagementClient, ManagementOptions};
//!
//! let client = ManagementClient::new(ManagementOptions::new("tenant.eu.auth0.com", "id", "secret"))?;
//! let page = client.list_users(0, 50).await?;
//! println!("{} users", page.total);
//! ```

pub mod error;
pub mod jwks;
pub mod types;

pub use error::{ManagementError, Result};
pub use jwks::JwksCache;
pub use types::{Connection, CreateUserRequest, Role, User, UserPage};

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use types::{AssignRolesRequest, ClientCredentialsRequest, TokenResponse};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Renew the management token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct ManagementOptions {
    /// Tenant domain, with or without scheme (`tenant.eu.auth0.com`).
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
}

impl ManagementOptions {
    pub fn new(
        domain: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Normalize a tenant domain into a base URL. A bare host gets `https://`.
pub fn base_url(domain: &str) -> Result<Url> {
    let trimmed = domain.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    Url::parse(&with_scheme).map_err(|e| ManagementError::Url(format!("{}: {}", domain, e)))
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct ManagementClient {
    http: reqwest::Client,
    base: Url,
    options: ManagementOptions,
    token: RwLock<Option<CachedToken>>,
}

impl ManagementClient {
    pub fn new(options: ManagementOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        let base = base_url(&options.domain)?;

        Ok(Self {
            http,
            base,
            options,
            token: RwLock::new(None),
        })
    }

    /// Base URL of the tenant, e.g. `https://tenant.eu.auth0.com/`.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// List one page of users, with the total count across all pages.
    pub async fn list_users(&self, page: u32, per_page: u32) -> Result<UserPage> {
        let mut url = self.endpoint(&["api", "v2", "users"])?;
        url.query_pairs_mut()
            .append_pair("include_totals", "true")
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());

        self.send_json(self.authorized(Method::GET, url).await?).await
    }

    pub async fn users_by_email(&self, email: &str) -> Result<Vec<User>> {
        let mut url = self.endpoint(&["api", "v2", "users-by-email"])?;
        url.query_pairs_mut().append_pair("email", email);

        self.send_json(self.authorized(Method::GET, url).await?).await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        let url = self.endpoint(&["api", "v2", "users", user_id])?;
        self.send_json(self.authorized(Method::GET, url).await?).await
    }

    pub async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>> {
        let url = self.endpoint(&["api", "v2", "users", user_id, "roles"])?;
        self.send_json(self.authorized(Method::GET, url).await?).await
    }

    /// Create a user. A 409 from the API surfaces as an error with
    /// [`ManagementError::is_conflict`] set.
    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<User> {
        let url = self.endpoint(&["api", "v2", "users"])?;
        let builder = self.authorized(Method::POST, url).await?.json(request);
        self.send_json(builder).await
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        let url = self.endpoint(&["api", "v2", "roles"])?;
        self.send_json(self.authorized(Method::GET, url).await?).await
    }

    pub async fn assign_roles(&self, user_id: &str, role_ids: &[String]) -> Result<()> {
        let url = self.endpoint(&["api", "v2", "users", user_id, "roles"])?;
        let builder = self
            .authorized(Method::POST, url)
            .await?
            .json(&AssignRolesRequest { roles: role_ids });
        let resp = builder.send().await?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn get_connection(&self, connection_id: &str) -> Result<Connection> {
        let url = self.endpoint(&["api", "v2", "connections", connection_id])?;
        self.send_json(self.authorized(Method::GET, url).await?).await
    }

    /// Build an endpoint URL; each segment is percent-encoded, so provider
    /// ids like `auth0|abc` are safe to pass.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ManagementError::Url(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn authorized(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let resp = check_status(builder.send().await?).await?;
        Ok(resp.json().await?)
    }

    /// Client-credentials token for the management audience, cached until
    /// shortly before expiry.
    async fn access_token(&self) -> Result<String> {
        {
            let cached = self.token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut slot = self.token.write().await;
        if let Some(token) = slot.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let url = self.endpoint(&["oauth", "token"])?;
        let audience = self.endpoint(&["api", "v2", ""])?;
        let body = ClientCredentialsRequest {
            grant_type: "client_credentials",
            client_id: &self.options.client_id,
            client_secret: &self.options.client_secret,
            audience: audience.as_str(),
        };

        tracing::debug!(domain = %self.base, "Requesting Auth0 management token");
        let resp = check_status(self.http.post(url).json(&body).send().await?).await?;
        let token: TokenResponse = resp.json().await?;

        let lifetime = (token.expires_in - TOKEN_EXPIRY_MARGIN_SECS).max(0);
        *slot = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        });

        Ok(token.access_token)
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(ManagementError::Api {
        status: status.as_u16(),
        message: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    async fn client_for(server: &ServerGuard) -> ManagementClient {
        ManagementClient::new(ManagementOptions::new(server.url(), "client", "secret")).unwrap()
    }

    async fn mock_token(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"mgmt-token","expires_in":86400,"token_type":"Bearer"}"#)
            .create_async()
            .await
    }

    #[test]
    fn test_base_url_adds_scheme() {
        assert_eq!(
            base_url("tenant.eu.auth0.com").unwrap().as_str(),
            "https://tenant.eu.auth0.com/"
        );
        assert_eq!(
            base_url("http://127.0.0.1:1234/").unwrap().as_str(),
            "http://127.0.0.1:1234/"
        );
    }

    #[tokio::test]
    async fn test_list_users_sends_totals_and_bearer() {
        let mut server = Server::new_async().await;
        let token = mock_token(&mut server).await;
        let users = server
            .mock("GET", "/api/v2/users")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("include_totals".into(), "true".into()),
                Matcher::UrlEncoded("page".into(), "0".into()),
            ]))
            .match_header("authorization", "Bearer mgmt-token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"start":0,"limit":50,"total":2,"users":[
                    {"user_id":"a","email":"a@ex.com","name":"A","created_at":"2024-01-02T03:04:05.000Z"},
                    {"user_id":"b","email":"b@ex.com","name":"B"}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server).await;
        let page = client.list_users(0, 50).await.unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(page.users.len(), 2);
        assert_eq!(page.users[0].email, "a@ex.com");
        assert!(page.users[0].created_at.is_some());
        assert!(page.users[1].created_at.is_none());
        users.assert_async().await;
        token.assert_async().await;
    }

    #[tokio::test]
    async fn test_management_token_is_cached() {
        let mut server = Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"mgmt-token","expires_in":86400}"#)
            .expect(1)
            .create_async()
            .await;
        let roles = server
            .mock("GET", "/api/v2/roles")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"id":"rol_1","name":"admin"}]"#)
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server).await;
        client.list_roles().await.unwrap();
        let listed = client.list_roles().await.unwrap();

        assert_eq!(listed[0].name, "admin");
        token.assert_async().await;
        roles.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_user_conflict() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        server
            .mock("POST", "/api/v2/users")
            .with_status(409)
            .with_body(r#"{"statusCode":409,"message":"The user already exists."}"#)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let err = client
            .create_user(&CreateUserRequest {
                connection: "Username-Password-Authentication".into(),
                email: "a@ex.com".into(),
                name: "A".into(),
                password: "pw".into(),
                email_verified: false,
            })
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_assign_roles_posts_role_ids() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        let assign = server
            .mock("POST", "/api/v2/users/abc/roles")
            .match_body(Matcher::Json(serde_json::json!({"roles": ["rol_1", "rol_2"]})))
            .with_status(204)
            .create_async()
            .await;

        let client = client_for(&server).await;
        client
            .assign_roles("abc", &["rol_1".to_string(), "rol_2".to_string()])
            .await
            .unwrap();

        assign.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_user_not_found() {
        let mut server = Server::new_async().await;
        let _token = mock_token(&mut server).await;
        server
            .mock("GET", "/api/v2/users/missing")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let err = client.get_user("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
