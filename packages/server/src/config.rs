use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::fmt;
use std::str::FromStr;

/// Which identity backend the auth service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBackend {
    Local,
    Remote,
    Mock,
}

impl AuthBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthBackend::Local => "local",
            AuthBackend::Remote => "remote",
            AuthBackend::Mock => "mock",
        }
    }
}

impl fmt::Display for AuthBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(AuthBackend::Local),
            "remote" | "auth0" => Ok(AuthBackend::Remote),
            "mock" => Ok(AuthBackend::Mock),
            other => bail!("unsupported auth backend: {}", other),
        }
    }
}

/// Credentials for the remote identity-management API.
#[derive(Debug, Clone, Default)]
pub struct RemoteAuthConfig {
    pub domain: String,
    pub client_id: String,
    pub client_secret: String,
    pub audience: String,
    pub connection_id: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub backend: AuthBackend,
    pub remote: RemoteAuthConfig,
    /// Symmetric secret for locally issued tokens.
    pub jwt_secret: String,
    pub jwt_issuer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. `info` or `info,budget_core=debug`.
    pub level: String,
    pub format: LogFormat,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub enable_playground: bool,
    pub allowed_origins: Vec<String>,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
    pub version: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let backend: AuthBackend = env::var("AUTH_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse()
            .context("AUTH_BACKEND must be one of local, remote, mock")?;

        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            enable_playground: env::var("ENABLE_PLAYGROUND")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            auth: AuthConfig {
                backend,
                remote: RemoteAuthConfig {
                    domain: env::var("AUTH_DOMAIN").unwrap_or_default(),
                    client_id: env::var("AUTH_CLIENT_ID").unwrap_or_default(),
                    client_secret: env::var("AUTH_CLIENT_SECRET").unwrap_or_default(),
                    audience: env::var("AUTH_AUDIENCE").unwrap_or_default(),
                    connection_id: env::var("AUTH_CONNECTION_ID").unwrap_or_default(),
                },
                jwt_secret: env::var("JWT_SECRET").unwrap_or_default(),
                jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "local".to_string()),
            },
            logging: LoggingConfig {
                level: env::var("RUST_LOG")
                    .or_else(|_| env::var("LOG_LEVEL"))
                    .unwrap_or_else(|_| "info".to_string()),
                format,
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check that the fields the selected backend needs are present.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL is required");
        }

        match self.auth.backend {
            AuthBackend::Local => {
                if self.auth.jwt_secret.is_empty() {
                    bail!("JWT_SECRET is required for the local auth backend");
                }
            }
            AuthBackend::Remote => {
                let remote = &self.auth.remote;
                for (name, value) in [
                    ("AUTH_DOMAIN", &remote.domain),
                    ("AUTH_CLIENT_ID", &remote.client_id),
                    ("AUTH_CLIENT_SECRET", &remote.client_secret),
                    ("AUTH_AUDIENCE", &remote.audience),
                    ("AUTH_CONNECTION_ID", &remote.connection_id),
                ] {
                    if value.is_empty() {
                        bail!("{} is required for the remote auth backend", name);
                    }
                }
            }
            AuthBackend::Mock => {}
        }

        Ok(())
    }

    /// In-memory store with the mock backend; nothing external required.
    pub fn for_tests() -> Self {
        Self {
            database_url: "memory://test".to_string(),
            port: 0,
            enable_playground: false,
            allowed_origins: Vec::new(),
            auth: AuthConfig {
                backend: AuthBackend::Mock,
                remote: RemoteAuthConfig::default(),
                jwt_secret: "test_secret_key".to_string(),
                jwt_issuer: "local".to_string(),
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Text,
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!("local".parse::<AuthBackend>().unwrap(), AuthBackend::Local);
        assert_eq!("auth0".parse::<AuthBackend>().unwrap(), AuthBackend::Remote);
        assert_eq!(" Mock ".parse::<AuthBackend>().unwrap(), AuthBackend::Mock);
        assert!("ldap".parse::<AuthBackend>().is_err());
    }

    #[test]
    fn test_validate_requires_dsn() {
        let mut config = Config::for_tests();
        config.database_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_backend_fields() {
        let mut config = Config::for_tests();
        config.auth.backend = AuthBackend::Local;
        config.auth.jwt_secret = String::new();
        assert!(config.validate().is_err());

        config.auth.backend = AuthBackend::Remote;
        assert!(config.validate().is_err());

        config.auth.remote = RemoteAuthConfig {
            domain: "tenant.auth0.com".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
            audience: "https://api.budget".into(),
            connection_id: "con_1".into(),
        };
        assert!(config.validate().is_ok());
    }
}
