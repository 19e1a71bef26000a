use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Auth0 API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid Auth0 endpoint: {0}")]
    Url(String),

    #[error("cannot build key from JWKS: {0}")]
    Jwks(#[from] jsonwebtoken::errors::Error),

    #[error("signing key {0} not present in JWKS")]
    KeyNotFound(String),
}

impl ManagementError {
    /// The API refused the write because the resource already exists.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ManagementError::Api { status: 409, .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagementError::Api { status: 404, .. })
    }
}

pub type Result<T> = std::result::Result<T, ManagementError>;
