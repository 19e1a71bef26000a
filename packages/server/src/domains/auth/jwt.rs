use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::models::Roles;

/// Lifetime of locally issued tokens.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Why a token was rejected. `Malformed` covers anything that failed to
/// parse at all and is kept apart from expiry and signature failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("cannot parse token: {0}")]
    Malformed(#[source] JwtError),

    #[error("token expired")]
    Expired,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token rejected: {0}")]
    Rejected(#[source] JwtError),

    #[error("token header carries no key id")]
    MissingKeyId,

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("cannot sign token: {0}")]
    Encoding(#[source] JwtError),
}

impl TokenError {
    pub fn from_decode(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenError::Malformed(err),
            _ => TokenError::Rejected(err),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, TokenError::Malformed(_))
    }
}

/// JWT Claims - data stored in the token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,   // Subject (email)
    pub scope: String, // Roles, `;`-joined
    pub exp: i64,      // Expiration timestamp
    pub iat: i64,      // Issued at timestamp
    pub nbf: i64,      // Not valid before
    pub iss: String,   // Issuer
    pub jti: String,   // JWT ID (unique token identifier)
}

impl Claims {
    pub fn roles(&self) -> Roles {
        Roles::from_delimited(&self.scope)
    }
}

/// JWT Service - creates and verifies HS256 tokens for the local backend
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: chrono::Duration,
    leeway_secs: u64,
}

impl JwtService {
    /// Create new JWT service with secret and issuer
    pub fn new(secret: &str, issuer: impl Into<String>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            ttl: chrono::Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
            leeway_secs: 60,
        }
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Clock skew tolerated on `exp` and `nbf`.
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Create a token binding `subject` to `roles`.
    pub fn create_token(&self, subject: &str, roles: &Roles) -> Result<String, TokenError> {
        let now = chrono::Utc::now();
        let exp = now + self.ttl;

        let claims = Claims {
            sub: subject.to_string(),
            scope: roles.to_delimited(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(), // Unique token ID
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(TokenError::Encoding)
    }

    /// Verify and decode a token
    ///
    /// Returns claims if the signature, issuer and time window all check out
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.validate_nbf = true;
        validation.leeway = self.leeway_secs;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(TokenError::from_decode)
    }
}
