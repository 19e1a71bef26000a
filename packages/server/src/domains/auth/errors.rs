use auth0_client::ManagementError;
use thiserror::Error;

use super::jwt::TokenError;
use crate::common::ScopeError;
use crate::kernel::dao::DaoError;

/// Errors from the auth service and its identity backends.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("user not found: {0}")]
    NotFound(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("{0}")]
    UnsupportedOperation(&'static str),

    #[error("user has not set their password")]
    PasswordNotSet,

    #[error("invalid password")]
    InvalidPassword,

    #[error("{0}")]
    BackendUnavailable(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: DaoError,
    },

    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: ManagementError,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn store(context: impl Into<String>) -> impl FnOnce(DaoError) -> AuthError {
        let context = context.into();
        move |source| match source {
            DaoError::Cancelled => AuthError::Cancelled,
            DaoError::DeadlineExceeded => AuthError::DeadlineExceeded,
            source => AuthError::Store { context, source },
        }
    }

    pub fn remote(context: impl Into<String>) -> impl FnOnce(ManagementError) -> AuthError {
        let context = context.into();
        move |source| AuthError::Remote { context, source }
    }

    /// True when the user is absent, however deeply the cause is wrapped.
    pub fn is_not_found(&self) -> bool {
        match self {
            AuthError::NotFound(_) => true,
            AuthError::Store { source, .. } => source.is_not_found(),
            AuthError::Remote { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Token and authorization failures; surfaced to clients as forbidden.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AuthError::NotAuthorized | AuthError::InvalidToken(_))
    }
}

impl From<ScopeError> for AuthError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Cancelled => AuthError::Cancelled,
            ScopeError::DeadlineExceeded => AuthError::DeadlineExceeded,
        }
    }
}
