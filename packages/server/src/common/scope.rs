//! Per-request scope passed explicitly through every provider and store call.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domains::auth::models::User;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Carries the resolved identity (if any), a cancellation token and an
/// optional deadline for one unit of work.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    identity: Option<User>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, user: User) -> Self {
        self.identity = Some(user);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The authenticated user, `None` for anonymous requests.
    pub fn identity(&self) -> Option<&User> {
        self.identity.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drive `fut` until it finishes, the scope is cancelled, or the
    /// deadline passes, whichever comes first.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<ScopeError>,
    {
        if self.cancel.is_cancelled() {
            return Err(ScopeError::Cancelled.into());
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ScopeError::Cancelled.into()),
            _ = sleep_until(self.deadline) => Err(ScopeError::DeadlineExceeded.into()),
            res = fut => res,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
