//! Credential store: local user records plus scoped transactions.
//!
//! Handles are layered: `begin_tx` returns a new store handle bound to one
//! transaction and a [`TxRelease`] that must be awaited on every exit path.
//! Releasing after a successful `commit` is a no-op that reports
//! [`Released::AlreadyClosed`].

mod memory;
mod postgres;

pub use memory::MemoryDao;
pub use postgres::PgDao;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::common::{RequestScope, ScopeError};

/// Startup ping must answer within this window.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

const PG_UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("record not found")]
    NotFound,

    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("invalid database dsn: {0}")]
    InvalidDsn(String),

    #[error("unsupported database driver: {0}")]
    UnsupportedDriver(String),

    #[error("transaction already closed")]
    TxClosed,

    #[error("database call cancelled")]
    Cancelled,

    #[error("database call exceeded its deadline")]
    DeadlineExceeded,

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl DaoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DaoError::NotFound)
    }
}

impl From<sqlx::Error> for DaoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DaoError::NotFound,
            sqlx::Error::PoolTimedOut => DaoError::DeadlineExceeded,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION) => {
                DaoError::Conflict(db.message().to_string())
            }
            other => DaoError::Database(other),
        }
    }
}

impl From<ScopeError> for DaoError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Cancelled => DaoError::Cancelled,
            ScopeError::DeadlineExceeded => DaoError::DeadlineExceeded,
        }
    }
}

/// One row of `local_user`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    pub email: String,
    pub display_name: String,
    /// `;`-joined role names.
    pub roles: String,
    /// Argon2 PHC string; empty means password login is disabled.
    pub pwdhash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct LocalUserInsertParams {
    #[builder(setter(into))]
    pub id: String,
    #[builder(setter(into))]
    pub email: String,
    #[builder(setter(into))]
    pub display_name: String,
    #[builder(setter(into))]
    pub roles: String,
    #[builder(default, setter(into))]
    pub pwdhash: String,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl From<&LocalUserInsertParams> for LocalUser {
    fn from(p: &LocalUserInsertParams) -> Self {
        LocalUser {
            id: p.id.clone(),
            email: p.email.clone(),
            display_name: p.display_name.clone(),
            roles: p.roles.clone(),
            pwdhash: p.pwdhash.clone(),
            created_at: p.created_at,
        }
    }
}

/// Audit trail of changes made to local users.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub namespace: String,
    pub reference: String,
    pub event: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(namespace: &str, reference: &str, event: &str, email: &str) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            namespace: namespace.to_string(),
            reference: reference.to_string(),
            event: event.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Postgres,
    Memory,
}

/// Split a DSN into its driver and the connection string that driver takes.
pub fn driver_from_dsn(dsn: &str) -> Result<(Driver, String), DaoError> {
    if dsn.is_empty() {
        return Err(DaoError::InvalidDsn("empty dsn".to_string()));
    }

    let (scheme, rest) = dsn
        .split_once("://")
        .ok_or_else(|| DaoError::InvalidDsn("no scheme".to_string()))?;

    match scheme {
        "memory" => Ok((Driver::Memory, rest.to_string())),
        "postgres" | "postgresql" => Ok((Driver::Postgres, dsn.to_string())),
        other => Err(DaoError::UnsupportedDriver(other.to_string())),
    }
}

/// Open a store for `dsn` and ping it under [`CONNECT_TIMEOUT`].
pub async fn connect(dsn: &str) -> Result<Arc<dyn CredentialStore>, DaoError> {
    let (driver, conn_str) = driver_from_dsn(dsn)?;

    let store: Arc<dyn CredentialStore> = match driver {
        Driver::Postgres => Arc::new(PgDao::connect_lazy(&conn_str)?),
        Driver::Memory => Arc::new(MemoryDao::new()),
    };

    let scope = RequestScope::new().with_timeout(CONNECT_TIMEOUT);
    store.ping(&scope).await?;
    tracing::info!(driver = ?driver, "Credential store connected");

    Ok(store)
}

/// Outcome of [`TxRelease::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    RolledBack,
    /// The transaction was committed (or already released) before.
    AlreadyClosed,
    /// A nested handle; the outermost owner finalizes.
    Joined,
    /// Rollback itself failed; the error has been logged.
    Failed,
}

#[async_trait]
pub(crate) trait Finalizer: Send + Sync {
    async fn rollback(&self) -> Result<Released, DaoError>;
}

/// Rollback action bound to a transaction handle.
#[must_use = "await release() on every exit path"]
pub struct TxRelease {
    finalizer: Option<Arc<dyn Finalizer>>,
    depth: usize,
}

impl TxRelease {
    pub(crate) fn new(finalizer: Arc<dyn Finalizer>, depth: usize) -> Self {
        Self {
            finalizer: Some(finalizer),
            depth,
        }
    }

    pub(crate) fn joined(depth: usize) -> Self {
        Self {
            finalizer: None,
            depth,
        }
    }

    pub async fn release(self) -> Released {
        let Some(finalizer) = self.finalizer else {
            tracing::trace!(depth = self.depth, "Nested transaction release");
            return Released::Joined;
        };

        match finalizer.rollback().await {
            Ok(Released::AlreadyClosed) => {
                tracing::debug!(depth = self.depth, "transaction committed");
                Released::AlreadyClosed
            }
            Ok(outcome) => {
                tracing::debug!(depth = self.depth, "Transaction rolled back");
                outcome
            }
            Err(e) => {
                tracing::error!(error = %e, depth = self.depth, "Transaction rollback failed");
                Released::Failed
            }
        }
    }
}

/// Persistence for the local identity backend.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    fn driver(&self) -> Driver;

    /// Nesting depth of this handle: 0 outside any transaction.
    fn tx_depth(&self) -> usize;

    async fn ping(&self, scope: &RequestScope) -> Result<(), DaoError>;

    /// Apply schema migrations. No-op for stores without a schema.
    async fn migrate(&self) -> Result<(), DaoError>;

    async fn local_user_get_by_email(
        &self,
        scope: &RequestScope,
        email: &str,
    ) -> Result<LocalUser, DaoError>;

    async fn local_user_get_by_id(
        &self,
        scope: &RequestScope,
        id: &str,
    ) -> Result<LocalUser, DaoError>;

    async fn local_user_list(&self, scope: &RequestScope) -> Result<Vec<LocalUser>, DaoError>;

    async fn local_user_insert(
        &self,
        scope: &RequestScope,
        params: &LocalUserInsertParams,
    ) -> Result<(), DaoError>;

    async fn local_user_update_roles(
        &self,
        scope: &RequestScope,
        email: &str,
        roles: &str,
    ) -> Result<(), DaoError>;

    async fn local_user_set_pass(
        &self,
        scope: &RequestScope,
        email: &str,
        pwdhash: &str,
    ) -> Result<(), DaoError>;

    async fn history_insert(
        &self,
        scope: &RequestScope,
        entry: &HistoryEntry,
    ) -> Result<(), DaoError>;

    async fn history_list(
        &self,
        scope: &RequestScope,
        reference: &str,
    ) -> Result<Vec<HistoryEntry>, DaoError>;

    /// Open a transaction, or join the one this handle already holds.
    async fn begin_tx(
        &self,
        scope: &RequestScope,
    ) -> Result<(Box<dyn CredentialStore>, TxRelease), DaoError>;

    /// Commit the transaction held by this handle. Afterwards the handle
    /// reads and writes through the pool again.
    async fn commit(&self, scope: &RequestScope) -> Result<(), DaoError>;
}
