use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use super::{
    CredentialStore, DaoError, Driver, Finalizer, HistoryEntry, LocalUser, LocalUserInsertParams,
    Released, TxRelease, CONNECT_TIMEOUT,
};
use crate::common::RequestScope;

type TxSlot = Arc<Mutex<Option<Transaction<'static, Postgres>>>>;

/// Postgres-backed credential store.
///
/// A transactional handle shares its slot with the [`TxRelease`] returned
/// alongside it. Statements on the handle run inside the transaction while
/// the slot holds one, and on the pool once it has been committed.
#[derive(Clone)]
pub struct PgDao {
    pool: PgPool,
    tx: Option<TxSlot>,
    depth: usize,
    owner: bool,
}

impl PgDao {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: None,
            depth: 0,
            owner: false,
        }
    }

    pub fn connect_lazy(dsn: &str) -> Result<Self, DaoError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_lazy(dsn)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn conn(&self) -> Result<Conn<'_>, DaoError> {
        if let Some(slot) = &self.tx {
            let guard = slot.lock().await;
            if let Ok(tx) = MutexGuard::try_map(guard, |t| t.as_mut()) {
                return Ok(Conn::Tx(tx));
            }
        }
        Ok(Conn::Pool(self.pool.acquire().await?))
    }
}

enum Conn<'a> {
    Tx(MappedMutexGuard<'a, Transaction<'static, Postgres>>),
    Pool(PoolConnection<Postgres>),
}

impl Deref for Conn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            Conn::Tx(tx) => &***tx,
            Conn::Pool(conn) => &**conn,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            Conn::Tx(tx) => &mut ***tx,
            Conn::Pool(conn) => &mut **conn,
        }
    }
}

struct PgFinalizer {
    slot: TxSlot,
}

#[async_trait]
impl Finalizer for PgFinalizer {
    async fn rollback(&self) -> Result<Released, DaoError> {
        let taken = self.slot.lock().await.take();
        match taken {
            Some(tx) => {
                tx.rollback().await?;
                Ok(Released::RolledBack)
            }
            None => Ok(Released::AlreadyClosed),
        }
    }
}

#[async_trait]
impl CredentialStore for PgDao {
    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    fn tx_depth(&self) -> usize {
        self.depth
    }

    async fn ping(&self, scope: &RequestScope) -> Result<(), DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                sqlx::query("SELECT 1").execute(&mut *conn).await?;
                Ok(())
            })
            .await
    }

    async fn migrate(&self) -> Result<(), DaoError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn local_user_get_by_email(
        &self,
        scope: &RequestScope,
        email: &str,
    ) -> Result<LocalUser, DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                sqlx::query_as::<_, LocalUser>(
                    "SELECT id, email, display_name, roles, pwdhash, created_at
                     FROM local_user WHERE lower(email) = lower($1)",
                )
                .bind(email)
                .fetch_one(&mut *conn)
                .await
                .map_err(Into::into)
            })
            .await
    }

    async fn local_user_get_by_id(
        &self,
        scope: &RequestScope,
        id: &str,
    ) -> Result<LocalUser, DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                sqlx::query_as::<_, LocalUser>(
                    "SELECT id, email, display_name, roles, pwdhash, created_at
                     FROM local_user WHERE id = $1",
                )
                .bind(id)
                .fetch_one(&mut *conn)
                .await
                .map_err(Into::into)
            })
            .await
    }

    async fn local_user_list(&self, scope: &RequestScope) -> Result<Vec<LocalUser>, DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                sqlx::query_as::<_, LocalUser>(
                    "SELECT id, email, display_name, roles, pwdhash, created_at
                     FROM local_user ORDER BY created_at, email",
                )
                .fetch_all(&mut *conn)
                .await
                .map_err(Into::into)
            })
            .await
    }

    async fn local_user_insert(
        &self,
        scope: &RequestScope,
        params: &LocalUserInsertParams,
    ) -> Result<(), DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                sqlx::query(
                    "INSERT INTO local_user (id, email, display_name, roles, pwdhash, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(&params.id)
                .bind(&params.email)
                .bind(&params.display_name)
                .bind(&params.roles)
                .bind(&params.pwdhash)
                .bind(params.created_at)
                .execute(&mut *conn)
                .await?;
                Ok(())
            })
            .await
    }

    async fn local_user_update_roles(
        &self,
        scope: &RequestScope,
        email: &str,
        roles: &str,
    ) -> Result<(), DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                let result =
                    sqlx::query("UPDATE local_user SET roles = $1 WHERE lower(email) = lower($2)")
                        .bind(roles)
                        .bind(email)
                        .execute(&mut *conn)
                        .await?;
                if result.rows_affected() == 0 {
                    return Err(DaoError::NotFound);
                }
                Ok(())
            })
            .await
    }

    async fn local_user_set_pass(
        &self,
        scope: &RequestScope,
        email: &str,
        pwdhash: &str,
    ) -> Result<(), DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                let result = sqlx::query(
                    "UPDATE local_user SET pwdhash = $1 WHERE lower(email) = lower($2)",
                )
                .bind(pwdhash)
                .bind(email)
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(DaoError::NotFound);
                }
                Ok(())
            })
            .await
    }

    async fn history_insert(
        &self,
        scope: &RequestScope,
        entry: &HistoryEntry,
    ) -> Result<(), DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                sqlx::query(
                    "INSERT INTO history (id, namespace, reference, event, email, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(&entry.id)
                .bind(&entry.namespace)
                .bind(&entry.reference)
                .bind(&entry.event)
                .bind(&entry.email)
                .bind(entry.created_at)
                .execute(&mut *conn)
                .await?;
                Ok(())
            })
            .await
    }

    async fn history_list(
        &self,
        scope: &RequestScope,
        reference: &str,
    ) -> Result<Vec<HistoryEntry>, DaoError> {
        scope
            .run(async {
                let mut conn = self.conn().await?;
                sqlx::query_as::<_, HistoryEntry>(
                    "SELECT id, namespace, reference, event, email, created_at
                     FROM history WHERE reference = $1 ORDER BY created_at, id",
                )
                .bind(reference)
                .fetch_all(&mut *conn)
                .await
                .map_err(Into::into)
            })
            .await
    }

    async fn begin_tx(
        &self,
        scope: &RequestScope,
    ) -> Result<(Box<dyn CredentialStore>, TxRelease), DaoError> {
        if let Some(slot) = &self.tx {
            if slot.lock().await.is_some() {
                let joined = PgDao {
                    pool: self.pool.clone(),
                    tx: Some(slot.clone()),
                    depth: self.depth + 1,
                    owner: false,
                };
                return Ok((Box::new(joined), TxRelease::joined(self.depth + 1)));
            }
        }

        let tx = scope
            .run(async { self.pool.begin().await.map_err(DaoError::from) })
            .await?;
        let slot: TxSlot = Arc::new(Mutex::new(Some(tx)));

        let handle = PgDao {
            pool: self.pool.clone(),
            tx: Some(slot.clone()),
            depth: self.depth + 1,
            owner: true,
        };
        let release = TxRelease::new(Arc::new(PgFinalizer { slot }), self.depth + 1);

        Ok((Box::new(handle), release))
    }

    async fn commit(&self, scope: &RequestScope) -> Result<(), DaoError> {
        if !self.owner {
            tracing::trace!(depth = self.depth, "Nested commit deferred to outer transaction");
            return Ok(());
        }

        let slot = self.tx.as_ref().ok_or(DaoError::TxClosed)?;
        let tx = slot.lock().await.take().ok_or(DaoError::TxClosed)?;

        scope
            .run(async { tx.commit().await.map_err(DaoError::from) })
            .await
    }
}
