use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{
    CredentialStore, DaoError, Driver, Finalizer, HistoryEntry, LocalUser, LocalUserInsertParams,
    Released, TxRelease,
};
use crate::common::RequestScope;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    /// Keyed by lowercased email.
    users: BTreeMap<String, LocalUser>,
    history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
enum Op {
    Insert(LocalUser),
    UpdateRoles { email: String, roles: String },
    SetPass { email: String, pwdhash: String },
    History(HistoryEntry),
}

impl MemoryState {
    fn apply(&mut self, op: &Op) -> Result<(), DaoError> {
        match op {
            Op::Insert(user) => {
                let key = user.email.to_lowercase();
                if self.users.contains_key(&key) || self.users.values().any(|u| u.id == user.id) {
                    return Err(DaoError::Conflict(format!(
                        "local_user {} already exists",
                        user.email
                    )));
                }
                self.users.insert(key, user.clone());
            }
            Op::UpdateRoles { email, roles } => {
                let user = self
                    .users
                    .get_mut(&email.to_lowercase())
                    .ok_or(DaoError::NotFound)?;
                user.roles = roles.clone();
            }
            Op::SetPass { email, pwdhash } => {
                let user = self
                    .users
                    .get_mut(&email.to_lowercase())
                    .ok_or(DaoError::NotFound)?;
                user.pwdhash = pwdhash.clone();
            }
            Op::History(entry) => self.history.push(entry.clone()),
        }
        Ok(())
    }
}

/// Staged view of one open transaction: reads see `staged`, commit replays
/// `ops` against the shared state.
struct TxState {
    staged: MemoryState,
    ops: Vec<Op>,
}

type TxSlot = Arc<Mutex<Option<TxState>>>;

/// In-process credential store for `memory://` DSNs.
#[derive(Clone, Default)]
pub struct MemoryDao {
    shared: Arc<RwLock<MemoryState>>,
    tx: Option<TxSlot>,
    depth: usize,
    owner: bool,
}

impl MemoryDao {
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        if let Some(slot) = &self.tx {
            let guard = slot.lock().await;
            if let Some(tx) = guard.as_ref() {
                return f(&tx.staged);
            }
        }
        f(&*self.shared.read().await)
    }

    async fn write(&self, op: Op) -> Result<(), DaoError> {
        if let Some(slot) = &self.tx {
            let mut guard = slot.lock().await;
            if let Some(tx) = guard.as_mut() {
                tx.staged.apply(&op)?;
                tx.ops.push(op);
                return Ok(());
            }
        }
        self.shared.write().await.apply(&op)
    }
}

struct MemoryFinalizer {
    slot: TxSlot,
}

#[async_trait]
impl Finalizer for MemoryFinalizer {
    async fn rollback(&self) -> Result<Released, DaoError> {
        match self.slot.lock().await.take() {
            Some(_) => Ok(Released::RolledBack),
            None => Ok(Released::AlreadyClosed),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryDao {
    fn driver(&self) -> Driver {
        Driver::Memory
    }

    fn tx_depth(&self) -> usize {
        self.depth
    }

    async fn ping(&self, scope: &RequestScope) -> Result<(), DaoError> {
        scope.run(async { Ok(()) }).await
    }

    async fn migrate(&self) -> Result<(), DaoError> {
        Ok(())
    }

    async fn local_user_get_by_email(
        &self,
        scope: &RequestScope,
        email: &str,
    ) -> Result<LocalUser, DaoError> {
        let key = email.to_lowercase();
        scope
            .run(async {
                self.read(|s| s.users.get(&key).cloned())
                    .await
                    .ok_or(DaoError::NotFound)
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
                self.read(|s| s.users.values().find(|u| u.id == id).cloned())
                    .await
                    .ok_or(DaoError::NotFound)
            })
            .await
    }

    async fn local_user_list(&self, scope: &RequestScope) -> Result<Vec<LocalUser>, DaoError> {
        scope
            .run(async {
                let mut users = self.read(|s| s.users.values().cloned().collect::<Vec<_>>()).await;
                users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
                Ok(users)
            })
            .await
    }

    async fn local_user_insert(
        &self,
        scope: &RequestScope,
        params: &LocalUserInsertParams,
    ) -> Result<(), DaoError> {
        scope
            .run(self.write(Op::Insert(LocalUser::from(params))))
            .await
    }

    async fn local_user_update_roles(
        &self,
        scope: &RequestScope,
        email: &str,
        roles: &str,
    ) -> Result<(), DaoError> {
        scope
            .run(self.write(Op::UpdateRoles {
                email: email.to_string(),
                roles: roles.to_string(),
            }))
            .await
    }

    async fn local_user_set_pass(
        &self,
        scope: &RequestScope,
        email: &str,
        pwdhash: &str,
    ) -> Result<(), DaoError> {
        scope
            .run(self.write(Op::SetPass {
                email: email.to_string(),
                pwdhash: pwdhash.to_string(),
            }))
            .await
    }

    async fn history_insert(
        &self,
        scope: &RequestScope,
        entry: &HistoryEntry,
    ) -> Result<(), DaoError> {
        scope.run(self.write(Op::History(entry.clone()))).await
    }

    async fn history_list(
        &self,
        scope: &RequestScope,
        reference: &str,
    ) -> Result<Vec<HistoryEntry>, DaoError> {
        scope
            .run(async {
                Ok(self
                    .read(|s| {
                        s.history
                            .iter()
                            .filter(|h| h.reference == reference)
                            .cloned()
                            .collect()
                    })
                    .await)
            })
            .await
    }

    async fn begin_tx(
        &self,
        scope: &RequestScope,
    ) -> Result<(Box<dyn CredentialStore>, TxRelease), DaoError> {
        if let Some(slot) = &self.tx {
            if slot.lock().await.is_some() {
                let joined = MemoryDao {
                    shared: self.shared.clone(),
                    tx: Some(slot.clone()),
                    depth: self.depth + 1,
                    owner: false,
                };
                return Ok((Box::new(joined), TxRelease::joined(self.depth + 1)));
            }
        }

        let staged = scope
            .run(async { Ok::<_, DaoError>(self.shared.read().await.clone()) })
            .await?;
        let slot: TxSlot = Arc::new(Mutex::new(Some(TxState {
            staged,
            ops: Vec::new(),
        })));

        let handle = MemoryDao {
            shared: self.shared.clone(),
            tx: Some(slot.clone()),
            depth: self.depth + 1,
            owner: true,
        };
        let release = TxRelease::new(Arc::new(MemoryFinalizer { slot }), self.depth + 1);

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
            .run(async {
                let mut shared = self.shared.write().await;
                let mut next = shared.clone();
                for op in &tx.ops {
                    next.apply(op)?;
                }
                *shared = next;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::dao::LocalUserInsertParams;

    fn params(email: &str) -> LocalUserInsertParams {
        LocalUserInsertParams::builder()
            .id(email)
            .email(email)
            .display_name("Test")
            .roles("user")
            .build()
    }

    #[tokio::test]
    async fn test_read_your_own_writes_inside_tx() {
        let scope = RequestScope::new();
        let dao = MemoryDao::new();

        let (tx, release) = dao.begin_tx(&scope).await.unwrap();
        tx.local_user_insert(&scope, &params("a@ex.com")).await.unwrap();

        assert!(tx.local_user_get_by_email(&scope, "A@ex.com").await.is_ok());
        assert!(dao
            .local_user_get_by_email(&scope, "a@ex.com")
            .await
            .unwrap_err()
            .is_not_found());

        tx.commit(&scope).await.unwrap();
        assert_eq!(release.release().await, Released::AlreadyClosed);
        assert!(dao.local_user_get_by_email(&scope, "a@ex.com").await.is_ok());
    }

    #[tokio::test]
    async fn test_release_without_commit_rolls_back() {
        let scope = RequestScope::new();
        let dao = MemoryDao::new();

        let (tx, release) = dao.begin_tx(&scope).await.unwrap();
        tx.local_user_insert(&scope, &params("a@ex.com")).await.unwrap();
        assert_eq!(release.release().await, Released::RolledBack);

        assert!(dao.local_user_list(&scope).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_usable_after_commit() {
        let scope = RequestScope::new();
        let dao = MemoryDao::new();

        let (tx, release) = dao.begin_tx(&scope).await.unwrap();
        tx.local_user_insert(&scope, &params("a@ex.com")).await.unwrap();
        tx.commit(&scope).await.unwrap();

        tx.local_user_insert(&scope, &params("b@ex.com")).await.unwrap();
        assert_eq!(release.release().await, Released::AlreadyClosed);
        assert_eq!(dao.local_user_list(&scope).await.unwrap().len(), 2);
        assert!(matches!(tx.commit(&scope).await, Err(DaoError::TxClosed)));
    }

    #[tokio::test]
    async fn test_nested_tx_joins_outer() {
        let scope = RequestScope::new();
        let dao = MemoryDao::new();

        let (outer, outer_release) = dao.begin_tx(&scope).await.unwrap();
        let (inner, inner_release) = outer.begin_tx(&scope).await.unwrap();
        assert_eq!(outer.tx_depth(), 1);
        assert_eq!(inner.tx_depth(), 2);

        inner.local_user_insert(&scope, &params("a@ex.com")).await.unwrap();
        inner.commit(&scope).await.unwrap();
        assert_eq!(inner_release.release().await, Released::Joined);

        assert!(dao.local_user_list(&scope).await.unwrap().is_empty());
        assert!(outer.local_user_get_by_email(&scope, "a@ex.com").await.is_ok());

        assert_eq!(outer_release.release().await, Released::RolledBack);
        assert!(dao.local_user_list(&scope).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let scope = RequestScope::new();
        let dao = MemoryDao::new();

        dao.local_user_insert(&scope, &params("a@ex.com")).await.unwrap();
        let err = dao
            .local_user_insert(&scope, &params("A@EX.COM"))
            .await
            .unwrap_err();
        assert!(matches!(err, DaoError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_missing_user_is_not_found() {
        let scope = RequestScope::new();
        let dao = MemoryDao::new();

        let err = dao
            .local_user_update_roles(&scope, "ghost@ex.com", "admin")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
