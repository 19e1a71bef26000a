//! Identity cache: resolved users keyed by email and by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::errors::AuthError;
use super::models::User;

/// How long a resolved identity is trusted before asking the backend again.
pub const USER_CACHE_TTL: Duration = Duration::from_secs(50 * 60);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct CacheStoreError(pub String);

/// Storage behind the identity cache. A miss is `Ok(None)`; any `Err` means
/// the store could not answer.
#[async_trait]
pub trait UserCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<User>, CacheStoreError>;

    async fn set(&self, key: &str, user: User, ttl: Duration) -> Result<(), CacheStoreError>;

    async fn delete(&self, key: &str) -> Result<(), CacheStoreError>;
}

struct CacheEntry {
    user: User,
    expires_at: Instant,
}

/// In-memory cache store
///
/// Expired entries are skipped on read and swept on write
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserCacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<User>, CacheStoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.user.clone()))
    }

    async fn set(&self, key: &str, user: User, ttl: Duration) -> Result<(), CacheStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                user,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheStoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

pub struct IdentityCache {
    store: Arc<dyn UserCacheStore>,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(store: Arc<dyn UserCacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), USER_CACHE_TTL)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.store
            .get(&email_key(email))
            .await
            .map_err(unavailable)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>, AuthError> {
        self.store.get(&id_key(id)).await.map_err(unavailable)
    }

    /// Store under both the email and the id key.
    pub async fn put(&self, user: &User) -> Result<(), AuthError> {
        self.store
            .set(&email_key(&user.email), user.clone(), self.ttl)
            .await
            .map_err(unavailable)?;
        self.store
            .set(&id_key(&user.id), user.clone(), self.ttl)
            .await
            .map_err(unavailable)
    }

    pub async fn invalidate(&self, user: &User) -> Result<(), AuthError> {
        self.store
            .delete(&email_key(&user.email))
            .await
            .map_err(unavailable)?;
        self.store
            .delete(&id_key(&user.id))
            .await
            .map_err(unavailable)
    }
}

fn email_key(email: &str) -> String {
    format!("email:{}", email.to_lowercase())
}

fn id_key(id: &str) -> String {
    format!("id:{}", id)
}

fn unavailable(err: CacheStoreError) -> AuthError {
    AuthError::BackendUnavailable(format!("cannot reach user cache: {}", err))
}
