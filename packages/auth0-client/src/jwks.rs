//! Cached JSON Web Key Set for a tenant.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use reqwest::Url;
use tokio::sync::RwLock;

use crate::error::{ManagementError, Result};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

struct Snapshot {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Fetches `/.well-known/jwks.json` and keeps it for `refresh_interval`.
pub struct JwksCache {
    http: reqwest::Client,
    url: Url,
    refresh_interval: Duration,
    snapshot: RwLock<Option<Snapshot>>,
}

impl JwksCache {
    pub fn new(domain: &str, refresh_interval: Duration) -> Result<Self> {
        let mut url = crate::base_url(domain)?;
        url.path_segments_mut()
            .map_err(|_| ManagementError::Url(domain.to_string()))?
            .pop_if_empty()
            .extend([".well-known", "jwks.json"]);

        let http = reqwest::Client::builder()
            .timeout(crate::DEFAULT_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            url,
            refresh_interval,
            snapshot: RwLock::new(None),
        })
    }

    /// Decoding key for the given `kid`, refetching the set when it is stale.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        {
            let snapshot = self.snapshot.read().await;
            if let Some(s) = snapshot.as_ref() {
                if s.fetched_at.elapsed() < self.refresh_interval {
                    return key_from(&s.keys, kid);
                }
            }
        }

        let mut slot = self.snapshot.write().await;
        if let Some(s) = slot.as_ref() {
            if s.fetched_at.elapsed() < self.refresh_interval {
                return key_from(&s.keys, kid);
            }
        }

        tracing::debug!(url = %self.url, "Refreshing JWKS");
        let resp = self.http.get(self.url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ManagementError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        let keys: JwkSet = resp.json().await?;
        let key = key_from(&keys, kid);
        *slot = Some(Snapshot {
            keys,
            fetched_at: Instant::now(),
        });
        key
    }
}

fn key_from(keys: &JwkSet, kid: &str) -> Result<DecodingKey> {
    let jwk = keys
        .find(kid)
        .ok_or_else(|| ManagementError::KeyNotFound(kid.to_string()))?;
    Ok(DecodingKey::from_jwk(jwk)?)
}
