//! Two-tier time-boxed cache of unwrapped master keys.
//!
//! Tier 1 is a process-wide map; tier 2 is an optional persisted store so a
//! key survives a process restart inside its TTL window. Both tiers share
//! one expiry rule (strictly `now < expires_at`) and lookups self-validate,
//! so there is no background sweep. Entries leave the cache only by
//! expiring or by explicit eviction (decryption failure, logout).
//!
//! The persisted entry stores the key base64-encoded next to an absolute
//! expiry timestamp. That the key is readable from the device store at all
//! is a deliberate trust boundary of this design, not an oversight.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use sl_crypto::{encoding, SymmetricKey};

use crate::traits::KeyValueStore;

/// How long an unwrapped master key stays usable.
pub const MASTER_KEY_TTL_SECS: i64 = 5 * 60;

/// The default TTL as a [`Duration`].
pub fn master_key_ttl() -> Duration {
    Duration::seconds(MASTER_KEY_TTL_SECS)
}

fn storage_key(account_id: &str) -> String {
    format!("streamlock.master_key.{account_id}")
}

// The single expiry check both tiers go through.
fn is_live(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now < expires_at
}

struct CachedKey {
    key: SymmetricKey,
    expires_at: DateTime<Utc>,
}

/// Persisted tier-2 entry.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedKeyEntry {
    key: String,
    expires_at_epoch_ms: i64,
}

impl PersistedKeyEntry {
    fn decode(blob: &str) -> Option<(SymmetricKey, DateTime<Utc>)> {
        let entry: PersistedKeyEntry = serde_json::from_str(blob).ok()?;
        let key_bytes = encoding::b64_decode(&entry.key).ok()?;
        let key = SymmetricKey::from_slice(&key_bytes).ok()?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(entry.expires_at_epoch_ms)?;
        Some((key, expires_at))
    }
}

/// The master key cache, explicitly constructed and shared via `Arc`.
pub struct KeyCacheService {
    memory: RwLock<HashMap<String, CachedKey>>,
    persisted: Option<Arc<dyn KeyValueStore>>,
}

impl KeyCacheService {
    pub fn new(persisted: Option<Arc<dyn KeyValueStore>>) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            persisted,
        }
    }

    /// Memory-only cache (no tier 2).
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Look up a live master key. A tier-2 hit repopulates tier 1.
    pub async fn get(&self, account_id: &str) -> Option<SymmetricKey> {
        self.get_at(account_id, Utc::now()).await
    }

    async fn get_at(&self, account_id: &str, now: DateTime<Utc>) -> Option<SymmetricKey> {
        {
            let mut memory = self.memory.write().await;
            if let Some(entry) = memory.get(account_id) {
                if is_live(entry.expires_at, now) {
                    return Some(entry.key.clone());
                }
                memory.remove(account_id);
            }
        }

        let store = self.persisted.as_ref()?;
        let blob = match store.get_string(&storage_key(account_id)).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(err) => {
                warn!(account_id, error = %err, "persisted key cache read failed");
                return None;
            }
        };

        match PersistedKeyEntry::decode(&blob) {
            Some((key, expires_at)) if is_live(expires_at, now) => {
                debug!(account_id, "master key promoted from persisted cache");
                self.memory.write().await.insert(
                    account_id.to_string(),
                    CachedKey {
                        key: key.clone(),
                        expires_at,
                    },
                );
                Some(key)
            }
            _ => {
                // Expired or undecodable blob; nothing will ever read it again.
                if let Err(err) = store.remove(&storage_key(account_id)).await {
                    warn!(account_id, error = %err, "persisted key cache eviction failed");
                }
                None
            }
        }
    }

    /// Cache a freshly unwrapped master key in both tiers.
    ///
    /// A tier-2 write failure is logged and swallowed; the memory tier
    /// remains authoritative for this process.
    pub async fn put(&self, account_id: &str, key: SymmetricKey, ttl: Duration) {
        let expires_at = Utc::now() + ttl;
        self.memory.write().await.insert(
            account_id.to_string(),
            CachedKey {
                key: key.clone(),
                expires_at,
            },
        );

        if let Some(store) = &self.persisted {
            let entry = PersistedKeyEntry {
                key: encoding::b64_encode(key.as_bytes()),
                expires_at_epoch_ms: expires_at.timestamp_millis(),
            };
            let blob = match serde_json::to_string(&entry) {
                Ok(blob) => blob,
                Err(err) => {
                    warn!(account_id, error = %err, "persisted key entry encode failed");
                    return;
                }
            };
            if let Err(err) = store.set_string(&storage_key(account_id), &blob).await {
                warn!(account_id, error = %err, "persisted key cache write failed");
            }
        }
    }

    /// Evict one account's key from both tiers.
    pub async fn remove(&self, account_id: &str) {
        self.memory.write().await.remove(account_id);
        if let Some(store) = &self.persisted {
            if let Err(err) = store.remove(&storage_key(account_id)).await {
                warn!(account_id, error = %err, "persisted key cache eviction failed");
            }
        }
    }

    /// Evict every cached key from both tiers (logout).
    pub async fn clear(&self) {
        let account_ids: Vec<String> = {
            let mut memory = self.memory.write().await;
            let ids = memory.keys().cloned().collect();
            memory.clear();
            ids
        };
        if let Some(store) = &self.persisted {
            for account_id in account_ids {
                if let Err(err) = store.remove(&storage_key(&account_id)).await {
                    warn!(%account_id, error = %err, "persisted key cache eviction failed");
                }
            }
        }
    }
}
