//! Session-scoped passphrase cache.
//!
//! Avoids re-prompting the user for every source access within a session.
//! Entries live until explicitly removed (retry eviction, logout) or the
//! service is dropped; nothing here touches durable storage. Lifetime
//! policy is independent of the key cache.

use std::collections::HashMap;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// Process-wide passphrase cache, explicitly constructed and shared via
/// `Arc` rather than living in a global.
#[derive(Default)]
pub struct PassphraseCacheService {
    entries: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl PassphraseCacheService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account_id: &str) -> Option<Zeroizing<String>> {
        self.entries.read().await.get(account_id).cloned()
    }

    pub async fn set(&self, account_id: &str, passphrase: Zeroizing<String>) {
        self.entries
            .write()
            .await
            .insert(account_id.to_string(), passphrase);
    }

    pub async fn remove(&self, account_id: &str) {
        self.entries.write().await.remove(account_id);
    }

    /// Drop every cached passphrase (logout).
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
