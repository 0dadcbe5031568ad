//! Capability seams to the host application.
//!
//! The resolver never talks to a network, a UI, or durable storage directly;
//! it receives these capabilities as injected trait objects. The host wires
//! them up once at construction time, which keeps the vault testable and
//! free of global registration state.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::models::{Account, AccountSources, SourceCredentials};

/// Context shown to the user alongside a passphrase prompt.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub title: String,
    pub message: String,
    pub account_name: String,
}

/// The account/source directory service.
#[async_trait]
pub trait SourceDirectory: Send + Sync {
    async fn list_accounts(&self) -> Result<Vec<Account>, VaultError>;

    /// The sources owned by `account_id` plus the account's key material.
    async fn account_sources(&self, account_id: &str) -> Result<AccountSources, VaultError>;
}

/// The UI capability that asks the user for a passphrase.
#[async_trait]
pub trait PassphrasePrompter: Send + Sync {
    /// A dismissed prompt rejects with [`VaultError::UserCancelled`]; an
    /// implementation with no UI mounted rejects with
    /// [`VaultError::PassphraseRequired`].
    async fn prompt(
        &self,
        account_id: &str,
        ctx: &PromptContext,
    ) -> Result<Zeroizing<String>, VaultError>;
}

/// Backend decryption service for runtimes where the local KDF is
/// unreliable. Receives only the passphrase and source id, returns
/// already-decrypted credentials.
#[async_trait]
pub trait DecryptDelegate: Send + Sync {
    async fn decrypt_source(
        &self,
        source_id: &str,
        passphrase: &str,
    ) -> Result<SourceCredentials, VaultError>;
}

/// Durable per-device key-value storage, used only for the persisted tier
/// of the key cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>, VaultError>;
    async fn set_string(&self, key: &str, value: &str) -> Result<(), VaultError>;
    async fn remove(&self, key: &str) -> Result<(), VaultError>;
}

/// In-memory [`KeyValueStore`], for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>, VaultError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), VaultError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
