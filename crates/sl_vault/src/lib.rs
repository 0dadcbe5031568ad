//! sl_vault - the Streamlock credential vault
//!
//! Stores third-party streaming service credentials (server URL, username,
//! password) encrypted at rest, unlockable only by a user passphrase, with a
//! layered key hierarchy and a time-boxed key cache so the expensive KDF is
//! not paid on every access:
//!
//! ```text
//! passphrase --KDF--> KEK --unwrap--> master key --decrypt--> source config
//! ```
//!
//! # Module layout
//! - `models`           - accounts, key material, sources, credentials
//! - `key_cache`        - two-tier time-boxed master key cache
//! - `passphrase_cache` - session-scoped passphrase cache
//! - `traits`           - capability seams (directory, prompt, store, delegate)
//! - `resolver`         - the retry-once resolution state machine
//! - `provision`        - wrap-side creation of new key material
//! - `error`            - unified error type

pub mod error;
pub mod key_cache;
pub mod models;
pub mod passphrase_cache;
pub mod provision;
pub mod resolver;
pub mod traits;

pub use error::VaultError;
pub use key_cache::KeyCacheService;
pub use models::{Account, KeyMaterial, Source, SourceCredentials};
pub use passphrase_cache::PassphraseCacheService;
pub use resolver::CredentialResolver;
pub use traits::{
    DecryptDelegate, KeyValueStore, MemoryKeyValueStore, PassphrasePrompter, PromptContext,
    SourceDirectory,
};
