//! Data model: accounts, key material, sources, credentials.
//!
//! `KeyMaterial` and `Source` are the wire forms the directory returns, with
//! every byte field base64-encoded. Each has a `validate`/`validated_config`
//! step that decodes, length-checks, and resolves the algorithm tags exactly
//! once; downstream code only ever sees the validated forms and never
//! re-checks an invariant.

use serde::{Deserialize, Serialize};
use std::fmt;

use sl_crypto::{encoding, kdf, KdfAlgo, KdfParams, WrapAlgo};

use crate::error::VaultError;

/// Minimum passphrase length accepted anywhere in the vault.
pub const MIN_PASSPHRASE_LEN: usize = 6;

/// An encryption identity. Owns exactly one key material record and any
/// number of sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
}

/// What the directory returns for one account: its sources plus the key
/// material protecting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSources {
    pub sources: Vec<Source>,
    pub key_data: KeyMaterial,
}

/// Wire form of an account's key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    /// Base64. At least 16 bytes; the legacy KDF requires exactly 16.
    pub salt: String,
    /// Base64 nonce used when the master key was wrapped. 12 or 24 bytes.
    pub iv: String,
    /// Base64 ciphertext of the master key under the KEK.
    pub wrapped_master_key: String,
    /// Absent on records that predate the tag; resolves to `pbkdf2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfAlgo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_params: Option<KdfParams>,
    /// Absent on records that predate the tag; the nonce length decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrap_algo: Option<WrapAlgo>,
}

/// Key material after decode and validation. Every length invariant holds
/// and both algorithm tags are resolved.
#[derive(Debug, Clone)]
pub struct ValidatedKeyMaterial {
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub wrapped_master_key: Vec<u8>,
    pub kdf: KdfAlgo,
    pub kdf_params: KdfParams,
    pub wrap_algo: WrapAlgo,
}

impl KeyMaterial {
    /// Decode and validate the record. All violations are
    /// [`VaultError::InvalidKeyMaterial`], raised before any cryptography.
    pub fn validate(&self) -> Result<ValidatedKeyMaterial, VaultError> {
        let salt = encoding::b64_decode(&self.salt)
            .map_err(|e| VaultError::InvalidKeyMaterial(format!("salt: {e}")))?;
        let nonce = encoding::b64_decode(&self.iv)
            .map_err(|e| VaultError::InvalidKeyMaterial(format!("iv: {e}")))?;
        let wrapped_master_key = encoding::b64_decode(&self.wrapped_master_key)
            .map_err(|e| VaultError::InvalidKeyMaterial(format!("wrapped master key: {e}")))?;

        if salt.len() < kdf::MIN_SALT_LEN {
            return Err(VaultError::InvalidKeyMaterial(format!(
                "salt too short: {} bytes (minimum {})",
                salt.len(),
                kdf::MIN_SALT_LEN
            )));
        }
        if wrapped_master_key.is_empty() {
            return Err(VaultError::InvalidKeyMaterial(
                "wrapped master key is empty".into(),
            ));
        }

        let wrap_algo = WrapAlgo::resolve(self.wrap_algo, nonce.len())
            .map_err(|e| VaultError::InvalidKeyMaterial(e.to_string()))?;

        // Records without a KDF tag predate the Argon2id migration.
        let kdf = self.kdf.unwrap_or(KdfAlgo::Pbkdf2);

        Ok(ValidatedKeyMaterial {
            salt,
            nonce,
            wrapped_master_key,
            kdf,
            kdf_params: self.kdf_params.unwrap_or_default(),
            wrap_algo,
        })
    }
}

/// A configured third-party service, owned by exactly one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub name: String,
    /// Base64 ciphertext of the JSON credential object.
    pub encrypted_config: String,
    /// Base64 nonce, generated independently of the key material nonce.
    pub config_iv: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_algo: Option<WrapAlgo>,
}

/// A source's config ciphertext after decode and validation.
#[derive(Debug, Clone)]
pub struct ValidatedSourceConfig {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub algo: WrapAlgo,
}

impl Source {
    /// Decode and validate the encrypted config. All violations are
    /// [`VaultError::InvalidSourceConfig`].
    pub fn validated_config(&self) -> Result<ValidatedSourceConfig, VaultError> {
        let ciphertext = encoding::b64_decode(&self.encrypted_config)
            .map_err(|e| VaultError::InvalidSourceConfig(format!("encrypted config: {e}")))?;
        let nonce = encoding::b64_decode(&self.config_iv)
            .map_err(|e| VaultError::InvalidSourceConfig(format!("config iv: {e}")))?;
        if ciphertext.is_empty() {
            return Err(VaultError::InvalidSourceConfig(
                "encrypted config is empty".into(),
            ));
        }
        let algo = WrapAlgo::resolve(self.config_algo, nonce.len())
            .map_err(|e| VaultError::InvalidSourceConfig(e.to_string()))?;
        Ok(ValidatedSourceConfig {
            ciphertext,
            nonce,
            algo,
        })
    }
}

/// Plaintext source credentials, produced on demand and never persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCredentials {
    pub server: String,
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

// Manual Debug so a stray log line cannot leak the password.
impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}
