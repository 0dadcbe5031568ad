//! Wrap-side provisioning: creating key material and sealing source configs.
//!
//! New accounts always get Argon2id + XChaCha20-Poly1305; the PBKDF2 and
//! AES-GCM paths exist only to read records written before the migration.

use zeroize::Zeroizing;

use sl_crypto::{aead, encoding, kdf, KdfAlgo, KdfParams, SymmetricKey, WrapAlgo};

use crate::error::VaultError;
use crate::models::{KeyMaterial, SourceCredentials, MIN_PASSPHRASE_LEN};

/// A freshly provisioned account key: the wire-form record to hand to the
/// directory, plus the unwrapped master key for immediate use (e.g. sealing
/// the first source config without a prompt round-trip).
pub struct ProvisionedKeyMaterial {
    pub key_material: KeyMaterial,
    pub master_key: SymmetricKey,
}

impl std::fmt::Debug for ProvisionedKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedKeyMaterial")
            .field("key_material", &self.key_material)
            .field("master_key", &"<redacted>")
            .finish()
    }
}

/// Create key material for a new account.
///
/// Generates a random master key, derives a KEK from `passphrase` with
/// Argon2id at the recommended parameters, and wraps the master key under
/// XChaCha20-Poly1305 with a fresh nonce.
pub fn provision_key_material(passphrase: &str) -> Result<ProvisionedKeyMaterial, VaultError> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(VaultError::WeakPassphrase {
            min: MIN_PASSPHRASE_LEN,
        });
    }

    let salt = kdf::generate_salt();
    // Record the parameters explicitly so future default changes cannot
    // orphan this record.
    let params = KdfParams {
        memory_kib: Some(kdf::ARGON2_MEMORY_KIB),
        time_cost: Some(kdf::ARGON2_TIME_COST),
        parallelism: Some(kdf::ARGON2_PARALLELISM),
        ..KdfParams::default()
    };
    let kek = kdf::derive_key(passphrase, &salt, KdfAlgo::Argon2id, &params)?;

    let master_key = SymmetricKey::generate();
    let nonce = aead::generate_nonce(WrapAlgo::XChaCha20Poly1305);
    let wrapped = aead::encrypt(
        WrapAlgo::XChaCha20Poly1305,
        &kek,
        &nonce,
        master_key.as_bytes(),
    )?;

    Ok(ProvisionedKeyMaterial {
        key_material: KeyMaterial {
            salt: encoding::b64_encode(&salt),
            iv: encoding::b64_encode(&nonce),
            wrapped_master_key: encoding::b64_encode(&wrapped),
            kdf: Some(KdfAlgo::Argon2id),
            kdf_params: Some(params),
            wrap_algo: Some(WrapAlgo::XChaCha20Poly1305),
        },
        master_key,
    })
}

/// Seal a source's credentials under the account master key.
///
/// Returns `(encrypted_config, config_iv)` in wire form (base64), ready to
/// store on a [`crate::models::Source`].
pub fn seal_source_config(
    master_key: &SymmetricKey,
    credentials: &SourceCredentials,
) -> Result<(String, String), VaultError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(credentials)?);
    let nonce = aead::generate_nonce(WrapAlgo::XChaCha20Poly1305);
    let ciphertext = aead::encrypt(WrapAlgo::XChaCha20Poly1305, master_key, &nonce, &plaintext)?;
    Ok((
        encoding::b64_encode(&ciphertext),
        encoding::b64_encode(&nonce),
    ))
}
