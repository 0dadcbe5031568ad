//! Passphrase key derivation.
//!
//! Two algorithms are in service:
//! - `pbkdf2`: PBKDF2-HMAC-SHA256, legacy accounts only. Iteration count
//!   comes from the stored record, defaulting to 100k when absent.
//! - `argon2id`: memory-hard derivation for all newly created accounts.
//!   64 MiB / 3 passes / 1 lane unless the record says otherwise.
//!
//! Derivation is deterministic and pure: identical inputs produce identical
//! keys on every platform. It is also intentionally expensive (on the order
//! of a second), so callers go through the key cache rather than deriving
//! per access.

use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

/// Size of every derived or generated key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Minimum salt length accepted by either KDF.
pub const MIN_SALT_LEN: usize = 16;

/// The legacy PBKDF2 record format fixes the salt at exactly 16 bytes.
pub const PBKDF2_SALT_LEN: usize = 16;

/// Iteration count applied when a legacy record omits one.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

pub const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
pub const ARGON2_TIME_COST: u32 = 3;
pub const ARGON2_PARALLELISM: u32 = 1;

// Ceilings on stored Argon2 parameters. A corrupted or hostile record must
// not be able to wedge the process inside an unbounded derivation.
const ARGON2_MEMORY_CEILING_KIB: u32 = 1024 * 1024;
const ARGON2_TIME_COST_CEILING: u32 = 16;
const ARGON2_PARALLELISM_CEILING: u32 = 8;

/// A 256-bit symmetric key. Zeroized on drop, never printed.
///
/// Used for both layers of the hierarchy: the KEK derived from the
/// passphrase and the master key it unwraps.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyMaterial(format!(
                "key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// KDF selector as stored in key material records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgo {
    #[serde(rename = "pbkdf2")]
    Pbkdf2,
    #[serde(rename = "argon2id")]
    Argon2id,
}

/// Stored KDF parameters. All fields optional on the wire; absent fields
/// fall back to the per-algorithm defaults above.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KdfParams {
    pub iterations: Option<u32>,
    pub memory_kib: Option<u32>,
    pub time_cost: Option<u32>,
    pub parallelism: Option<u32>,
}

/// Derive a 256-bit key from `passphrase` and `salt`.
///
/// Pure and deterministic. Never fails on a wrong passphrase; the only
/// reliable wrong-passphrase signal is a later AEAD authentication failure.
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    algo: KdfAlgo,
    params: &KdfParams,
) -> Result<SymmetricKey, CryptoError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "salt too short: {} bytes (minimum {MIN_SALT_LEN})",
            salt.len()
        )));
    }

    match algo {
        KdfAlgo::Pbkdf2 => {
            if salt.len() != PBKDF2_SALT_LEN {
                return Err(CryptoError::InvalidKeyMaterial(format!(
                    "pbkdf2 salt must be exactly {PBKDF2_SALT_LEN} bytes, got {}",
                    salt.len()
                )));
            }
            let iterations = params.iterations.unwrap_or(DEFAULT_PBKDF2_ITERATIONS);
            if iterations == 0 {
                return Err(CryptoError::InvalidKeyMaterial(
                    "pbkdf2 iteration count must be non-zero".into(),
                ));
            }
            let mut out = [0u8; KEY_LEN];
            pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut out);
            Ok(SymmetricKey::from_bytes(out))
        }
        KdfAlgo::Argon2id => {
            let memory_kib = params.memory_kib.unwrap_or(ARGON2_MEMORY_KIB);
            let time_cost = params.time_cost.unwrap_or(ARGON2_TIME_COST);
            let parallelism = params.parallelism.unwrap_or(ARGON2_PARALLELISM);
            if memory_kib > ARGON2_MEMORY_CEILING_KIB
                || time_cost > ARGON2_TIME_COST_CEILING
                || parallelism > ARGON2_PARALLELISM_CEILING
            {
                return Err(CryptoError::InvalidKeyMaterial(format!(
                    "argon2 parameters exceed ceiling (m={memory_kib}KiB t={time_cost} p={parallelism})"
                )));
            }
            let argon_params = Params::new(memory_kib, time_cost, parallelism, Some(KEY_LEN))
                .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
            let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
            let mut out = [0u8; KEY_LEN];
            argon2
                .hash_password_into(passphrase.as_bytes(), salt, &mut out)
                .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
            Ok(SymmetricKey::from_bytes(out))
        }
    }
}

/// Generate a fresh random 16-byte salt. Stored alongside the wrapped key
/// (not secret).
pub fn generate_salt() -> [u8; PBKDF2_SALT_LEN] {
    let mut salt = [0u8; PBKDF2_SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
