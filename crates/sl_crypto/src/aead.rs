//! Authenticated encryption.
//!
//! Two AEADs are in service, selected by the stored algorithm tag:
//! - AES-256-GCM, 12-byte nonce (legacy records)
//! - XChaCha20-Poly1305, 24-byte nonce (current)
//!
//! The nonce is stored detached from the ciphertext (the record carries its
//! own `iv` field), so encrypt/decrypt take it as a separate argument. The
//! nonce length doubles as an algorithm cross-check: 12 bytes implies GCM
//! and 24 bytes implies XChaCha20. A mismatch between tag and length, or a
//! nonce of any other length, is rejected before a cipher is constructed.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::SymmetricKey;

pub const GCM_NONCE_LEN: usize = 12;
pub const XCHACHA_NONCE_LEN: usize = 24;

/// AEAD selector as stored in key material and source records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrapAlgo {
    #[serde(rename = "aes-gcm-256")]
    Aes256Gcm,
    #[serde(rename = "xchacha20poly1305")]
    XChaCha20Poly1305,
}

impl WrapAlgo {
    /// The exact nonce length this algorithm requires.
    pub const fn nonce_len(self) -> usize {
        match self {
            Self::Aes256Gcm => GCM_NONCE_LEN,
            Self::XChaCha20Poly1305 => XCHACHA_NONCE_LEN,
        }
    }

    /// Infer the algorithm from a nonce length, if unambiguous.
    pub fn for_nonce_len(len: usize) -> Option<Self> {
        match len {
            GCM_NONCE_LEN => Some(Self::Aes256Gcm),
            XCHACHA_NONCE_LEN => Some(Self::XChaCha20Poly1305),
            _ => None,
        }
    }

    /// Resolve the effective algorithm from an optional stored tag plus the
    /// stored nonce length.
    ///
    /// A present tag must agree with the nonce length. A missing tag with a
    /// 12-byte nonce is GCM (records from before the tag existed); a missing
    /// tag with any other length is fatal.
    pub fn resolve(tag: Option<WrapAlgo>, nonce_len: usize) -> Result<Self, CryptoError> {
        match tag {
            Some(algo) => {
                if algo.nonce_len() != nonce_len {
                    return Err(CryptoError::InvalidKeyMaterial(format!(
                        "nonce length {nonce_len} does not match algorithm {algo} (requires {})",
                        algo.nonce_len()
                    )));
                }
                Ok(algo)
            }
            None => match Self::for_nonce_len(nonce_len) {
                Some(Self::Aes256Gcm) => Ok(Self::Aes256Gcm),
                _ => Err(CryptoError::InvalidKeyMaterial(format!(
                    "no algorithm tag and nonce length {nonce_len} is not the legacy 12 bytes"
                ))),
            },
        }
    }
}

impl fmt::Display for WrapAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes256Gcm => f.write_str("aes-gcm-256"),
            Self::XChaCha20Poly1305 => f.write_str("xchacha20poly1305"),
        }
    }
}

fn check_nonce(algo: WrapAlgo, nonce: &[u8]) -> Result<(), CryptoError> {
    if nonce.len() != algo.nonce_len() {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "nonce length {} invalid for {algo} (requires {})",
            nonce.len(),
            algo.nonce_len()
        )));
    }
    Ok(())
}

/// Encrypt `plaintext` under `key` with a caller-supplied nonce.
///
/// The nonce must be fresh per encryption; use [`generate_nonce`].
pub fn encrypt(
    algo: WrapAlgo,
    key: &SymmetricKey,
    nonce: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_nonce(algo, nonce)?;
    match algo {
        WrapAlgo::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|_| CryptoError::AeadEncrypt)?;
            cipher
                .encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext)
                .map_err(|_| CryptoError::AeadEncrypt)
        }
        WrapAlgo::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|_| CryptoError::AeadEncrypt)?;
            cipher
                .encrypt(XNonce::from_slice(nonce), plaintext)
                .map_err(|_| CryptoError::AeadEncrypt)
        }
    }
}

/// Decrypt `ciphertext` under `key`.
///
/// Fails with [`CryptoError::AeadDecrypt`] on a wrong key, tampered
/// ciphertext, or tag mismatch. This is the only reliable signal of a wrong
/// passphrase anywhere in the hierarchy. The plaintext is zeroized when the
/// caller drops it.
pub fn decrypt(
    algo: WrapAlgo,
    key: &SymmetricKey,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    check_nonce(algo, nonce)?;
    let plaintext = match algo {
        WrapAlgo::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
                .map_err(|_| CryptoError::AeadDecrypt)?;
            cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::AeadDecrypt)?
        }
        WrapAlgo::XChaCha20Poly1305 => {
            let cipher = XChaCha20Poly1305::new_from_slice(key.as_bytes())
                .map_err(|_| CryptoError::AeadDecrypt)?;
            cipher
                .decrypt(XNonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::AeadDecrypt)?
        }
    };
    Ok(Zeroizing::new(plaintext))
}

/// Fresh random nonce of the length `algo` requires.
pub fn generate_nonce(algo: WrapAlgo) -> Vec<u8> {
    let mut nonce = vec![0u8; algo.nonce_len()];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}
