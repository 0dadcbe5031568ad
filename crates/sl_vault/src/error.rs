use sl_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("A passphrase is required but none is available")]
    PassphraseRequired,

    #[error("Passphrase entry was cancelled")]
    UserCancelled,

    #[error("Passphrase must be at least {min} characters")]
    WeakPassphrase { min: usize },

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Invalid source configuration: {0}")]
    InvalidSourceConfig(String),

    #[error("Decryption failed (wrong passphrase or corrupted data)")]
    DecryptionFailed,

    #[error("Key derivation unavailable: {0}")]
    KdfUnavailable(String),

    #[error("Directory error: {0}")]
    Directory(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl VaultError {
    /// Only the ambiguous decryption failure warrants the retry-once path.
    /// Validation errors describe corrupted stored data; retrying with the
    /// same data cannot help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DecryptionFailed)
    }
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AeadDecrypt => Self::DecryptionFailed,
            CryptoError::AeadEncrypt => Self::InvalidKeyMaterial("AEAD encryption failed".into()),
            CryptoError::KeyDerivation(msg) => Self::KdfUnavailable(msg),
            CryptoError::InvalidKeyMaterial(msg) => Self::InvalidKeyMaterial(msg),
            CryptoError::Base64Decode(e) => Self::InvalidKeyMaterial(format!("base64: {e}")),
            CryptoError::Utf8(e) => Self::InvalidSourceConfig(format!("utf-8: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_decryption_failure_is_retryable() {
        assert!(VaultError::DecryptionFailed.is_retryable());
        assert!(!VaultError::SourceNotFound("s1".into()).is_retryable());
        assert!(!VaultError::UserCancelled.is_retryable());
        assert!(!VaultError::InvalidKeyMaterial("bad".into()).is_retryable());
        assert!(!VaultError::InvalidSourceConfig("bad".into()).is_retryable());
        assert!(!VaultError::KdfUnavailable("no argon2".into()).is_retryable());
    }

    #[test]
    fn aead_auth_failure_maps_to_decryption_failed() {
        let err: VaultError = CryptoError::AeadDecrypt.into();
        assert!(matches!(err, VaultError::DecryptionFailed));
    }
}
