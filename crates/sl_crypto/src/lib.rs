//! sl_crypto - Streamlock cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited RustCrypto crates.
//! - Secret material is zeroized on drop.
//! - Algorithm choice is always explicit and validated: every AEAD and KDF
//!   call names its algorithm tag, and nonce/salt lengths are checked before
//!   any cryptographic operation runs.
//!
//! # Module layout
//! - `aead`     - AES-256-GCM / XChaCha20-Poly1305 encrypt/decrypt
//! - `kdf`      - PBKDF2 / Argon2id passphrase derivation
//! - `encoding` - base64 + UTF-8 codec helpers
//! - `error`    - unified error type

pub mod aead;
pub mod encoding;
pub mod error;
pub mod kdf;

pub use aead::WrapAlgo;
pub use error::CryptoError;
pub use kdf::{KdfAlgo, KdfParams, SymmetricKey};
