//! Codec helpers: base64 and UTF-8 text.
//!
//! Every byte buffer this subsystem persists or receives from the directory
//! is base64 (standard alphabet, padded). All encode/decode goes through
//! these helpers so the engine choice lives in one place.

use base64::{engine::general_purpose, Engine as _};

use crate::error::CryptoError;

pub fn b64_encode(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn b64_decode(text: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(general_purpose::STANDARD.decode(text)?)
}

pub fn utf8_encode(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

pub fn utf8_decode(bytes: &[u8]) -> Result<String, CryptoError> {
    Ok(String::from_utf8(bytes.to_vec())?)
}
