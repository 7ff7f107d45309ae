//! Crypto crate error type.

/// Errors produced by KDF, HKDF, and cipher operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Encryption or decryption failed (tampered data, wrong key, wrong AAD).
    #[error("cipher error: {0}")]
    CipherError(String),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// KDF parameters were rejected by the underlying implementation.
    #[error("invalid kdf params: {0}")]
    InvalidParams(String),
}
