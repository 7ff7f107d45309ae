//! Cipher trait for swappable authenticated encryption backends.

use crate::error::CryptoError;

/// Trait for authenticated encryption with associated data (AEAD).
///
/// Implementations can be swapped without changing callers. Each
/// implementation has a unique version tag, enabling future cipher
/// migrations of data already sealed under an older one.
pub trait Cipher: Send + Sync {
    /// Unique identifier for this cipher (not embedded by `encrypt` itself —
    /// callers that persist the tag alongside a blob use this to pick the
    /// right cipher back out at decrypt time).
    fn version_tag(&self) -> u8;

    /// Encrypt `plaintext` with `key` and `aad` (additional authenticated data).
    ///
    /// Returns `[nonce || ciphertext || tag]` — the exact layout is
    /// cipher-specific but must be parseable by [`decrypt`](Self::decrypt).
    fn encrypt(
        &self,
        key: &[u8; 32],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a blob previously produced by [`encrypt`](Self::encrypt).
    fn decrypt(
        &self,
        key: &[u8; 32],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}
