//! HKDF-SHA256 derivation of per-entity message-encryption keys.
//!
//! Spec §4.6: the Key Store is populated at successful authentication by
//! applying a deterministic KDF to the presented API key. HKDF binds the
//! derived key to the specific entity via the `info` parameter so that two
//! entities never end up with the same encryption key even if (through some
//! bug elsewhere) they shared an API key.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

const INFO_PREFIX: &str = "loomgate-message-key:v1:";

/// Derive the 32-byte message-encryption key for `entity_id` from the
/// caller-presented `api_key`.
pub fn derive_message_key(
    api_key: &[u8],
    entity_id: &str,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, api_key);
    let mut okm = Zeroizing::new([0u8; 32]);
    let info = format!("{INFO_PREFIX}{entity_id}");
    hk.expand(info.as_bytes(), okm.as_mut())
        .map_err(|e| CryptoError::CipherError(format!("hkdf expand failed: {e}")))?;
    Ok(okm)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_same_inputs() {
        let k1 = derive_message_key(b"api-key-one", "entity-a").unwrap();
        let k2 = derive_message_key(b"api-key-one", "entity-a").unwrap();
        assert_eq!(*k1, *k2);
    }

    #[test]
    fn differs_per_entity() {
        let k1 = derive_message_key(b"api-key-one", "entity-a").unwrap();
        let k2 = derive_message_key(b"api-key-one", "entity-b").unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn differs_per_key() {
        let k1 = derive_message_key(b"api-key-one", "entity-a").unwrap();
        let k2 = derive_message_key(b"api-key-two", "entity-a").unwrap();
        assert_ne!(*k1, *k2);
    }
}
