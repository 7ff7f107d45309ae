//! Entity API-key generation, hashing, and constant-time verification
//! (spec §4.5).

use base64::Engine;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    kdf::{KdfParams, derive_key},
};

/// Generate a fresh random 32-byte salt.
#[must_use]
pub fn generate_entity_salt() -> Vec<u8> {
    let mut salt = [0u8; 32];
    rand::rng().fill_bytes(&mut salt);
    salt.to_vec()
}

/// Generate a fresh random API key, base64url-encoded, at least 32 bytes of
/// entropy before encoding.
#[must_use]
pub fn generate_api_key() -> Zeroizing<String> {
    let mut raw = [0u8; 32];
    rand::rng().fill_bytes(&mut raw);
    Zeroizing::new(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw))
}

/// Hash an API key with its salt using Argon2id. This is the value persisted
/// in the registry; the plaintext key is never stored.
pub fn hash_api_key(api_key: &str, salt: &[u8], params: &KdfParams) -> Result<Vec<u8>, CryptoError> {
    Ok(derive_key(api_key.as_bytes(), salt, params)?.to_vec())
}

/// Compare a presented API key against a stored hash in constant time.
///
/// Re-derives the hash from the presented key and salt, then compares
/// byte-by-byte without short-circuiting, so a mismatch on the first byte
/// takes exactly as long to observe as one on the last.
pub fn verify_api_key(
    presented: &str,
    salt: &[u8],
    params: &KdfParams,
    expected_hash: &[u8],
) -> Result<bool, CryptoError> {
    let candidate = derive_key(presented.as_bytes(), salt, params)?;
    Ok(constant_time_eq(&*candidate, expected_hash))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> KdfParams {
        KdfParams {
            m_cost: 256,
            t_cost: 1,
            p_cost: 1,
        }
    }

    #[test]
    fn verify_accepts_correct_key() {
        let salt = generate_entity_salt();
        let params = test_params();
        let key = "the-api-key";
        let hash = hash_api_key(key, &salt, &params).unwrap();
        assert!(verify_api_key(key, &salt, &params, &hash).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let salt = generate_entity_salt();
        let params = test_params();
        let hash = hash_api_key("the-api-key", &salt, &params).unwrap();
        assert!(!verify_api_key("wrong-key", &salt, &params, &hash).unwrap());
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(*a, *b);
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq(b"short", b"longer-value"));
    }
}
