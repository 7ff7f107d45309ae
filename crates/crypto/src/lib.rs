//! Authenticated encryption and key derivation primitives shared by the
//! message bus, key store, and entity registry.
//!
//! Trait-based [`Cipher`] design allows swapping the encryption backend
//! without touching callers.

pub mod api_key;
pub mod error;
pub mod hkdf;
pub mod kdf;
pub mod traits;
pub mod xchacha20;

pub use {
    api_key::{generate_api_key, generate_entity_salt, hash_api_key, verify_api_key},
    error::CryptoError,
    hkdf::derive_message_key,
    kdf::KdfParams,
    traits::Cipher,
    xchacha20::XChaCha20Poly1305Cipher,
};
