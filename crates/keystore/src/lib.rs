//! Volatile process-memory store of per-entity message-encryption keys
//! (spec §4.6).
//!
//! Entries live only in this process: there is no persistence, and a restart
//! empties the store, requiring every entity to re-authenticate before its
//! queue pushes can be sealed again.

use std::collections::HashMap;

use loomgate_common::EntityId;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// `{entity_id -> 32-byte key}`, behind a single `RwLock` since reads
/// (one per bus push) dominate writes (one per authentication).
#[derive(Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<EntityId, Zeroizing<[u8; 32]>>>,
}

impl KeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the key for `entity_id`, e.g. after a successful
    /// authentication or key regeneration.
    pub async fn set(&self, entity_id: EntityId, key: Zeroizing<[u8; 32]>) {
        self.keys.write().await.insert(entity_id, key);
    }

    /// Fetch a copy of the key for `entity_id`, if one is currently held.
    pub async fn get(&self, entity_id: &EntityId) -> Option<[u8; 32]> {
        self.keys.read().await.get(entity_id).map(|k| **k)
    }

    /// Remove the key for `entity_id`, e.g. on key regeneration or entity
    /// deletion. Returns whether an entry was present.
    pub async fn delete(&self, entity_id: &EntityId) -> bool {
        self.keys.write().await.remove(entity_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.keys.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = KeyStore::new();
        let id = EntityId::from("entity-1");
        store.set(id.clone(), Zeroizing::new([7u8; 32])).await;
        assert_eq!(store.get(&id).await, Some([7u8; 32]));
    }

    #[tokio::test]
    async fn missing_entity_returns_none() {
        let store = KeyStore::new();
        assert_eq!(store.get(&EntityId::from("unknown")).await, None);
    }

    #[tokio::test]
    async fn delete_clears_entry() {
        let store = KeyStore::new();
        let id = EntityId::from("entity-1");
        store.set(id.clone(), Zeroizing::new([1u8; 32])).await;
        assert!(store.delete(&id).await);
        assert_eq!(store.get(&id).await, None);
        assert!(!store.delete(&id).await);
    }

    #[tokio::test]
    async fn regenerate_key_replaces_old_value() {
        let store = KeyStore::new();
        let id = EntityId::from("entity-1");
        store.set(id.clone(), Zeroizing::new([1u8; 32])).await;
        store.set(id.clone(), Zeroizing::new([2u8; 32])).await;
        assert_eq!(store.get(&id).await, Some([2u8; 32]));
    }
}
