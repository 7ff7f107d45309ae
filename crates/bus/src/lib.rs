//! Per-entity message queues with TTL and capacity bounds, and optional
//! AEAD-at-rest (spec §4.3).

pub mod error;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use loomgate_common::{ChannelId, EntityId, MessageId, QueuedMessage, ServerId, UserId};
use loomgate_crypto::{Cipher, XChaCha20Poly1305Cipher};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, RwLock, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub use error::{BusError, Result};

const NONCE_LEN: usize = 24;

/// Plaintext input to [`Bus::push`]. The bus computes `expires_at` from its
/// configured TTL and, when an encryption key is supplied, seals
/// `content`/`author_name`/`channel_name` before storing.
#[derive(Debug, Clone)]
pub struct PushInput {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub channel_name: Option<String>,
    pub server_id: ServerId,
    pub author_id: UserId,
    pub author_name: String,
    pub content: String,
    pub addressed: bool,
    pub triggered: bool,
}

#[derive(Serialize, Deserialize)]
struct SealedFields {
    content: String,
    author_name: String,
    channel_name: Option<String>,
}

/// Per-entity bounded, TTL-expiring message queue (spec §4.3).
pub struct Bus {
    queues: RwLock<HashMap<EntityId, Arc<Mutex<VecDeque<QueuedMessage>>>>>,
    ttl: Duration,
    max_len: usize,
    sweep_interval: Duration,
    cipher: XChaCha20Poly1305Cipher,
    sweeper: Mutex<Option<(JoinHandle<()>, oneshot::Sender<()>)>>,
}

/// Default queue TTL (spec §4.3, §5): 10 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
/// Default per-entity queue capacity (spec §4.3, §5).
pub const DEFAULT_MAX_LEN: usize = 200;
/// Default sweep interval (spec §4.3, §5).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

impl Bus {
    #[must_use]
    pub fn new(ttl: Duration, max_len: usize, sweep_interval: Duration) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            ttl,
            max_len,
            sweep_interval,
            cipher: XChaCha20Poly1305Cipher,
            sweeper: Mutex::new(None),
        }
    }

    /// Push a message onto `entity_id`'s queue, creating it lazily. If the
    /// queue is at capacity, the oldest entry is dropped to make room (spec
    /// §8 invariant: cap + oldest evicted). When `enc_key` is given, the
    /// human-readable fields are sealed; metadata (ids, timestamps,
    /// addressed/triggered) always stays cleartext.
    pub async fn push(&self, entity_id: &EntityId, input: PushInput, enc_key: Option<&[u8; 32]>) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + self.ttl;

        let (content, author_name, channel_name, ciphertext, nonce) = match enc_key {
            Some(key) => {
                let sealed = SealedFields {
                    content: input.content,
                    author_name: input.author_name,
                    channel_name: input.channel_name,
                };
                let plaintext = serde_json::to_vec(&sealed)
                    .map_err(|e| BusError::Crypto(loomgate_crypto::CryptoError::CipherError(e.to_string())))?;
                let blob = self.cipher.encrypt(key, &plaintext, entity_id.as_str().as_bytes())?;
                let (nonce, ct) = blob.split_at(NONCE_LEN);
                (None, None, None, Some(ct.to_vec()), Some(nonce.to_vec()))
            },
            None => (
                Some(input.content),
                Some(input.author_name),
                input.channel_name,
                None,
                None,
            ),
        };

        let message = QueuedMessage {
            message_id: input.message_id,
            channel_id: input.channel_id,
            channel_name,
            server_id: input.server_id,
            author_id: input.author_id,
            author_name,
            content,
            timestamp: now,
            addressed: input.addressed,
            triggered: input.triggered,
            expires_at,
            ciphertext,
            nonce,
        };

        let queue = self.queue_for(entity_id).await;
        let mut queue = queue.lock().await;
        if queue.len() >= self.max_len {
            queue.pop_front();
        }
        queue.push_back(message);
        Ok(())
    }

    /// Drain and empty `entity_id`'s queue in FIFO order, decrypting sealed
    /// items with `key` when one is given. Fails with [`BusError::KeyMissing`]
    /// if any queued item is sealed and no key was supplied; tampered or
    /// wrong-key items are dropped individually and logged, not propagated.
    pub async fn drain(&self, entity_id: &EntityId, key: Option<&[u8; 32]>) -> Result<Vec<QueuedMessage>> {
        let queue = self.queue_for(entity_id).await;
        let mut queue = queue.lock().await;
        let items: Vec<QueuedMessage> = queue.drain(..).collect();
        drop(queue);
        self.resolve(entity_id, items, key).await
    }

    /// Non-destructive equivalent of [`Bus::drain`], returning at most
    /// `limit` items without removing them.
    pub async fn peek(
        &self,
        entity_id: &EntityId,
        limit: usize,
        key: Option<&[u8; 32]>,
    ) -> Result<Vec<QueuedMessage>> {
        let queue = self.queue_for(entity_id).await;
        let items: Vec<QueuedMessage> = queue.lock().await.iter().take(limit).cloned().collect();
        self.resolve(entity_id, items, key).await
    }

    async fn resolve(
        &self,
        entity_id: &EntityId,
        items: Vec<QueuedMessage>,
        key: Option<&[u8; 32]>,
    ) -> Result<Vec<QueuedMessage>> {
        if key.is_none() && items.iter().any(QueuedMessage::is_encrypted) {
            return Err(BusError::KeyMissing(entity_id.to_string()));
        }

        let mut out = Vec::with_capacity(items.len());
        for mut item in items {
            if item.is_encrypted() {
                let Some(key) = key else {
                    return Err(BusError::KeyMissing(entity_id.to_string()));
                };
                match self.unseal(entity_id, &item, key) {
                    Ok(sealed) => {
                        item.content = Some(sealed.content);
                        item.author_name = Some(sealed.author_name);
                        item.channel_name = sealed.channel_name;
                        item.ciphertext = None;
                        item.nonce = None;
                    },
                    Err(e) => {
                        warn!(entity_id = %entity_id, error = %e, "dropping tampered queue item");
                        continue;
                    },
                }
            }
            out.push(item);
        }
        Ok(out)
    }

    fn unseal(
        &self,
        entity_id: &EntityId,
        item: &QueuedMessage,
        key: &[u8; 32],
    ) -> Result<SealedFields> {
        let ciphertext = item
            .ciphertext
            .as_ref()
            .ok_or_else(|| BusError::DecryptFailed("missing ciphertext".into()))?;
        let nonce = item
            .nonce
            .as_ref()
            .ok_or_else(|| BusError::DecryptFailed("missing nonce".into()))?;

        let mut blob = Vec::with_capacity(nonce.len() + ciphertext.len());
        blob.extend_from_slice(nonce);
        blob.extend_from_slice(ciphertext);

        let plaintext = self
            .cipher
            .decrypt(key, &blob, entity_id.as_str().as_bytes())
            .map_err(|e| BusError::DecryptFailed(e.to_string()))?;

        serde_json::from_slice(&plaintext).map_err(|e| BusError::DecryptFailed(e.to_string()))
    }

    async fn queue_for(&self, entity_id: &EntityId) -> Arc<Mutex<VecDeque<QueuedMessage>>> {
        if let Some(queue) = self.queues.read().await.get(entity_id) {
            return queue.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(entity_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// Remove expired items across all queues. Runs on every sweep tick and
    /// can also be called directly (e.g. in tests).
    pub async fn sweep(&self) {
        let now = Utc::now();
        let queues: Vec<_> = self.queues.read().await.values().cloned().collect();
        for queue in queues {
            let mut queue = queue.lock().await;
            let before = queue.len();
            queue.retain(|m| m.expires_at > now);
            let removed = before - queue.len();
            if removed > 0 {
                debug!(removed, "swept expired queue items");
            }
        }
    }

    /// Spawn the periodic sweep task. Idempotent: calling `start` twice
    /// without an intervening `stop` is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.sweeper.lock().await;
        if guard.is_some() {
            return;
        }

        let (tx, mut rx) = oneshot::channel();
        let bus = Arc::clone(self);
        let interval = self.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => bus.sweep().await,
                    _ = &mut rx => break,
                }
            }
            info!("bus sweeper stopped");
        });

        *guard = Some((handle, tx));
    }

    /// Stop the sweep task and await its exit.
    pub async fn stop(&self) {
        let handle = self.sweeper.lock().await.take();
        if let Some((handle, tx)) = handle {
            let _ = tx.send(());
            let _ = handle.await;
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_LEN, DEFAULT_SWEEP_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: &str) -> PushInput {
        PushInput {
            message_id: MessageId::from(id),
            channel_id: ChannelId::from("channel-1"),
            channel_name: Some("general".into()),
            server_id: ServerId::from("server-1"),
            author_id: UserId::from("user-1"),
            author_name: "Ada".into(),
            content: "hello".into(),
            addressed: false,
            triggered: false,
        }
    }

    #[tokio::test]
    async fn push_then_drain_preserves_fifo_order() {
        let bus = Bus::new(Duration::from_secs(60), 200, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        bus.push(&entity, input("m1"), None).await.unwrap();
        bus.push(&entity, input("m2"), None).await.unwrap();
        bus.push(&entity, input("m3"), None).await.unwrap();

        let drained = bus.drain(&entity, None).await.unwrap();
        let ids: Vec<_> = drained.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn drain_empties_the_queue() {
        let bus = Bus::new(Duration::from_secs(60), 200, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        bus.push(&entity, input("m1"), None).await.unwrap();
        bus.drain(&entity, None).await.unwrap();
        assert!(bus.drain(&entity, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        let bus = Bus::new(Duration::from_secs(60), 2, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        bus.push(&entity, input("m1"), None).await.unwrap();
        bus.push(&entity, input("m2"), None).await.unwrap();
        bus.push(&entity, input("m3"), None).await.unwrap();

        let drained = bus.drain(&entity, None).await.unwrap();
        let ids: Vec<_> = drained.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[tokio::test]
    async fn ttl_expiry_removed_on_sweep() {
        let bus = Bus::new(Duration::from_millis(1), 200, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        bus.push(&entity, input("m1"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.sweep().await;
        assert!(bus.drain(&entity, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn encrypted_push_round_trips_with_key() {
        let bus = Bus::new(Duration::from_secs(60), 200, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        let key = [9u8; 32];
        bus.push(&entity, input("m1"), Some(&key)).await.unwrap();

        let drained = bus.drain(&entity, Some(&key)).await.unwrap();
        assert_eq!(drained[0].content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn drain_without_key_fails_when_encrypted() {
        let bus = Bus::new(Duration::from_secs(60), 200, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        let key = [9u8; 32];
        bus.push(&entity, input("m1"), Some(&key)).await.unwrap();

        let result = bus.drain(&entity, None).await;
        assert!(matches!(result, Err(BusError::KeyMissing(_))));
    }

    #[tokio::test]
    async fn drain_with_wrong_key_drops_item_without_failing() {
        let bus = Bus::new(Duration::from_secs(60), 200, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        bus.push(&entity, input("m1"), Some(&[1u8; 32])).await.unwrap();

        let drained = bus.drain(&entity, Some(&[2u8; 32])).await.unwrap();
        assert!(drained.is_empty());
    }

    #[tokio::test]
    async fn mixed_cleartext_and_encrypted_items_coexist() {
        let bus = Bus::new(Duration::from_secs(60), 200, Duration::from_secs(30));
        let entity = EntityId::from("entity-1");
        bus.push(&entity, input("m1"), None).await.unwrap();
        bus.push(&entity, input("m2"), Some(&[1u8; 32])).await.unwrap();

        let drained = bus.drain(&entity, Some(&[1u8; 32])).await.unwrap();
        assert_eq!(drained.len(), 2);
    }

    #[tokio::test]
    async fn start_and_stop_sweeper_is_cancellable() {
        let bus = Arc::new(Bus::new(Duration::from_secs(60), 200, Duration::from_millis(10)));
        bus.start().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        bus.stop().await;
    }
}
