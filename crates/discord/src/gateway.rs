//! Gateway adapter: normalises inbound Discord events and hands them to
//! whoever holds the receiving end of the event channel (spec §4.1).

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::Utc;
use loomgate_common::{ChannelId, MessageId, NormalisedMessage, RoleId, ServerId, UserId};
use loomgate_registry::Registry;
use serenity::{
    all::{Context, EventHandler, GatewayIntents, Guild, GuildId, Message, Ready},
    async_trait,
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

/// Size of the bounded dedup set (spec §4.1, §5): large enough to absorb a
/// gateway resume replaying recent events without unbounded memory growth.
const DEDUP_CAPACITY: usize = 100;

/// Events the adapter emits towards the router/control-plane layer.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready { bot_user_id: UserId },
    Message(NormalisedMessage),
    GuildCreate { server_id: ServerId },
}

/// Normalises Discord gateway events and forwards them over an unbounded
/// channel. Holds a [`Registry`] handle purely to check server bans and
/// auto-leave — it does not perform routing itself.
pub struct GatewayAdapter {
    registry: Arc<Registry>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    seen_message_ids: Mutex<(VecDeque<String>, std::collections::HashSet<String>)>,
    ready_emitted: AtomicBool,
    bot_user_id: RwLock<Option<UserId>>,
}

impl GatewayAdapter {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = Self {
            registry,
            events: tx,
            seen_message_ids: Mutex::new((VecDeque::new(), std::collections::HashSet::new())),
            ready_emitted: AtomicBool::new(false),
            bot_user_id: RwLock::new(None),
        };
        (adapter, rx)
    }

    /// Required gateway intents (spec §6: server/server-messages/
    /// message-content/server-members).
    #[must_use]
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::MESSAGE_CONTENT
    }

    pub async fn bot_user_id(&self) -> Option<UserId> {
        self.bot_user_id.read().await.clone()
    }

    /// Returns `true` if `message_id` was already seen (and records it if
    /// not), enforcing the bounded FIFO dedup set.
    async fn is_duplicate(&self, message_id: &str) -> bool {
        let mut guard = self.seen_message_ids.lock().await;
        let (order, set) = &mut *guard;
        if !set.insert(message_id.to_string()) {
            return true;
        }
        order.push_back(message_id.to_string());
        if order.len() > DEDUP_CAPACITY {
            if let Some(oldest) = order.pop_front() {
                set.remove(&oldest);
            }
        }
        false
    }

    fn emit(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            debug!("gateway event receiver dropped; discarding event");
        }
    }
}

#[async_trait]
impl EventHandler for GatewayAdapter {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        let bot_user_id = UserId::from(ready.user.id.to_string());
        *self.bot_user_id.write().await = Some(bot_user_id.clone());

        if !self.ready_emitted.swap(true, Ordering::SeqCst) {
            info!(bot_user_id = %bot_user_id, guilds = ready.guilds.len(), "gateway ready");
            self.emit(GatewayEvent::Ready { bot_user_id });
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let server_id = ServerId::from(guild.id.to_string());

        match self.registry.is_server_banned(&server_id).await {
            Ok(true) => {
                warn!(server_id = %server_id, "joined a banned server, leaving");
                if let Err(e) = ctx.http.leave_guild(guild.id).await {
                    warn!(server_id = %server_id, error = %e, "failed to leave banned server");
                }
                return;
            },
            Ok(false) => {},
            Err(e) => warn!(server_id = %server_id, error = %e, "ban check failed"),
        }

        self.emit(GatewayEvent::GuildCreate { server_id });
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(guild_id) = msg.guild_id else {
            return; // DMs are out of scope (spec §1 non-goals).
        };

        if msg.content.is_empty() {
            return;
        }

        let message_id = msg.id.to_string();
        if self.is_duplicate(&message_id).await {
            debug!(message_id, "dropping duplicate gateway event");
            return;
        }

        let server_id = ServerId::from(guild_id.to_string());
        match self.registry.is_server_banned(&server_id).await {
            Ok(true) => {
                if let Err(e) = ctx.http.leave_guild(guild_id).await {
                    warn!(server_id = %server_id, error = %e, "failed to leave banned server");
                }
                return;
            },
            Ok(false) => {},
            Err(e) => warn!(server_id = %server_id, error = %e, "ban check failed"),
        }

        let normalised = NormalisedMessage {
            message_id: MessageId::from(message_id),
            channel_id: ChannelId::from(msg.channel_id.to_string()),
            server_id,
            author_id: UserId::from(msg.author.id.to_string()),
            // Server nickname, then platform display name, then handle.
            author_display_name: msg
                .member
                .as_ref()
                .and_then(|m| m.nick.clone())
                .or_else(|| msg.author.global_name.clone())
                .unwrap_or_else(|| msg.author.name.clone()),
            author_is_bot: msg.author.bot,
            webhook_id: msg.webhook_id.map(|id| id.to_string()),
            content: msg.content.clone(),
            timestamp: msg.timestamp.with_timezone(&Utc),
            mentioned_role_ids: msg
                .mention_roles
                .iter()
                .map(|id| RoleId::from(id.to_string()))
                .collect(),
            reply_to_message_id: msg
                .referenced_message
                .as_ref()
                .map(|m| MessageId::from(m.id.to_string())),
        };

        self.emit(GatewayEvent::Message(normalised));
    }

    async fn guild_ban_addition(
        &self,
        ctx: Context,
        guild_id: GuildId,
        banned_user: serenity::all::User,
    ) {
        let Some(bot_id) = self.bot_user_id().await else {
            return;
        };
        if banned_user.id.to_string() == bot_id.as_str() {
            let server_id = ServerId::from(guild_id.to_string());
            info!(server_id = %server_id, "bot banned from server, leaving");
            if let Err(e) = ctx.http.leave_guild(guild_id).await {
                warn!(server_id = %server_id, error = %e, "failed to leave after ban");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_collapses_repeated_ids() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        loomgate_registry::run_migrations(&pool).await.unwrap();
        let registry = Arc::new(Registry::with_pool(pool));
        let (adapter, _rx) = GatewayAdapter::new(registry);

        assert!(!adapter.is_duplicate("m1").await);
        assert!(adapter.is_duplicate("m1").await);
        assert!(!adapter.is_duplicate("m2").await);
    }

    #[tokio::test]
    async fn dedup_set_is_bounded() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        loomgate_registry::run_migrations(&pool).await.unwrap();
        let registry = Arc::new(Registry::with_pool(pool));
        let (adapter, _rx) = GatewayAdapter::new(registry);

        for i in 0..(DEDUP_CAPACITY + 10) {
            assert!(!adapter.is_duplicate(&format!("m{i}")).await);
        }
        // The earliest ids should have been evicted and are treated as new again.
        assert!(!adapter.is_duplicate("m0").await);
    }
}
