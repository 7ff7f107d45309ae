//! Per-message fan-out to entity queues (spec §4.2).
//!
//! For each [`NormalisedMessage`] the router decides which entities should
//! receive it, computes `addressed`/`triggered` flags, and pushes onto the
//! [`Bus`]. Per-entity failures are isolated: one entity's registry or bus
//! error never stops evaluation of the others.

pub mod error;

use std::{collections::HashMap, sync::Arc};

use loomgate_bus::{Bus, PushInput};
use loomgate_common::{ChannelId, NormalisedMessage, OwnerId, RoleId};
use loomgate_keystore::KeyStore;
use loomgate_registry::{Entity, EntityServerConfig, Registry};
use serenity::all::{Cache, Http, UserId as SerenityUserId};
use tracing::{debug, warn};

pub use error::{Result, RouterError};

const OWNER_PREVIEW_LEN: usize = 200;

/// Evaluates inbound messages against entity subscriptions and fans out to
/// the message bus, dispatching fire-and-forget owner notifications.
pub struct Router {
    registry: Arc<Registry>,
    bus: Arc<Bus>,
    keystore: Arc<KeyStore>,
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl Router {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        bus: Arc<Bus>,
        keystore: Arc<KeyStore>,
        http: Arc<Http>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            registry,
            bus,
            keystore,
            http,
            cache,
        }
    }

    /// Evaluates one inbound message. Returns an error only when the
    /// subscriber or role lookup itself fails; per-entity push/notification
    /// failures are logged and swallowed.
    pub async fn route(&self, msg: NormalisedMessage) -> Result<()> {
        if msg.author_is_bot || msg.webhook_id.is_some() || msg.content.trim().is_empty() {
            return Ok(());
        }

        let subscribers = self
            .registry
            .get_entities_for_channel(&msg.server_id, &msg.channel_id)
            .await
            .map_err(RouterError::Registry)?;

        if subscribers.is_empty() {
            return Ok(());
        }

        let role_map = if msg.mentioned_role_ids.is_empty() {
            HashMap::new()
        } else {
            self.registry
                .get_role_entity_map(&msg.server_id)
                .await
                .map_err(RouterError::Registry)?
        };

        let channel_name = self.resolve_channel_name(&msg.channel_id);

        for (entity, config) in subscribers {
            self.route_to_entity(&msg, &entity, &config, &role_map, channel_name.as_deref())
                .await;
        }

        Ok(())
    }

    async fn route_to_entity(
        &self,
        msg: &NormalisedMessage,
        entity: &Entity,
        config: &EntityServerConfig,
        role_map: &HashMap<RoleId, loomgate_common::EntityId>,
        channel_name: Option<&str>,
    ) {
        if config.blocked_channels.contains(&msg.channel_id) {
            return;
        }

        let lowered = msg.content.to_lowercase();
        let triggered = entity
            .triggers
            .iter()
            .any(|word| lowered.contains(&word.to_lowercase()));

        let addressed = msg
            .mentioned_role_ids
            .iter()
            .any(|role_id| role_map.get(role_id) == Some(&entity.id));

        let watched = config.watch_channels.is_empty()
            || config.watch_channels.contains(&msg.channel_id)
            || triggered
            || addressed;
        if !watched {
            return;
        }

        let enc_key = self.keystore.get(&entity.id).await;
        let input = PushInput {
            message_id: msg.message_id.clone(),
            channel_id: msg.channel_id.clone(),
            channel_name: channel_name.map(str::to_string),
            server_id: msg.server_id.clone(),
            author_id: msg.author_id.clone(),
            author_name: msg.author_display_name.clone(),
            content: msg.content.clone(),
            addressed,
            triggered,
        };

        if let Err(e) = self.bus.push(&entity.id, input, enc_key.as_ref()).await {
            warn!(entity_id = %entity.id, error = %e, "failed to push message to bus");
            return;
        }

        let should_notify =
            (addressed && entity.notify_on_mention) || (triggered && entity.notify_on_trigger);
        if should_notify {
            self.spawn_owner_notification(msg, entity, channel_name);
        }
    }

    fn resolve_channel_name(&self, channel_id: &ChannelId) -> Option<String> {
        let Ok(id) = channel_id.as_str().parse::<u64>() else {
            return None;
        };
        self.cache
            .channel(serenity::all::ChannelId::new(id))
            .map(|c| c.name.clone())
    }

    /// Fires a best-effort DM to the entity's owner. Never surfaces errors
    /// to the caller (spec §4.2, §7: Transient failures here are logged and
    /// swallowed).
    fn spawn_owner_notification(
        &self,
        msg: &NormalisedMessage,
        entity: &Entity,
        channel_name: Option<&str>,
    ) {
        let http = self.http.clone();
        let owner_id = entity.owner_id.clone();
        let entity_name = entity.display_name.clone();
        let server_id = msg.server_id.clone();
        let channel_id = msg.channel_id.clone();
        let channel_label = channel_name.map(str::to_string);
        let author_name = msg.author_display_name.clone();
        let message_id = msg.message_id.clone();
        let preview = truncate_preview(&msg.content);

        tokio::spawn(async move {
            if let Err(e) = send_owner_dm(
                &http,
                &owner_id,
                &entity_name,
                &server_id,
                &channel_id,
                channel_label.as_deref(),
                &author_name,
                &message_id,
                &preview,
            )
            .await
            {
                warn!(owner_id = %owner_id, error = %e, "owner notification failed");
            }
        });
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_owner_dm(
    http: &Http,
    owner_id: &OwnerId,
    entity_name: &str,
    server_id: &loomgate_common::ServerId,
    channel_id: &ChannelId,
    channel_label: Option<&str>,
    author_name: &str,
    message_id: &loomgate_common::MessageId,
    preview: &str,
) -> std::result::Result<(), serenity::Error> {
    let Ok(numeric_owner) = owner_id.as_str().parse::<u64>() else {
        debug!(owner_id = %owner_id, "owner id is not a platform user id, skipping DM");
        return Ok(());
    };

    let channel_label = channel_label.unwrap_or(channel_id.as_str());
    let jump_link = format!(
        "https://discord.com/channels/{}/{}/{}",
        server_id.as_str(),
        channel_id.as_str(),
        message_id.as_str()
    );

    let content = format!(
        "**{entity_name}** was mentioned in #{channel_label} by {author_name}:\n> {preview}\n{jump_link}"
    );

    let user_id = SerenityUserId::new(numeric_owner);
    let dm_channel = user_id.create_dm_channel(http).await?;
    dm_channel.say(http, content).await?;
    Ok(())
}

fn truncate_preview(content: &str) -> String {
    if content.chars().count() <= OWNER_PREVIEW_LEN {
        return content.to_string();
    }
    let mut truncated: String = content.chars().take(OWNER_PREVIEW_LEN).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_preview_leaves_short_content_untouched() {
        assert_eq!(truncate_preview("hello"), "hello");
    }

    #[test]
    fn truncate_preview_caps_long_content() {
        let long = "a".repeat(400);
        let truncated = truncate_preview(&long);
        assert_eq!(truncated.chars().count(), OWNER_PREVIEW_LEN + 1);
        assert!(truncated.ends_with('…'));
    }
}
