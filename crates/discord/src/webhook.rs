//! Webhook manager: maintains the bridge's per-channel webhook and posts
//! entity messages through it under an entity-supplied display name and
//! avatar (spec §4.4).

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use loomgate_common::ChannelId;
use serenity::all::{ChannelId as SerenityChannelId, CreateWebhook, ExecuteWebhook, Http, Webhook};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{DiscordError, Result};

/// Display name the bridge's managed webhook is created and posted under.
pub const WEBHOOK_NAME: &str = "Arachne Bridge";

#[derive(Clone)]
struct CachedWebhook {
    webhook: Webhook,
}

/// Owns the per-channel single-flight lock used while a webhook is being
/// looked up or created, so concurrent sends to the same channel don't race
/// to create duplicate webhooks.
pub struct WebhookManager {
    http: Arc<Http>,
    cache: DashMap<ChannelId, CachedWebhook>,
    locks: DashMap<ChannelId, Arc<Mutex<()>>>,
}

impl WebhookManager {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, channel_id: &ChannelId) -> Arc<Mutex<()>> {
        match self.locks.entry(channel_id.clone()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let lock = Arc::new(Mutex::new(()));
                e.insert(lock.clone());
                lock
            },
        }
    }

    /// Posts `content` into `channel_id` through the bridge's managed
    /// webhook, displaying as `entity_name` with `avatar_url`. Creates and
    /// caches the webhook on first use in a channel. Retries exactly once
    /// if the cached webhook was deleted out-of-band on Discord's side.
    pub async fn send(
        &self,
        channel_id: &ChannelId,
        entity_name: &str,
        avatar_url: Option<&str>,
        content: &str,
        thread_id: Option<&str>,
    ) -> Result<()> {
        let webhook = self.webhook_for(channel_id).await?;

        match self
            .execute(&webhook, entity_name, avatar_url, content, thread_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(DiscordError::NotFound(_)) => {
                debug!(channel_id = %channel_id, "cached webhook gone, recreating");
                self.cache.remove(channel_id);
                let webhook = self.webhook_for(channel_id).await?;
                self.execute(&webhook, entity_name, avatar_url, content, thread_id)
                    .await
            },
            Err(other) => Err(other),
        }
    }

    async fn webhook_for(&self, channel_id: &ChannelId) -> Result<Webhook> {
        if let Some(cached) = self.cache.get(channel_id) {
            return Ok(cached.webhook.clone());
        }

        let lock = self.lock_for(channel_id);
        let _guard = lock.lock().await;

        // Re-check under the lock: another task may have populated it
        // while we were waiting.
        if let Some(cached) = self.cache.get(channel_id) {
            return Ok(cached.webhook.clone());
        }

        let webhook = self.find_or_create(channel_id).await?;
        self.cache.insert(
            channel_id.clone(),
            CachedWebhook {
                webhook: webhook.clone(),
            },
        );
        Ok(webhook)
    }

    async fn find_or_create(&self, channel_id: &ChannelId) -> Result<Webhook> {
        let serenity_channel_id = parse_channel_id(channel_id)?;

        let existing = self
            .http
            .get_channel_webhooks(serenity_channel_id)
            .await
            .map_err(DiscordError::Serenity)?
            .into_iter()
            .find(|w| w.name.as_deref() == Some(WEBHOOK_NAME));

        if let Some(webhook) = existing {
            return Ok(webhook);
        }

        warn!(channel_id = %channel_id, "creating managed webhook");
        let builder = CreateWebhook::new(WEBHOOK_NAME);
        self.http
            .create_webhook(serenity_channel_id, &builder, Some("bridge webhook"))
            .await
            .map_err(|e| classify_create_error(channel_id, e))
    }

    async fn execute(
        &self,
        webhook: &Webhook,
        entity_name: &str,
        avatar_url: Option<&str>,
        content: &str,
        thread_id: Option<&str>,
    ) -> Result<()> {
        let token = webhook
            .token
            .as_deref()
            .ok_or_else(|| DiscordError::Forbidden(webhook.channel_id.to_string()))?;

        let mut builder = ExecuteWebhook::new()
            .content(content)
            .username(entity_name);
        if let Some(avatar_url) = avatar_url {
            builder = builder.avatar_url(avatar_url);
        }
        if let Some(thread_id) = thread_id
            && let Ok(id) = thread_id.parse::<u64>()
        {
            builder = builder.in_thread(SerenityChannelId::new(id));
        }

        self.http
            .execute_webhook(webhook.id, None, token, false, &builder)
            .await
            .map_err(classify_execute_error)?;
        Ok(())
    }
}

fn parse_channel_id(channel_id: &ChannelId) -> Result<SerenityChannelId> {
    channel_id
        .as_str()
        .parse::<u64>()
        .map(SerenityChannelId::new)
        .map_err(|_| DiscordError::NotFound(channel_id.to_string()))
}

fn classify_create_error(channel_id: &ChannelId, e: serenity::Error) -> DiscordError {
    if is_forbidden(&e) {
        DiscordError::Forbidden(channel_id.to_string())
    } else {
        DiscordError::Serenity(e)
    }
}

fn classify_execute_error(e: serenity::Error) -> DiscordError {
    if is_not_found(&e) {
        DiscordError::NotFound("webhook".to_string())
    } else if is_forbidden(&e) {
        DiscordError::Forbidden("webhook".to_string())
    } else {
        DiscordError::Serenity(e)
    }
}

fn is_forbidden(e: &serenity::Error) -> bool {
    matches!(
        e,
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp))
            if resp.status_code == serenity::http::StatusCode::FORBIDDEN
    )
}

fn is_not_found(e: &serenity::Error) -> bool {
    matches!(
        e,
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp))
            if resp.status_code == serenity::http::StatusCode::NOT_FOUND
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_channel_id() {
        let id = ChannelId::from("123456789".to_string());
        assert!(parse_channel_id(&id).is_ok());
    }

    #[test]
    fn rejects_non_numeric_channel_id() {
        let id = ChannelId::from("not-a-snowflake".to_string());
        assert!(matches!(
            parse_channel_id(&id),
            Err(DiscordError::NotFound(_))
        ));
    }

    #[test]
    fn webhook_name_matches_required_display_string() {
        assert_eq!(WEBHOOK_NAME, "Arachne Bridge");
    }
}
