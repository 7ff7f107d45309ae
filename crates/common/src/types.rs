//! Wire-level types shared between the gateway adapter, router, and bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(EntityId);
opaque_id!(OwnerId);
opaque_id!(ServerId);
opaque_id!(ChannelId);
opaque_id!(RoleId);
opaque_id!(UserId);
opaque_id!(MessageId);

/// A platform event normalised by the gateway adapter before it reaches the
/// router (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalisedMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub server_id: ServerId,
    pub author_id: UserId,
    pub author_display_name: String,
    pub author_is_bot: bool,
    pub webhook_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub mentioned_role_ids: Vec<RoleId>,
    pub reply_to_message_id: Option<MessageId>,
}

/// A message sitting in an entity's queue (spec §3). `author_name` and
/// `channel_name` are resolved, human-readable labels; `content`,
/// `author_name` and `channel_name` may instead live in `ciphertext` when the
/// queue push was sealed with an encryption key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub channel_name: Option<String>,
    pub server_id: ServerId,
    pub author_id: UserId,
    pub author_name: Option<String>,
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub addressed: bool,
    pub triggered: bool,
    pub expires_at: DateTime<Utc>,
    pub ciphertext: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
}

impl QueuedMessage {
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.ciphertext.is_some()
    }
}
