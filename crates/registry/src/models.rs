use chrono::{DateTime, Utc};
use loomgate_common::{ChannelId, EntityId, OwnerId, RoleId, ServerId, UserId};
use serde::{Deserialize, Serialize};

/// An agent entity (spec §3). API key material never appears here; it's
/// held only as a hash+salt in storage and briefly as plaintext at creation
/// and regeneration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
    pub accent_color: Option<String>,
    pub platform_tags: Vec<String>,
    pub owner_id: OwnerId,
    pub owner_name: String,
    pub triggers: Vec<String>,
    pub notify_on_mention: bool,
    pub notify_on_trigger: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Partial patch applied by `update_entity_identity`. `None` fields are left
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct EntityIdentityPatch {
    pub display_name: Option<String>,
    pub avatar_url: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub accent_color: Option<Option<String>>,
    pub platform_tags: Option<Vec<String>>,
}

/// An entity's subscription to a server (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityServerConfig {
    pub entity_id: EntityId,
    pub server_id: ServerId,
    pub channels: Vec<ChannelId>,
    pub tools: Vec<String>,
    pub watch_channels: Vec<ChannelId>,
    pub blocked_channels: Vec<ChannelId>,
    pub role_id: Option<RoleId>,
}

/// Fields an owner or entity is allowed to patch on their own subscription.
#[derive(Debug, Clone, Default)]
pub struct EntityServerConfigPatch {
    pub channels: Option<Vec<ChannelId>>,
    pub tools: Option<Vec<String>>,
    pub watch_channels: Option<Vec<ChannelId>>,
    pub blocked_channels: Option<Vec<ChannelId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl ServerRequestStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn from_str_lenient(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }

    /// Monotone transitions only: pending -> approved|rejected. Terminal
    /// states do not transition further (spec §3: "monotone transitions").
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(self, Self::Pending) && !matches!(next, Self::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRequest {
    pub id: String,
    pub entity_id: EntityId,
    pub server_id: ServerId,
    /// Platform user who applied for the entity to join the server.
    pub applicant_id: UserId,
    pub applicant_name: String,
    pub status: ServerRequestStatus,
    /// Platform user who approved or rejected the request, once decided.
    pub reviewer_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTemplate {
    pub id: String,
    pub name: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub server_id: ServerId,
    pub settings: serde_json::Value,
}
