use std::collections::HashMap;

use chrono::{DateTime, Utc};
use loomgate_common::{ChannelId, EntityId, OwnerId, RoleId, ServerId, UserId};
use loomgate_crypto::{KdfParams, generate_api_key, generate_entity_salt, hash_api_key, verify_api_key};
use loomgate_keystore::KeyStore;
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::{
    error::{RegistryError, Result},
    models::{
        Entity, EntityIdentityPatch, EntityServerConfig, EntityServerConfigPatch, ServerRequest,
        ServerRequestStatus, ServerSettings, ServerTemplate,
    },
};

/// Default maximum number of active entities per owner (spec §3).
pub const DEFAULT_MAX_ACTIVE_ENTITIES_PER_OWNER: u32 = 5;

/// Run the registry's embedded migrations against `pool`.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| RegistryError::Database(sqlx::Error::Migrate(Box::new(e))))?;
    Ok(())
}

/// Embedded SQLite store for entities, subscriptions, and server-level
/// approval/config state (spec §4.5).
pub struct Registry {
    pool: SqlitePool,
    max_active_entities_per_owner: u32,
    kdf_params: KdfParams,
}

impl Registry {
    /// Connect to `database_url`, running migrations first.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        run_migrations(&pool).await?;
        Ok(Self::with_pool(pool))
    }

    /// Wrap an existing pool. Migrations must already have been run.
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_active_entities_per_owner: DEFAULT_MAX_ACTIVE_ENTITIES_PER_OWNER,
            kdf_params: KdfParams::default(),
        }
    }

    #[must_use]
    pub fn with_max_active_entities_per_owner(mut self, max: u32) -> Self {
        self.max_active_entities_per_owner = max;
        self
    }

    // ── Entities ────────────────────────────────────────────────────────

    pub async fn count_active_for_owner(&self, owner_id: &OwnerId) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM entities WHERE owner_id = ? AND active = 1",
        )
        .bind(owner_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u32)
    }

    pub async fn list_active_entities_for_owner(&self, owner_id: &OwnerId) -> Result<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE owner_id = ? AND active = 1")
            .bind(owner_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entity).collect()
    }

    /// Create a new active entity for `owner_id`, enforcing the per-owner
    /// active-entity cap. Returns the entity and its plaintext API key,
    /// which is never recoverable again after this call returns.
    pub async fn create_entity(
        &self,
        owner_id: OwnerId,
        owner_name: String,
        display_name: String,
        avatar_url: Option<String>,
        description: Option<String>,
        accent_color: Option<String>,
        platform_tags: Vec<String>,
    ) -> Result<(Entity, Zeroizing<String>)> {
        let active_count = self.count_active_for_owner(&owner_id).await?;
        if active_count >= self.max_active_entities_per_owner {
            return Err(RegistryError::TooManyActiveEntities {
                owner: owner_id.to_string(),
                max: self.max_active_entities_per_owner,
            });
        }

        let id = EntityId::from(uuid::Uuid::new_v4().simple().to_string());
        let salt = generate_entity_salt();
        let api_key = generate_api_key();
        let hash = hash_api_key(&api_key, &salt, &self.kdf_params)?;
        let created_at = Utc::now();
        let platform_tags_json = serde_json::to_string(&platform_tags)?;

        sqlx::query(
            "INSERT INTO entities (
                id, display_name, avatar_url, description, accent_color,
                platform_tags, api_key_hash, api_key_salt, owner_id, owner_name,
                triggers, notify_on_mention, notify_on_trigger, active, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '[]', 0, 0, 1, ?)",
        )
        .bind(id.as_str())
        .bind(&display_name)
        .bind(&avatar_url)
        .bind(&description)
        .bind(&accent_color)
        .bind(&platform_tags_json)
        .bind(&hash)
        .bind(&salt)
        .bind(owner_id.as_str())
        .bind(&owner_name)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(entity_id = %id, owner = %owner_id, "created entity");

        let entity = Entity {
            id,
            display_name,
            avatar_url,
            description,
            accent_color,
            platform_tags,
            owner_id,
            owner_name,
            triggers: Vec::new(),
            notify_on_mention: false,
            notify_on_trigger: false,
            active: true,
            created_at,
        };
        Ok((entity, api_key))
    }

    /// Scan active entities for one whose stored hash matches `api_key`
    /// (constant-time per-candidate comparison), and on success derive its
    /// message-encryption key into `keystore`.
    pub async fn authenticate(&self, api_key: &str, keystore: &KeyStore) -> Result<Entity> {
        let rows = sqlx::query("SELECT * FROM entities WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;

        for row in &rows {
            let hash: Vec<u8> = row.get("api_key_hash");
            let salt: Vec<u8> = row.get("api_key_salt");
            if verify_api_key(api_key, &salt, &self.kdf_params, &hash)? {
                let entity = row_to_entity(row)?;
                let key = loomgate_crypto::derive_message_key(api_key.as_bytes(), entity.id.as_str())?;
                keystore.set(entity.id.clone(), key).await;
                return Ok(entity);
            }
        }

        Err(RegistryError::InvalidApiKey)
    }

    /// Issue a new API key for `entity_id`, invalidating the old one and
    /// clearing any key store entry derived from it.
    pub async fn regenerate_key(
        &self,
        entity_id: &EntityId,
        keystore: &KeyStore,
    ) -> Result<Zeroizing<String>> {
        let salt = generate_entity_salt();
        let api_key = generate_api_key();
        let hash = hash_api_key(&api_key, &salt, &self.kdf_params)?;

        let result = sqlx::query(
            "UPDATE entities SET api_key_hash = ?, api_key_salt = ? WHERE id = ?",
        )
        .bind(&hash)
        .bind(&salt)
        .bind(entity_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::EntityNotFound(entity_id.to_string()));
        }

        keystore.delete(entity_id).await;
        Ok(api_key)
    }

    /// Soft-deletes an entity: flips `active` to false and clears its key
    /// store entry (spec §3, §4.6). Its subscriptions and queue become
    /// unreachable since every lookup filters on `active = 1`.
    pub async fn deactivate_entity(
        &self,
        entity_id: &EntityId,
        keystore: &KeyStore,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE entities SET active = 0 WHERE id = ?")
            .bind(entity_id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::EntityNotFound(entity_id.to_string()));
        }

        keystore.delete(entity_id).await;
        Ok(())
    }

    pub async fn set_entity_owner(
        &self,
        entity_id: &EntityId,
        owner_id: OwnerId,
        owner_name: String,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE entities SET owner_id = ?, owner_name = ? WHERE id = ?")
            .bind(owner_id.as_str())
            .bind(&owner_name)
            .bind(entity_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::EntityNotFound(entity_id.to_string()));
        }
        Ok(())
    }

    pub async fn get_entity(&self, entity_id: &EntityId) -> Result<Entity> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(entity_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RegistryError::EntityNotFound(entity_id.to_string()))?;
        row_to_entity(&row)
    }

    pub async fn update_entity_identity(
        &self,
        entity_id: &EntityId,
        patch: EntityIdentityPatch,
    ) -> Result<Entity> {
        let mut entity = self.get_entity(entity_id).await?;

        if let Some(name) = patch.display_name {
            entity.display_name = name;
        }
        if let Some(avatar) = patch.avatar_url {
            entity.avatar_url = avatar;
        }
        if let Some(description) = patch.description {
            entity.description = description;
        }
        if let Some(accent) = patch.accent_color {
            entity.accent_color = accent;
        }
        if let Some(tags) = patch.platform_tags {
            entity.platform_tags = tags;
        }

        let tags_json = serde_json::to_string(&entity.platform_tags)?;
        sqlx::query(
            "UPDATE entities SET display_name = ?, avatar_url = ?, description = ?,
             accent_color = ?, platform_tags = ? WHERE id = ?",
        )
        .bind(&entity.display_name)
        .bind(&entity.avatar_url)
        .bind(&entity.description)
        .bind(&entity.accent_color)
        .bind(&tags_json)
        .bind(entity_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(entity)
    }

    // ── Entity <-> server subscriptions ─────────────────────────────────

    pub async fn get_entities_for_channel(
        &self,
        server_id: &ServerId,
        channel_id: &ChannelId,
    ) -> Result<Vec<(Entity, EntityServerConfig)>> {
        let rows = sqlx::query(
            "SELECT e.*, s.channels AS s_channels, s.tools AS s_tools,
                    s.watch_channels AS s_watch_channels, s.blocked_channels AS s_blocked_channels,
                    s.role_id AS s_role_id
             FROM entities e
             JOIN entity_servers s ON s.entity_id = e.id
             WHERE s.server_id = ? AND e.active = 1",
        )
        .bind(server_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in &rows {
            let entity = row_to_entity(row)?;
            let channels: Vec<ChannelId> = json_col(row, "s_channels")?;
            if !channels.is_empty() && !channels.contains(channel_id) {
                continue;
            }
            let config = EntityServerConfig {
                entity_id: entity.id.clone(),
                server_id: server_id.clone(),
                channels,
                tools: json_col(row, "s_tools")?,
                watch_channels: json_col(row, "s_watch_channels")?,
                blocked_channels: json_col(row, "s_blocked_channels")?,
                role_id: row.get::<Option<String>, _>("s_role_id").map(RoleId::from),
            };
            out.push((entity, config));
        }
        Ok(out)
    }

    pub async fn get_role_entity_map(
        &self,
        server_id: &ServerId,
    ) -> Result<HashMap<RoleId, EntityId>> {
        let rows = sqlx::query(
            "SELECT entity_id, role_id FROM entity_servers
             WHERE server_id = ? AND role_id IS NOT NULL",
        )
        .bind(server_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let role_id: String = row.get("role_id");
            let entity_id: String = row.get("entity_id");
            map.insert(RoleId::from(role_id), EntityId::from(entity_id));
        }
        Ok(map)
    }

    pub async fn add_server(&self, entity_id: &EntityId, server_id: &ServerId) -> Result<()> {
        sqlx::query(
            "INSERT INTO entity_servers (entity_id, server_id) VALUES (?, ?)
             ON CONFLICT (entity_id, server_id) DO NOTHING",
        )
        .bind(entity_id.as_str())
        .bind(server_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove the subscription, returning its role id (if any) so the
    /// caller can best-effort delete the corresponding platform role.
    pub async fn remove_server(
        &self,
        entity_id: &EntityId,
        server_id: &ServerId,
    ) -> Result<Option<RoleId>> {
        let row = sqlx::query(
            "SELECT role_id FROM entity_servers WHERE entity_id = ? AND server_id = ?",
        )
        .bind(entity_id.as_str())
        .bind(server_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let role_id = row.and_then(|r| r.get::<Option<String>, _>("role_id").map(RoleId::from));

        sqlx::query("DELETE FROM entity_servers WHERE entity_id = ? AND server_id = ?")
            .bind(entity_id.as_str())
            .bind(server_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(role_id)
    }

    /// Entity-declared capability subscription: which channels it's present
    /// in and which tools it exposes there.
    pub async fn update_entity_server_config(
        &self,
        entity_id: &EntityId,
        server_id: &ServerId,
        patch: EntityServerConfigPatch,
    ) -> Result<()> {
        if let Some(channels) = patch.channels {
            let json = serde_json::to_string(&channels)?;
            sqlx::query(
                "UPDATE entity_servers SET channels = ? WHERE entity_id = ? AND server_id = ?",
            )
            .bind(json)
            .bind(entity_id.as_str())
            .bind(server_id.as_str())
            .execute(&self.pool)
            .await?;
        }
        if let Some(tools) = patch.tools {
            let json = serde_json::to_string(&tools)?;
            sqlx::query(
                "UPDATE entity_servers SET tools = ? WHERE entity_id = ? AND server_id = ?",
            )
            .bind(json)
            .bind(entity_id.as_str())
            .bind(server_id.as_str())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Owner-controlled filtering policy: the watch/block lists that decide
    /// which channels the entity sees at all (spec §4.2).
    pub async fn update_entity_server_owner_config(
        &self,
        entity_id: &EntityId,
        server_id: &ServerId,
        patch: EntityServerConfigPatch,
    ) -> Result<()> {
        if let Some(watch) = patch.watch_channels {
            let json = serde_json::to_string(&watch)?;
            sqlx::query(
                "UPDATE entity_servers SET watch_channels = ? WHERE entity_id = ? AND server_id = ?",
            )
            .bind(json)
            .bind(entity_id.as_str())
            .bind(server_id.as_str())
            .execute(&self.pool)
            .await?;
        }
        if let Some(blocked) = patch.blocked_channels {
            let json = serde_json::to_string(&blocked)?;
            sqlx::query(
                "UPDATE entity_servers SET blocked_channels = ? WHERE entity_id = ? AND server_id = ?",
            )
            .bind(json)
            .bind(entity_id.as_str())
            .bind(server_id.as_str())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn update_server_role_id(
        &self,
        entity_id: &EntityId,
        server_id: &ServerId,
        role_id: Option<RoleId>,
    ) -> Result<()> {
        sqlx::query("UPDATE entity_servers SET role_id = ? WHERE entity_id = ? AND server_id = ?")
            .bind(role_id.map(|r| r.0))
            .bind(entity_id.as_str())
            .bind(server_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Server bans ──────────────────────────────────────────────────────

    pub async fn is_server_banned(&self, server_id: &ServerId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM server_bans WHERE server_id = ?")
            .bind(server_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn ban_server(&self, server_id: &ServerId) -> Result<()> {
        sqlx::query(
            "INSERT INTO server_bans (server_id, banned_at) VALUES (?, ?)
             ON CONFLICT (server_id) DO NOTHING",
        )
        .bind(server_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Server requests (approval flow) ─────────────────────────────────

    pub async fn create_server_request(
        &self,
        entity_id: &EntityId,
        server_id: &ServerId,
        applicant_id: UserId,
        applicant_name: String,
    ) -> Result<ServerRequest> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO server_requests
                (id, entity_id, server_id, applicant_id, applicant_name, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&id)
        .bind(entity_id.as_str())
        .bind(server_id.as_str())
        .bind(applicant_id.as_str())
        .bind(&applicant_name)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(ServerRequest {
            id,
            entity_id: entity_id.clone(),
            server_id: server_id.clone(),
            applicant_id,
            applicant_name,
            status: ServerRequestStatus::Pending,
            reviewer_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Transition a pending request. On approval, also persists the
    /// subscription row immediately (best-effort, not inside a DB
    /// transaction with any platform-side role creation the caller performs
    /// afterward — see DESIGN.md for the rationale).
    pub async fn update_server_request(
        &self,
        request_id: &str,
        next: ServerRequestStatus,
        reviewer_id: &UserId,
    ) -> Result<ServerRequest> {
        let request = self.get_server_request(request_id).await?;
        if !request.status.can_transition_to(next) {
            return Err(RegistryError::RequestNotFound(format!(
                "{request_id} is not pending (already {:?})",
                request.status
            )));
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE server_requests SET status = ?, reviewer_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(next.as_str())
        .bind(reviewer_id.as_str())
        .bind(now.to_rfc3339())
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        if next == ServerRequestStatus::Approved {
            if let Err(e) = self.add_server(&request.entity_id, &request.server_id).await {
                warn!(request_id, error = %e, "failed to persist subscription on approval");
            }
        }

        Ok(ServerRequest {
            status: next,
            reviewer_id: Some(reviewer_id.clone()),
            updated_at: now,
            ..request
        })
    }

    pub async fn get_server_request(&self, request_id: &str) -> Result<ServerRequest> {
        let row = sqlx::query("SELECT * FROM server_requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RegistryError::RequestNotFound(request_id.to_string()))?;
        row_to_server_request(&row)
    }

    pub async fn get_server_requests(&self, server_id: &ServerId) -> Result<Vec<ServerRequest>> {
        let rows = sqlx::query("SELECT * FROM server_requests WHERE server_id = ?")
            .bind(server_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_server_request).collect()
    }

    // ── Server templates ─────────────────────────────────────────────────

    pub async fn create_server_template(
        &self,
        name: String,
        config: serde_json::Value,
    ) -> Result<ServerTemplate> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let config_json = serde_json::to_string(&config)?;
        sqlx::query(
            "INSERT INTO server_templates (id, name, config, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&name)
        .bind(&config_json)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(ServerTemplate {
            id,
            name,
            config,
            created_at: now,
        })
    }

    pub async fn list_server_templates(&self) -> Result<Vec<ServerTemplate>> {
        let rows = sqlx::query("SELECT * FROM server_templates ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_server_template).collect()
    }

    pub async fn delete_server_template(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM server_templates WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Server settings ──────────────────────────────────────────────────

    pub async fn get_server_settings(&self, server_id: &ServerId) -> Result<Option<ServerSettings>> {
        let row = sqlx::query("SELECT * FROM server_settings WHERE server_id = ?")
            .bind(server_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(ServerSettings {
                server_id: server_id.clone(),
                settings: serde_json::from_str(&r.get::<String, _>("settings"))?,
            })
        })
        .transpose()
    }

    pub async fn set_server_settings(
        &self,
        server_id: &ServerId,
        settings: serde_json::Value,
    ) -> Result<ServerSettings> {
        let json = serde_json::to_string(&settings)?;
        sqlx::query(
            "INSERT INTO server_settings (server_id, settings) VALUES (?, ?)
             ON CONFLICT (server_id) DO UPDATE SET settings = excluded.settings",
        )
        .bind(server_id.as_str())
        .bind(&json)
        .execute(&self.pool)
        .await?;
        Ok(ServerSettings {
            server_id: server_id.clone(),
            settings,
        })
    }
}

fn json_col<T: serde::de::DeserializeOwned>(row: &sqlx::sqlite::SqliteRow, col: &str) -> Result<T> {
    let raw: String = row.get(col);
    Ok(serde_json::from_str(&raw)?)
}

fn row_to_entity(row: &sqlx::sqlite::SqliteRow) -> Result<Entity> {
    let platform_tags: Vec<String> = json_col(row, "platform_tags")?;
    let triggers: Vec<String> = json_col(row, "triggers")?;
    let created_at_raw: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map_err(|e| RegistryError::Database(sqlx::Error::Decode(Box::new(e))))?
        .with_timezone(&Utc);

    Ok(Entity {
        id: EntityId::from(row.get::<String, _>("id")),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        description: row.get("description"),
        accent_color: row.get("accent_color"),
        platform_tags,
        owner_id: OwnerId::from(row.get::<String, _>("owner_id")),
        owner_name: row.get("owner_name"),
        triggers,
        notify_on_mention: row.get::<i64, _>("notify_on_mention") != 0,
        notify_on_trigger: row.get::<i64, _>("notify_on_trigger") != 0,
        active: row.get::<i64, _>("active") != 0,
        created_at,
    })
}

fn row_to_server_request(row: &sqlx::sqlite::SqliteRow) -> Result<ServerRequest> {
    let created_at_raw: String = row.get("created_at");
    let updated_at_raw: String = row.get("updated_at");
    Ok(ServerRequest {
        id: row.get("id"),
        entity_id: EntityId::from(row.get::<String, _>("entity_id")),
        server_id: ServerId::from(row.get::<String, _>("server_id")),
        applicant_id: UserId::from(row.get::<String, _>("applicant_id")),
        applicant_name: row.get("applicant_name"),
        status: ServerRequestStatus::from_str_lenient(&row.get::<String, _>("status")),
        reviewer_id: row.get::<Option<String>, _>("reviewer_id").map(UserId::from),
        created_at: DateTime::parse_from_rfc3339(&created_at_raw)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(Box::new(e))))?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at_raw)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(Box::new(e))))?
            .with_timezone(&Utc),
    })
}

fn row_to_server_template(row: &sqlx::sqlite::SqliteRow) -> Result<ServerTemplate> {
    let created_at_raw: String = row.get("created_at");
    Ok(ServerTemplate {
        id: row.get("id"),
        name: row.get("name"),
        config: serde_json::from_str(&row.get::<String, _>("config"))?,
        created_at: DateTime::parse_from_rfc3339(&created_at_raw)
            .map_err(|e| RegistryError::Database(sqlx::Error::Decode(Box::new(e))))?
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_registry() -> Registry {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        Registry::with_pool(pool).with_max_active_entities_per_owner(2)
    }

    #[tokio::test]
    async fn create_and_authenticate_round_trip() {
        let registry = test_registry().await;
        let keystore = KeyStore::new();
        let owner = OwnerId::from("owner-1");

        let (entity, api_key) = registry
            .create_entity(owner.clone(), "owner name".into(), "bot".into(), None, None, None, vec![])
            .await
            .unwrap();

        let authed = registry.authenticate(&api_key, &keystore).await.unwrap();
        assert_eq!(authed.id, entity.id);
        assert!(keystore.get(&entity.id).await.is_some());
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_key() {
        let registry = test_registry().await;
        let keystore = KeyStore::new();
        let owner = OwnerId::from("owner-1");
        registry
            .create_entity(owner, "owner name".into(), "bot".into(), None, None, None, vec![])
            .await
            .unwrap();

        let result = registry.authenticate("not-the-key", &keystore).await;
        assert!(matches!(result, Err(RegistryError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn enforces_max_active_entities_per_owner() {
        let registry = test_registry().await;
        let owner = OwnerId::from("owner-1");
        for _ in 0..2 {
            registry
                .create_entity(owner.clone(), "o".into(), "bot".into(), None, None, None, vec![])
                .await
                .unwrap();
        }
        let result = registry
            .create_entity(owner, "o".into(), "bot".into(), None, None, None, vec![])
            .await;
        assert!(matches!(
            result,
            Err(RegistryError::TooManyActiveEntities { .. })
        ));
    }

    #[tokio::test]
    async fn regenerate_key_invalidates_old_key_and_clears_keystore() {
        let registry = test_registry().await;
        let keystore = KeyStore::new();
        let owner = OwnerId::from("owner-1");
        let (entity, old_key) = registry
            .create_entity(owner, "o".into(), "bot".into(), None, None, None, vec![])
            .await
            .unwrap();
        registry.authenticate(&old_key, &keystore).await.unwrap();
        assert!(keystore.get(&entity.id).await.is_some());

        registry.regenerate_key(&entity.id, &keystore).await.unwrap();
        assert!(keystore.get(&entity.id).await.is_none());
        assert!(registry.authenticate(&old_key, &keystore).await.is_err());
    }

    #[tokio::test]
    async fn deactivate_entity_clears_keystore_and_blocks_authentication() {
        let registry = test_registry().await;
        let keystore = KeyStore::new();
        let owner = OwnerId::from("owner-1");
        let (entity, api_key) = registry
            .create_entity(owner, "o".into(), "bot".into(), None, None, None, vec![])
            .await
            .unwrap();
        registry.authenticate(&api_key, &keystore).await.unwrap();
        assert!(keystore.get(&entity.id).await.is_some());

        registry.deactivate_entity(&entity.id, &keystore).await.unwrap();
        assert!(keystore.get(&entity.id).await.is_none());
        assert!(registry.authenticate(&api_key, &keystore).await.is_err());
    }

    #[tokio::test]
    async fn get_entities_for_channel_respects_empty_and_nonempty_channel_lists() {
        let registry = test_registry().await;
        let owner = OwnerId::from("owner-1");
        let (entity, _) = registry
            .create_entity(owner, "o".into(), "bot".into(), None, None, None, vec![])
            .await
            .unwrap();
        let server_id = ServerId::from("server-1");
        registry.add_server(&entity.id, &server_id).await.unwrap();

        let channel_a = ChannelId::from("channel-a");
        let found = registry
            .get_entities_for_channel(&server_id, &channel_a)
            .await
            .unwrap();
        assert_eq!(found.len(), 1, "empty channel list matches any channel");

        registry
            .update_entity_server_config(
                &entity.id,
                &server_id,
                EntityServerConfigPatch {
                    channels: Some(vec![ChannelId::from("channel-b")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let found = registry
            .get_entities_for_channel(&server_id, &channel_a)
            .await
            .unwrap();
        assert!(found.is_empty(), "non-matching explicit channel list excludes");
    }

    #[tokio::test]
    async fn approval_persists_subscription() {
        let registry = test_registry().await;
        let owner = OwnerId::from("owner-1");
        let (entity, _) = registry
            .create_entity(owner, "o".into(), "bot".into(), None, None, None, vec![])
            .await
            .unwrap();
        let server_id = ServerId::from("server-1");
        let applicant = UserId::from("applicant-1");
        let request = registry
            .create_server_request(&entity.id, &server_id, applicant, "Applicant".into())
            .await
            .unwrap();

        let reviewer = UserId::from("reviewer-1");
        registry
            .update_server_request(&request.id, ServerRequestStatus::Approved, &reviewer)
            .await
            .unwrap();

        let found = registry
            .get_entities_for_channel(&server_id, &ChannelId::from("any"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn server_ban_roundtrip() {
        let registry = test_registry().await;
        let server_id = ServerId::from("server-1");
        assert!(!registry.is_server_banned(&server_id).await.unwrap());
        registry.ban_server(&server_id).await.unwrap();
        assert!(registry.is_server_banned(&server_id).await.unwrap());
    }
}
