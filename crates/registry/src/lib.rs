//! Embedded SQLite-backed entity registry (spec §4.5).

pub mod error;
pub mod models;
pub mod store;

pub use error::RegistryError;
pub use models::{
    Entity, EntityIdentityPatch, EntityServerConfig, EntityServerConfigPatch, ServerRequest,
    ServerRequestStatus, ServerSettings, ServerTemplate,
};
pub use store::{Registry, DEFAULT_MAX_ACTIVE_ENTITIES_PER_OWNER, run_migrations};
