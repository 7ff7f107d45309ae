//! Shared types and error taxonomy used across all loomgate crates.

pub mod error;
pub mod types;

pub use error::{Error, FromMessage, Result};
pub use types::{
    ChannelId, EntityId, MessageId, NormalisedMessage, OwnerId, QueuedMessage, RoleId, ServerId,
    UserId,
};
