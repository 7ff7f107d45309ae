//! Discord-facing half of the bridge: the gateway adapter that normalises
//! inbound events and the webhook manager that delivers entity replies.

pub mod error;
pub mod gateway;
pub mod webhook;

pub use error::{DiscordError, Result};
pub use gateway::{GatewayAdapter, GatewayEvent};
pub use webhook::{WEBHOOK_NAME, WebhookManager};
