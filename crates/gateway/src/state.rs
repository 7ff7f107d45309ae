use std::sync::Arc;

use loomgate_bus::Bus;
use loomgate_config::GatewayConfig;
use loomgate_discord::WebhookManager;
use loomgate_keystore::KeyStore;
use loomgate_registry::Registry;
use serenity::all::Http;

/// Shared handles wired up at startup and cloned into every request handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub bus: Arc<Bus>,
    pub keystore: Arc<KeyStore>,
    pub webhooks: Arc<WebhookManager>,
    pub http: Arc<Http>,
    pub config: Arc<GatewayConfig>,
}
