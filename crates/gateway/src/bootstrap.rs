//! Assembles every component in dependency order (Key Store → Entity
//! Registry → Message Bus → Webhook Manager → Gateway adapter → Router) and
//! drives the process until shutdown (spec §5).

use std::sync::Arc;

use loomgate_bus::Bus;
use loomgate_common::{Error, Result};
use loomgate_config::GatewayConfig;
use loomgate_discord::{GatewayAdapter, GatewayEvent, WebhookManager};
use loomgate_keystore::KeyStore;
use loomgate_registry::Registry;
use loomgate_router::Router as MessageRouter;
use serenity::prelude::Client;
use tracing::{error, info, warn};

use crate::{server, shutdown::Shutdown, state::AppState};

/// Runs the bridge until the process receives ctrl-c. Aborts at startup
/// (`Error::Fatal`) if the database can't be opened or the bot token is
/// rejected — both are treated as process-fatal per spec §7.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let keystore = Arc::new(KeyStore::new());

    let registry = Arc::new(
        Registry::connect(&format!("sqlite://{}?mode=rwc", config.db_path))
            .await
            .map_err(|e| Error::Fatal(format!("failed to open database: {e}")))?,
    );

    let bus = Arc::new(Bus::new(
        config.queue_ttl,
        config.queue_max_len,
        loomgate_bus::DEFAULT_SWEEP_INTERVAL,
    ));
    bus.start().await;

    let (adapter, mut events) = GatewayAdapter::new(registry.clone());
    let mut client = Client::builder(&config.bot_token, GatewayAdapter::intents())
        .event_handler(adapter)
        .await
        .map_err(|e| Error::Fatal(format!("failed to build gateway client: {e}")))?;

    let http = client.http.clone();
    let cache = client.cache.clone();
    let webhooks = Arc::new(WebhookManager::new(http.clone()));
    let router = Arc::new(MessageRouter::new(
        registry.clone(),
        bus.clone(),
        keystore.clone(),
        http.clone(),
        cache,
    ));

    let shutdown = Shutdown::new();

    let dispatch_shutdown = shutdown.subscribe();
    let dispatch_task = tokio::spawn(async move {
        run_event_loop(router, &mut events, dispatch_shutdown).await;
    });

    let http_port = config.mcp_port;
    let state = AppState {
        registry: registry.clone(),
        bus: bus.clone(),
        keystore: keystore.clone(),
        webhooks,
        http: http.clone(),
        config: Arc::new(config),
    };

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], http_port).into();
    let http_shutdown = shutdown.clone();
    let http_task = tokio::spawn(server::serve(addr, state, http_shutdown));

    let gateway_task = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            error!(error = %e, "gateway client stopped with error");
        }
    });

    shutdown.clone().wait_for_ctrl_c().await;

    info!("stopping control plane");
    if let Err(e) = http_task.await {
        warn!(error = %e, "control plane task panicked");
    }

    info!("stopping bus sweeper");
    bus.stop().await;

    info!("disconnecting gateway");
    gateway_task.abort();
    dispatch_task.abort();

    info!("shutdown complete");
    Ok(())
}

async fn run_event_loop(
    router: Arc<MessageRouter>,
    events: &mut tokio::sync::mpsc::UnboundedReceiver<GatewayEvent>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            event = events.recv() => {
                match event {
                    Some(GatewayEvent::Message(msg)) => {
                        if let Err(e) = router.route(msg).await {
                            warn!(error = %e, "router evaluation failed");
                        }
                    },
                    Some(GatewayEvent::Ready { bot_user_id }) => {
                        info!(bot_user_id = %bot_user_id, "bridge ready");
                    },
                    Some(GatewayEvent::GuildCreate { server_id }) => {
                        info!(server_id = %server_id, "joined server");
                    },
                    None => break,
                }
            },
        }
    }
}
