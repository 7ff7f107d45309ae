//! The minimal per-entity HTTP control plane (spec §6): poll the bus,
//! send through the webhook manager. Bearer-token authenticated against the
//! registry on every request.

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveHeadersLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{auth_middleware::AuthedEntity, error::ApiError, shutdown::Shutdown, state::AppState};

async fn health_handler() -> &'static str {
    "ok"
}

async fn poll_handler(
    AuthedEntity(entity): AuthedEntity,
    State(state): State<AppState>,
) -> Result<Json<Vec<loomgate_common::QueuedMessage>>, ApiError> {
    let key = state.keystore.get(&entity.id).await;
    let messages = state
        .bus
        .drain(&entity.id, key.as_ref())
        .await
        .map_err(loomgate_common::Error::from)?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    channel_id: String,
    content: String,
    #[serde(default)]
    thread_id: Option<String>,
}

async fn send_handler(
    AuthedEntity(entity): AuthedEntity,
    State(state): State<AppState>,
    Json(body): Json<SendRequest>,
) -> Result<(), ApiError> {
    let channel_id = loomgate_common::ChannelId::from(body.channel_id);
    state
        .webhooks
        .send(
            &channel_id,
            &entity.display_name,
            entity.avatar_url.as_deref(),
            &body.content,
            body.thread_id.as_deref(),
        )
        .await
        .map_err(Into::<loomgate_common::Error>::into)?;
    Ok(())
}

/// Assembles the control-plane router with the teacher's standard
/// middleware stack (panic catching, sensitive-header redaction, request
/// id propagation, tracing, permissive CORS for entity clients).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/messages", get(poll_handler))
        .route("/v1/messages", post(send_handler))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(CorsLayer::new().allow_methods(Any).allow_headers(Any))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveHeadersLayer::new([
            axum::http::header::AUTHORIZATION,
        ]))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Serves the control plane on `addr` until `shutdown` fires, then returns.
pub async fn serve(
    addr: std::net::SocketAddr,
    state: AppState,
    shutdown: Shutdown,
) -> std::io::Result<()> {
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control plane listening");

    let mut rx = shutdown.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = rx.recv().await;
    })
    .await
}
