use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::Json,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use loomgate_registry::Entity;
use serde_json::json;

use crate::state::AppState;

/// Axum extractor that authenticates the `Authorization: Bearer <api_key>`
/// header against the registry and yields the matched entity. Returns 401 on
/// a missing or invalid header, 403 if the key doesn't match any entity.
pub struct AuthedEntity(pub Entity);

impl<S> FromRequestParts<S> for AuthedEntity
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| unauthenticated())?;

        app_state
            .registry
            .authenticate(bearer.token(), &app_state.keystore)
            .await
            .map(AuthedEntity)
            .map_err(|_| forbidden())
    }
}

fn unauthenticated() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "missing or malformed Authorization header" })),
    )
}

fn forbidden() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid api key" })),
    )
}
