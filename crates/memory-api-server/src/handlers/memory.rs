use crate::models::chat::*;
use crate::services::memory::{IdentityKey, MemoryStats};
use crate::services::ChatService;
use crate::utils::EngineError;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::info;

pub async fn stats_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(user_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<MemoryStats>, EngineError> {
    let identity = IdentityKey::new(user_id, query.scope)?;
    Ok(Json(chat.memory_stats(&identity)))
}

pub async fn clear_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(user_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<ClearResponse>, EngineError> {
    let identity = IdentityKey::new(user_id, query.scope)?;
    let cleared = chat.clear_memory(&identity);
    info!("Clear memory for {}: cleared={}", identity, cleared);

    Ok(Json(ClearResponse {
        identity_key: identity.as_key(),
        cleared,
        stats: chat.memory_stats(&identity),
    }))
}

pub async fn persona_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(user_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<Json<PersonaResponse>, EngineError> {
    let identity = IdentityKey::new(user_id, query.scope)?;
    Ok(Json(chat.persona(&identity)))
}

/// Manual refresh: 202 when scheduled, 200 with the reason otherwise
pub async fn refresh_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(user_id): Path<String>,
    Query(query): Query<ScopeQuery>,
) -> Result<(StatusCode, Json<RefreshResponse>), EngineError> {
    let identity = IdentityKey::new(user_id, query.scope)?;
    let outcome = chat.refresh_memory(&identity);

    let status = if outcome.is_scheduled() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(RefreshResponse {
            identity_key: identity.as_key(),
            status: outcome.as_str().to_string(),
        }),
    ))
}

pub async fn memory_health_handler(
    Extension(chat): Extension<Arc<ChatService>>,
) -> Json<MemoryHealthResponse> {
    Json(chat.memory_health())
}
