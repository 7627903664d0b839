use crate::models::chat::*;
use crate::services::threads::{Thread, ThreadMessage};
use crate::services::ChatService;
use crate::utils::EngineError;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

pub async fn create_thread_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Json(request): Json<CreateThreadRequest>,
) -> Result<(StatusCode, Json<Thread>), EngineError> {
    let thread = chat.create_thread(request)?;
    Ok((StatusCode::CREATED, Json(thread)))
}

pub async fn list_threads_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(user_id): Path<String>,
) -> Json<ThreadListResponse> {
    let threads = chat.list_threads(&user_id);
    Json(ThreadListResponse { user_id, threads })
}

pub async fn get_thread_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(thread_id): Path<String>,
) -> Result<Json<Thread>, EngineError> {
    Ok(Json(chat.get_thread(&thread_id)?))
}

pub async fn thread_messages_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(thread_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<ThreadMessage>>, EngineError> {
    Ok(Json(chat.thread_messages(&thread_id, query.limit)?))
}

pub async fn update_thread_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(thread_id): Path<String>,
    Json(request): Json<UpdateThreadRequest>,
) -> Result<Json<Thread>, EngineError> {
    Ok(Json(chat.update_thread(&thread_id, request)?))
}

pub async fn thread_context_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(thread_id): Path<String>,
) -> Result<Json<ThreadContextResponse>, EngineError> {
    Ok(Json(chat.thread_context(&thread_id)?))
}

pub async fn delete_thread_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(thread_id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<DeleteThreadResponse>, EngineError> {
    chat.delete_thread(&thread_id, &owner.user_id)?;
    Ok(Json(DeleteThreadResponse {
        thread_id,
        deleted: true,
    }))
}
