use crate::models::chat::*;
use crate::services::{ChatService, ReplyStream};
use crate::utils::EngineError;
use axum::{
    extract::{Extension, Path},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

pub async fn memory_chat_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Json(request): Json<MemoryChatRequest>,
) -> Result<Json<ChatReply>, EngineError> {
    info!(
        "Memory chat: user={}, scope={:?}, message_len={}",
        request.user_id,
        request.knowledge_scope,
        request.message.len()
    );

    Ok(Json(chat.chat(request).await?))
}

pub async fn memory_chat_stream_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Json(request): Json<MemoryChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, EngineError> {
    info!(
        "Memory chat stream: user={}, scope={:?}, message_len={}",
        request.user_id,
        request.knowledge_scope,
        request.message.len()
    );

    let chunks = chat.chat_stream(request).await?;
    Ok(into_sse(chunks))
}

pub async fn thread_chat_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(thread_id): Path<String>,
    Json(request): Json<ThreadChatRequest>,
) -> Result<Json<ChatReply>, EngineError> {
    info!(
        "Thread chat: thread={}, user={}, message_len={}",
        thread_id,
        request.user_id,
        request.message.len()
    );

    Ok(Json(chat.thread_chat(&thread_id, request).await?))
}

pub async fn thread_chat_stream_handler(
    Extension(chat): Extension<Arc<ChatService>>,
    Path(thread_id): Path<String>,
    Json(request): Json<ThreadChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, EngineError> {
    info!(
        "Thread chat stream: thread={}, user={}, message_len={}",
        thread_id,
        request.user_id,
        request.message.len()
    );

    let chunks = chat.thread_chat_stream(&thread_id, request).await?;
    Ok(into_sse(chunks))
}

fn into_sse(chunks: ReplyStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = chunks.map(|chunk| Ok(create_sse_event(chunk.event_name(), &chunk)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

// Helper: Create SSE event
fn create_sse_event<T: serde::Serialize>(event_type: &str, data: &T) -> Event {
    Event::default()
        .event(event_type)
        .data(serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string()))
}
