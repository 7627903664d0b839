pub mod config;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use services::ChatService;

pub fn build_router(chat: Arc<ChatService>) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let memory_routes = Router::new()
        .route("/memory/chat", post(handlers::chat::memory_chat_handler))
        .route("/memory/chat/stream", post(handlers::chat::memory_chat_stream_handler))
        .route("/memory/stats/{user_id}", get(handlers::memory::stats_handler))
        .route("/memory/clear/{user_id}", post(handlers::memory::clear_handler))
        .route("/memory/persona/{user_id}", get(handlers::memory::persona_handler))
        .route("/memory/refresh/{user_id}", post(handlers::memory::refresh_handler))
        .route("/memory/health", get(handlers::memory::memory_health_handler));

    let thread_routes = Router::new()
        .route("/threads", post(handlers::threads::create_thread_handler))
        .route("/threads/user/{user_id}", get(handlers::threads::list_threads_handler))
        .route(
            "/threads/{thread_id}",
            get(handlers::threads::get_thread_handler)
                .patch(handlers::threads::update_thread_handler)
                .delete(handlers::threads::delete_thread_handler),
        )
        .route("/threads/{thread_id}/context", get(handlers::threads::thread_context_handler))
        .route("/threads/{thread_id}/messages", get(handlers::threads::thread_messages_handler))
        .route("/threads/{thread_id}/chat", post(handlers::chat::thread_chat_handler))
        .route("/threads/{thread_id}/chat/stream", post(handlers::chat::thread_chat_stream_handler));

    Router::new()
        .merge(health_routes)
        .merge(memory_routes)
        .merge(thread_routes)
        .layer(Extension(chat))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}
