use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use memory_api_server::build_router;
use memory_api_server::config::Settings;
use memory_api_server::logging::{self, ActivityLogger, LoggerConfig};
use memory_api_server::services::{BrainClient, ChatService, OllamaClient};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = logging::init(&settings.log)?;

    info!("🚀 Starting Memory API Server...");
    info!(
        "✅ Configuration loaded: brain={}, llm={} ({})",
        settings.brain.base_url, settings.llm.base_url, settings.llm.model
    );

    let brain = Arc::new(BrainClient::new(settings.brain.clone()));
    let llm = Arc::new(OllamaClient::new(settings.llm.clone()));
    let activity = ActivityLogger::new(LoggerConfig::from(&settings.activity));

    let chat = Arc::new(ChatService::new(&settings, brain, llm, activity));
    info!(
        "✅ Memory ready: short_term={}, long_term={}, max_refreshes={}",
        settings.memory.short_term_capacity,
        settings.memory.long_term_capacity,
        settings.memory.max_concurrent_refreshes
    );

    let app = build_router(chat);

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
