pub mod brain_service;
pub mod chat_service;
pub mod llm_service;
pub mod memory;
pub mod persona;
pub mod providers;
pub mod think_filter;
pub mod threads;

pub use brain_service::BrainClient;
pub use chat_service::{ChatService, ReplyStream};
pub use llm_service::OllamaClient;
pub use providers::{BrainProvider, LlmProvider};
