//! Conversation threads with bounded history
//!
//! - FIFO-capped message history per thread
//! - Per-thread knowledge scope and behavior defaults, overridable per message
//! - Token-budget trimming of history before it reaches the prompt

mod store;
mod token_budget;
pub mod types;

pub use store::{NewThread, ThreadStore};
pub use token_budget::TokenBudget;
pub use types::{Role, Thread, ThreadMessage, ThreadSummary};
