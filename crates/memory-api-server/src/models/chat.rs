use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::memory::{CacheSummary, MemoryStats};
use crate::services::threads::ThreadSummary;

// ===== REQUEST MODELS =====

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryChatRequest {
    pub user_id: String,
    pub message: String,
    /// Knowledge collection to consult; the user's own when absent
    #[serde(default, alias = "brain_id")]
    pub knowledge_scope: Option<String>,
    /// Replaces the default system prompt for this message
    #[serde(default, alias = "system_prompt")]
    pub behavior_override: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateThreadRequest {
    pub user_id: String,
    #[serde(default, alias = "brain_id")]
    pub knowledge_scope: Option<String>,
    #[serde(default, alias = "system_prompt")]
    pub behavior_override: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub initial_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadChatRequest {
    pub user_id: String,
    pub message: String,
    /// Per-message override of the thread's scope
    #[serde(default, alias = "brain_id")]
    pub knowledge_scope: Option<String>,
    /// Per-message override of the thread's behavior
    #[serde(default, alias = "system_prompt")]
    pub behavior_override: Option<String>,
}

/// Absent fields keep the thread's current value
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateThreadRequest {
    pub user_id: String,
    #[serde(default, alias = "brain_id")]
    pub knowledge_scope: Option<String>,
    #[serde(default, alias = "system_prompt")]
    pub behavior_override: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopeQuery {
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub user_id: String,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub user_id: String,
    pub knowledge_scope: String,
    pub behavior_override: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub context_used: bool,
    pub context_length: usize,
    pub used_long_term: bool,
    pub used_quick: bool,
    pub processing_time_ms: u64,
}

/// First event of a streamed reply
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub user_id: String,
    pub knowledge_scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub context_length: usize,
    pub used_long_term: bool,
    pub used_quick: bool,
}

/// Streamed reply events
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatStreamChunk {
    Context(ContextInfo),
    Message {
        delta: String,
    },
    Done {
        processing_time_ms: u64,
        response_length: usize,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ChatStreamChunk {
    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Context(_) => "context",
            Self::Message { .. } => "message",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PersonaResponse {
    pub identity_key: String,
    pub persona: Option<String>,
    pub persona_updated_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub identity_key: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub identity_key: String,
    pub cleared: bool,
    pub stats: MemoryStats,
}

#[derive(Debug, Serialize)]
pub struct MemoryHealthResponse {
    pub status: String,
    pub memory: CacheSummary,
    pub threads: usize,
}

#[derive(Debug, Serialize)]
pub struct ThreadListResponse {
    pub user_id: String,
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Serialize)]
pub struct ThreadContextResponse {
    pub thread_id: String,
    pub context: String,
    pub context_length: usize,
    /// Messages that made it into the context
    pub history_messages: usize,
    /// Messages currently stored in the thread
    pub message_count: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteThreadResponse {
    pub thread_id: String,
    pub deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_legacy_names() {
        let request: MemoryChatRequest = serde_json::from_str(
            r#"{"user_id":"u1","message":"hi","brain_id":"work","system_prompt":"Be brief"}"#,
        )
        .unwrap();

        assert_eq!(request.knowledge_scope.as_deref(), Some("work"));
        assert_eq!(request.behavior_override.as_deref(), Some("Be brief"));
    }

    #[test]
    fn test_stream_chunk_is_tagged() {
        let chunk = ChatStreamChunk::Message { delta: "Hel".into() };
        let json = serde_json::to_value(&chunk).unwrap();

        assert_eq!(json["kind"], "message");
        assert_eq!(json["delta"], "Hel");
        assert_eq!(chunk.event_name(), "message");
    }
}
