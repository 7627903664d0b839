use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Length of the `last_message` preview
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub message_id: String,
    pub role: Role,
    pub content: String,
    /// Knowledge scope in effect when the message was exchanged
    pub knowledge_scope: String,
    pub behavior_override: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        knowledge_scope: impl Into<String>,
        behavior_override: Option<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            knowledge_scope: knowledge_scope.into(),
            behavior_override,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded conversation session
#[derive(Debug, Clone, Serialize)]
pub struct Thread {
    pub thread_id: String,
    pub user_id: String,
    pub knowledge_scope: String,
    pub behavior_override: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: VecDeque<ThreadMessage>,
    /// Messages ever appended, including evicted ones
    pub message_count: usize,
    pub last_message: Option<String>,
}

impl Thread {
    pub fn new(
        user_id: impl Into<String>,
        knowledge_scope: impl Into<String>,
        behavior_override: Option<String>,
        title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Conversation {}", now.format("%Y-%m-%d %H:%M")));

        Self {
            thread_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            knowledge_scope: knowledge_scope.into(),
            behavior_override,
            title,
            created_at: now,
            updated_at: now,
            messages: VecDeque::new(),
            message_count: 0,
            last_message: None,
        }
    }

    /// Append and evict from the front past `max_messages`
    pub(crate) fn push(&mut self, message: ThreadMessage, max_messages: usize) {
        self.last_message = Some(preview(&message.content));
        self.updated_at = message.timestamp;
        self.messages.push_back(message);
        self.message_count += 1;

        while self.messages.len() > max_messages {
            self.messages.pop_front();
        }
    }

    /// Metadata without the message list
    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            thread_id: self.thread_id.clone(),
            user_id: self.user_id.clone(),
            knowledge_scope: self.knowledge_scope.clone(),
            behavior_override: self.behavior_override.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.message_count,
            last_message: self.last_message.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub user_id: String,
    pub knowledge_scope: String,
    pub behavior_override: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub last_message: Option<String>,
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_title() {
        let thread = Thread::new("u1", "u1", None, None);
        assert!(thread.title.starts_with("Conversation "));
        assert_eq!(thread.title.len(), "Conversation 2026-01-01 10:00".len());

        let named = Thread::new("u1", "u1", None, Some("Trip".into()));
        assert_eq!(named.title, "Trip");
    }

    #[test]
    fn test_push_tracks_preview_and_count() {
        let mut thread = Thread::new("u1", "work", None, None);
        let long = "x".repeat(150);

        thread.push(ThreadMessage::new(Role::User, long, "work", None), 2);
        thread.push(ThreadMessage::new(Role::Assistant, "a", "work", None), 2);
        thread.push(ThreadMessage::new(Role::User, "b", "work", None), 2);

        assert_eq!(thread.messages.len(), 2);
        assert_eq!(thread.message_count, 3);
        assert_eq!(thread.last_message.as_deref(), Some("b"));
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        let text = "å".repeat(120);
        let cut = preview(&text);
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }
}
