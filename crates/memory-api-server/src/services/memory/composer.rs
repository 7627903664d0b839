use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::refresh::RefreshCoordinator;
use super::types::IdentityKey;
use crate::config::{BrainConfig, MemoryConfig, ThreadConfig};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::services::providers::{BrainProvider, Snippet};
use crate::services::threads::{Role, ThreadMessage, ThreadStore, TokenBudget};

/// Prompt context for one reply
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposedContext {
    pub text: String,
    pub used_long_term: bool,
    pub used_quick: bool,
    pub history_messages: usize,
    pub has_persona: bool,
}

impl ComposedContext {
    pub fn context_length(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Sections in prompt order; empty ones are left out
#[derive(Debug, Default)]
struct ContextSections {
    history: Vec<String>,
    persona: Option<String>,
    long_term: Vec<String>,
    quick: Vec<String>,
}

impl ContextSections {
    fn build(&self) -> String {
        let mut parts = Vec::new();

        if !self.history.is_empty() {
            parts.push(format!("## Conversation history\n{}", self.history.join("\n")));
        }
        if let Some(persona) = self.persona.as_deref().filter(|p| !p.trim().is_empty()) {
            parts.push(format!("## About the user\n{}", persona.trim()));
        }
        if !self.long_term.is_empty() {
            parts.push(format!("## Long-term memory\n{}", bullets(&self.long_term)));
        }
        if !self.quick.is_empty() {
            parts.push(format!("## Knowledge base\n{}", bullets(&self.quick)));
        }

        parts.join("\n\n")
    }
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {}", item.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merges thread history, persona, long-term memory and quick search results.
/// Only the quick search is awaited, and only up to `quick_timeout`.
#[derive(Clone)]
pub struct ContextComposer {
    refresh: RefreshCoordinator,
    threads: ThreadStore,
    brain: Arc<dyn BrainProvider>,
    activity: ActivityLogger,
    quick_timeout: Duration,
    recent_exchanges: usize,
    persona_ttl_seconds: i64,
    history_max_messages: usize,
    history_token_budget: usize,
}

impl ContextComposer {
    pub fn new(
        refresh: RefreshCoordinator,
        threads: ThreadStore,
        brain: Arc<dyn BrainProvider>,
        activity: ActivityLogger,
        brain_config: &BrainConfig,
        memory_config: &MemoryConfig,
        thread_config: &ThreadConfig,
    ) -> Self {
        Self {
            refresh,
            threads,
            brain,
            activity,
            quick_timeout: Duration::from_millis(brain_config.quick_timeout_ms.max(1)),
            recent_exchanges: memory_config.recent_exchanges_in_context,
            persona_ttl_seconds: memory_config.persona_ttl_seconds,
            history_max_messages: thread_config.history_max_messages.max(1),
            history_token_budget: thread_config.history_token_budget,
        }
    }

    pub async fn compose(
        &self,
        identity: &IdentityKey,
        thread_id: Option<&str>,
        message: &str,
    ) -> ComposedContext {
        let record = self.refresh.cache().get_or_create(identity);
        let mut sections = ContextSections::default();

        // 1. History: the thread when given, otherwise recent short-term exchanges
        match thread_id {
            Some(thread_id) => {
                sections.history = self.thread_history(identity, thread_id);
            }
            None => {
                sections.history = record.recent_exchanges(self.recent_exchanges);
            }
        }

        // 2. Persona, refreshed in the background when missing or stale
        if record.persona_is_stale(self.persona_ttl_seconds, Utc::now()) {
            let outcome = self.refresh.trigger_refresh(identity);
            debug!("Persona stale for {}, refresh {}", identity, outcome.as_str());
        }
        sections.persona = record.persona.clone();

        // 3. Cached long-term memory
        sections.long_term = record.long_term.clone();

        // 4. Quick search, bounded
        sections.quick = self
            .quick_snippets(identity, thread_id, message)
            .await
            .into_iter()
            .map(|s| s.text)
            .filter(|t| !t.trim().is_empty())
            .collect();

        let context = ComposedContext {
            text: sections.build(),
            used_long_term: !sections.long_term.is_empty(),
            used_quick: !sections.quick.is_empty(),
            history_messages: sections.history.len(),
            has_persona: sections.persona.is_some(),
        };

        debug!(
            "Composed context for {}: {} chars (history={}, long_term={}, quick={})",
            identity,
            context.context_length(),
            context.history_messages,
            context.used_long_term,
            context.used_quick
        );
        context
    }

    /// Rendered thread messages within the history cap and token budget.
    /// An unknown thread yields no history.
    pub fn thread_history(&self, identity: &IdentityKey, thread_id: &str) -> Vec<String> {
        let messages = match self.threads.get_messages(thread_id, Some(self.history_max_messages)) {
            Ok(messages) => messages,
            Err(e) => {
                debug!("Skipping thread history for {}: {}", thread_id, e);
                return Vec::new();
            }
        };

        let trimmed = TokenBudget::trim(&messages, self.history_token_budget);
        if trimmed.len() < messages.len() {
            self.activity.log(
                ActivityLog::builder(identity.as_key(), ActivityType::HistoryTrimmed)
                    .thread_id(thread_id)
                    .status(ActivityStatus::Info)
                    .entries(trimmed.len())
                    .custom("dropped", messages.len() - trimmed.len())
                    .build(),
            );
        }

        trimmed.iter().map(render_message).collect()
    }

    async fn quick_snippets(
        &self,
        identity: &IdentityKey,
        thread_id: Option<&str>,
        message: &str,
    ) -> Vec<Snippet> {
        let scope = identity.knowledge_scope();
        let outcome = tokio::time::timeout(self.quick_timeout, self.brain.quick_search(scope, message)).await;

        let reason = match outcome {
            Ok(Ok(snippets)) => return snippets,
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!("quick search exceeded {:?}", self.quick_timeout),
        };

        warn!("Quick search degraded for {}: {}", identity, reason);
        let mut log = ActivityLog::builder(identity.as_key(), ActivityType::QuickSearchDegraded)
            .status(ActivityStatus::Warning)
            .message(reason);
        if let Some(thread_id) = thread_id {
            log = log.thread_id(thread_id);
        }
        self.activity.log(log.build());

        Vec::new()
    }
}

fn render_message(message: &ThreadMessage) -> String {
    let speaker = match message.role {
        Role::User => "User",
        Role::Assistant => "Assistant",
    };
    format!("{}: {}", speaker, message.content)
}
