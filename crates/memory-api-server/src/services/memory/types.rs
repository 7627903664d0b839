use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use crate::utils::EngineError;

const KEY_SEPARATOR: &str = "::";

/// Lookup key for cached memory: a user, optionally narrowed to one knowledge scope.
/// Distinct scopes of the same user never share memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    user_id: String,
    scope: Option<String>,
}

impl IdentityKey {
    pub fn new(user_id: impl Into<String>, scope: Option<String>) -> Result<Self, EngineError> {
        let user_id = user_id.into().trim().to_string();
        if user_id.is_empty() {
            return Err(EngineError::BadRequest("identity requires a user_id".to_string()));
        }
        // `::` separates user and scope in the cache key
        if user_id.contains(KEY_SEPARATOR) {
            return Err(EngineError::BadRequest(format!(
                "user_id must not contain '{}'",
                KEY_SEPARATOR
            )));
        }

        // a scope naming the user's own collection is the unscoped identity
        let scope = scope
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && *s != user_id);

        Ok(Self { user_id, scope })
    }

    pub fn user(user_id: impl Into<String>) -> Result<Self, EngineError> {
        Self::new(user_id, None)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Knowledge collection consulted for this identity
    pub fn knowledge_scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(&self.user_id)
    }

    /// Stable cache key: `user` or `user::scope`
    pub fn as_key(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}{}{}", self.user_id, KEY_SEPARATOR, scope),
            None => self.user_id.clone(),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// Cached memory for one identity
#[derive(Debug, Clone, Serialize)]
pub struct MemoryRecord {
    pub identity_key: String,

    /// Raw exchanges, most recent last
    pub short_term: VecDeque<String>,

    /// Distilled context from the last successful full retrieval
    pub long_term: Vec<String>,

    pub persona: Option<String>,
    pub persona_updated_at: Option<DateTime<Utc>>,

    /// Time of last long-term refresh
    pub last_updated: Option<DateTime<Utc>>,
    pub last_exchange_at: Option<DateTime<Utc>>,

    pub is_updating: bool,

    #[serde(skip)]
    pub(crate) refresh_token: Option<u64>,
}

impl MemoryRecord {
    pub fn new(identity_key: impl Into<String>, short_term_capacity: usize) -> Self {
        Self {
            identity_key: identity_key.into(),
            short_term: VecDeque::with_capacity(short_term_capacity + 1),
            long_term: Vec::new(),
            persona: None,
            persona_updated_at: None,
            last_updated: None,
            last_exchange_at: None,
            is_updating: false,
            refresh_token: None,
        }
    }

    pub fn has_context(&self) -> bool {
        !self.short_term.is_empty() || !self.long_term.is_empty()
    }

    /// Character count of all short- and long-term entries
    pub fn context_length(&self) -> usize {
        self.short_term
            .iter()
            .chain(self.long_term.iter())
            .map(|entry| entry.chars().count())
            .sum()
    }

    /// Most recent `limit` exchanges, oldest first
    pub fn recent_exchanges(&self, limit: usize) -> Vec<String> {
        let skip = self.short_term.len().saturating_sub(limit);
        self.short_term.iter().skip(skip).cloned().collect()
    }

    pub fn persona_is_stale(&self, ttl_seconds: i64, now: DateTime<Utc>) -> bool {
        match (&self.persona, self.persona_updated_at) {
            (Some(_), Some(updated)) => (now - updated).num_seconds() > ttl_seconds,
            _ => true,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.short_term.clear();
        self.long_term.clear();
        self.persona = None;
        self.persona_updated_at = None;
        self.is_updating = false;
        self.refresh_token = None;
    }
}

/// Read-only memory snapshot for introspection
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MemoryStats {
    pub identity_key: String,
    pub cached: bool,
    pub has_context: bool,
    pub context_length: usize,
    pub short_term_entries: usize,
    pub long_term_entries: usize,
    pub has_persona: bool,
    pub persona_updated_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_updating: bool,
}

impl MemoryStats {
    pub fn empty(identity_key: String) -> Self {
        Self {
            identity_key,
            cached: false,
            has_context: false,
            context_length: 0,
            short_term_entries: 0,
            long_term_entries: 0,
            has_persona: false,
            persona_updated_at: None,
            last_updated: None,
            is_updating: false,
        }
    }
}

impl From<&MemoryRecord> for MemoryStats {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            identity_key: record.identity_key.clone(),
            cached: true,
            has_context: record.has_context(),
            context_length: record.context_length(),
            short_term_entries: record.short_term.len(),
            long_term_entries: record.long_term.len(),
            has_persona: record.persona.is_some(),
            persona_updated_at: record.persona_updated_at,
            last_updated: record.last_updated,
            is_updating: record.is_updating,
        }
    }
}

/// Cache-wide numbers for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub identities: usize,
    pub refreshing: usize,
    pub memory_usage_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f64,
}

/// Result of asking for a long-term refresh
#[derive(Debug)]
pub enum RefreshOutcome {
    /// A detached refresh task was spawned
    Scheduled(tokio::task::JoinHandle<()>),
    /// A refresh for this identity is already running; nothing was done
    AlreadyInFlight,
    /// The global refresh ceiling is reached; retried on the next exchange
    Saturated,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled(_) => "scheduled",
            Self::AlreadyInFlight => "already_in_flight",
            Self::Saturated => "saturated",
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled(_))
    }
}
