use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    ExchangeNoted,
    RefreshScheduled,
    RefreshSkipped,
    RefreshCompleted,
    RefreshFailed,
    DurableAppendFailed,
    QuickSearchDegraded,
    ThreadCreated,
    ThreadUpdated,
    ThreadDeleted,
    HistoryTrimmed,
    MemoryCleared,
    ReplyFailed,
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExchangeNoted => "exchange_noted",
            Self::RefreshScheduled => "refresh_scheduled",
            Self::RefreshSkipped => "refresh_skipped",
            Self::RefreshCompleted => "refresh_completed",
            Self::RefreshFailed => "refresh_failed",
            Self::DurableAppendFailed => "durable_append_failed",
            Self::QuickSearchDegraded => "quick_search_degraded",
            Self::ThreadCreated => "thread_created",
            Self::ThreadUpdated => "thread_updated",
            Self::ThreadDeleted => "thread_deleted",
            Self::HistoryTrimmed => "history_trimmed",
            Self::MemoryCleared => "memory_cleared",
            Self::ReplyFailed => "reply_failed",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Warning,
    Info,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// Complete activity log entry
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub identity_key: String,
    pub thread_id: Option<String>,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    pub message: Option<String>,

    // Metrics
    pub entries: Option<usize>,
    pub duration_ms: Option<u64>,

    // Error
    pub error_message: Option<String>,
    pub error_type: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom_fields: HashMap<String, Value>,
}

impl ActivityLog {
    /// Create builder for fluent API
    pub fn builder(identity_key: impl Into<String>, activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(identity_key.into(), activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(identity_key: String, activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                identity_key,
                thread_id: None,
                activity_type,
                activity_status: ActivityStatus::Success,
                message: None,
                entries: None,
                duration_ms: None,
                error_message: None,
                error_type: None,
                created_at: Utc::now(),
                custom_fields: HashMap::new(),
            },
        }
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn thread_id(mut self, id: impl Into<String>) -> Self {
        self.log.thread_id = Some(id.into());
        self
    }

    pub fn message(mut self, content: impl Into<String>) -> Self {
        self.log.message = Some(content.into());
        self
    }

    pub fn entries(mut self, count: usize) -> Self {
        self.log.entries = Some(count);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.log.duration_ms = Some(ms);
        self
    }

    pub fn error(mut self, message: impl Into<String>, error_type: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.error_type = Some(error_type.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    /// Add custom key-value data
    pub fn custom(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.log.custom_fields.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}
