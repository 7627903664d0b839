use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::MemoryCache;
use super::types::{IdentityKey, RefreshOutcome};
use crate::config::{MemoryConfig, RefreshQueryPolicy};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::services::providers::BrainProvider;
use crate::utils::Limiters;

/// Marker held for the whole life of one background refresh.
/// Dropping it clears `is_updating`, unless the record was cleared meanwhile.
pub struct PendingRefresh {
    cache: MemoryCache,
    key: String,
    token: u64,
}

impl PendingRefresh {
    /// None when a refresh for `key` is already in flight
    pub fn acquire(cache: &MemoryCache, key: &str) -> Option<Self> {
        let token = cache.try_mark_updating(key)?;
        Some(Self {
            cache: cache.clone(),
            key: key.to_string(),
            token,
        })
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for PendingRefresh {
    fn drop(&mut self) {
        self.cache.release_updating(&self.key, self.token);
    }
}

/// What a refresh sends to full retrieval
enum RefreshQuery {
    Fixed(String),
    /// Built from short-term memory when the task runs
    Latest,
}

/// Handles of the background work started for one exchange
pub struct NotedExchange {
    pub short_term_entries: usize,
    pub refresh: RefreshOutcome,
    pub durable_append: JoinHandle<()>,
}

/// Records exchanges and keeps long-term memory current in the background.
/// At most one refresh per identity, at most `max_concurrent_refreshes` overall.
#[derive(Clone)]
pub struct RefreshCoordinator {
    cache: MemoryCache,
    brain: Arc<dyn BrainProvider>,
    limiters: Limiters,
    activity: ActivityLogger,
    refresh_timeout: Duration,
    policy: RefreshQueryPolicy,
    recent_exchanges: usize,
    persona_query: String,
}

impl RefreshCoordinator {
    pub fn new(
        cache: MemoryCache,
        brain: Arc<dyn BrainProvider>,
        limiters: Limiters,
        activity: ActivityLogger,
        config: &MemoryConfig,
        persona_query: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            brain,
            limiters,
            activity,
            refresh_timeout: Duration::from_secs(config.refresh_timeout_seconds.max(1)),
            policy: config.refresh_query,
            recent_exchanges: config.recent_exchanges_in_context.max(1),
            persona_query: persona_query.into(),
        }
    }

    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    /// Record a completed exchange, then start the durable append and a refresh.
    /// Only the short-term append happens before this returns.
    pub fn note_exchange(
        &self,
        identity: &IdentityKey,
        user_text: &str,
        assistant_text: &str,
    ) -> NotedExchange {
        let exchange = format!("User: {}\nAssistant: {}", user_text, assistant_text);
        let short_term_entries = self.cache.append_short_term(identity, exchange.clone());

        self.activity.log(
            ActivityLog::builder(identity.as_key(), ActivityType::ExchangeNoted)
                .entries(short_term_entries)
                .build(),
        );

        let durable_append = self.spawn_durable_append(identity, exchange);
        let refresh = self.trigger_refresh(identity);

        NotedExchange {
            short_term_entries,
            refresh,
            durable_append,
        }
    }

    /// Start a background full retrieval for `identity` unless one is running
    /// or the global ceiling is reached. Never waits for the retrieval.
    pub fn trigger_refresh(&self, identity: &IdentityKey) -> RefreshOutcome {
        let key = identity.as_key();

        let Some(pending) = PendingRefresh::acquire(&self.cache, &key) else {
            debug!("Refresh already in flight for {}", key);
            self.activity.log(
                ActivityLog::builder(&key, ActivityType::RefreshSkipped)
                    .status(ActivityStatus::Info)
                    .message("already_in_flight")
                    .build(),
            );
            return RefreshOutcome::AlreadyInFlight;
        };

        let Some(permit) = self.limiters.try_refresh_permit() else {
            drop(pending);
            warn!("Refresh ceiling reached, skipping refresh for {}", key);
            self.activity.log(
                ActivityLog::builder(&key, ActivityType::RefreshSkipped)
                    .status(ActivityStatus::Warning)
                    .message("saturated")
                    .build(),
            );
            return RefreshOutcome::Saturated;
        };

        let query = match self.policy {
            RefreshQueryPolicy::TriggeringExchange => RefreshQuery::Fixed(
                self.cache
                    .get(identity)
                    .and_then(|record| record.short_term.back().cloned())
                    .unwrap_or_else(|| self.persona_query.clone()),
            ),
            RefreshQueryPolicy::LatestExchanges => RefreshQuery::Latest,
        };

        self.activity.log(ActivityLog::builder(&key, ActivityType::RefreshScheduled).build());

        let this = self.clone();
        let identity = identity.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            this.run_refresh(identity, pending, query).await;
        });

        RefreshOutcome::Scheduled(handle)
    }

    async fn run_refresh(&self, identity: IdentityKey, pending: PendingRefresh, query: RefreshQuery) {
        let key = identity.as_key();
        let start = Instant::now();

        let query = match query {
            RefreshQuery::Fixed(query) => query,
            RefreshQuery::Latest => self.latest_query(&identity),
        };

        debug!("Refreshing long-term memory for {} (scope={})", key, identity.knowledge_scope());

        let result = tokio::time::timeout(
            self.refresh_timeout,
            self.brain.full_retrieve(identity.knowledge_scope(), &query),
        )
        .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(retrieval)) => {
                let persona = retrieval.persona.clone();
                let contexts = retrieval.into_contexts(self.cache.long_term_capacity());
                let entries = contexts.len();

                if self.cache.complete_refresh(&key, pending.token(), contexts, persona) {
                    info!("Long-term memory refreshed for {} ({} entries, {}ms)", key, entries, duration_ms);
                    self.activity.log(
                        ActivityLog::builder(&key, ActivityType::RefreshCompleted)
                            .entries(entries)
                            .duration_ms(duration_ms)
                            .build(),
                    );
                } else {
                    debug!("Refresh for {} finished after memory was cleared", key);
                }
            }
            Ok(Err(e)) => {
                warn!("Refresh failed for {}: {:#}", key, e);
                self.activity.log(
                    ActivityLog::builder(&key, ActivityType::RefreshFailed)
                        .duration_ms(duration_ms)
                        .error(format!("{:#}", e), "upstream")
                        .build(),
                );
            }
            Err(_) => {
                warn!("Refresh timed out for {} after {:?}", key, self.refresh_timeout);
                self.activity.log(
                    ActivityLog::builder(&key, ActivityType::RefreshFailed)
                        .duration_ms(duration_ms)
                        .error("full retrieval timed out", "timeout")
                        .build(),
                );
            }
        }

        drop(pending);
    }

    fn latest_query(&self, identity: &IdentityKey) -> String {
        let recent = self
            .cache
            .get(identity)
            .map(|record| record.recent_exchanges(self.recent_exchanges))
            .unwrap_or_default();

        if recent.is_empty() {
            self.persona_query.clone()
        } else {
            recent.join("\n\n")
        }
    }

    fn spawn_durable_append(&self, identity: &IdentityKey, content: String) -> JoinHandle<()> {
        let brain = Arc::clone(&self.brain);
        let semaphore = Arc::clone(&self.limiters.durable_append);
        let acquire_timeout = self.limiters.acquire_timeout;
        let activity = self.activity.clone();
        let metadata = exchange_metadata(identity.user_id());
        let key = identity.as_key();
        let scope = identity.knowledge_scope().to_string();

        tokio::spawn(async move {
            let _permit = match Limiters::acquire_timed(semaphore, acquire_timeout, "durable_append").await {
                Ok((permit, waited)) => {
                    debug!("Durable append permit for {} after {:?}", key, waited);
                    permit
                }
                Err(e) => {
                    warn!("Durable append skipped for {}: {}", key, e);
                    activity.log(
                        ActivityLog::builder(&key, ActivityType::DurableAppendFailed)
                            .error(e.to_string(), "limiter")
                            .build(),
                    );
                    return;
                }
            };

            if let Err(e) = brain.durable_append(&scope, &content, metadata).await {
                warn!("Durable append failed for {}: {:#}", key, e);
                activity.log(
                    ActivityLog::builder(&key, ActivityType::DurableAppendFailed)
                        .error(format!("{:#}", e), "upstream")
                        .build(),
                );
            }
        })
    }
}

/// Metadata stored with every persisted exchange
pub fn exchange_metadata(user_id: &str) -> Value {
    let now = Utc::now();
    json!({
        "source": "chat",
        "content_type": "chat",
        "memory_type": "conversation",
        "user_id": user_id,
        "timestamp": now.to_rfc3339(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "day_of_week": now.format("%A").to_string(),
        "month": now.format("%B").to_string(),
    })
}
