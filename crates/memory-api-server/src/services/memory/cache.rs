use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::System;
use tracing::{debug, info};

use super::types::{CacheSummary, IdentityKey, MemoryRecord, MemoryStats};
use crate::config::MemoryConfig;

type SharedRecord = Arc<RwLock<MemoryRecord>>;

/// Thread-safe per-identity memory store.
/// Each record has its own lock, so identities never contend with each other.
#[derive(Clone)]
pub struct MemoryCache {
    storage: Arc<DashMap<String, SharedRecord>>,
    short_term_capacity: usize,
    long_term_capacity: usize,
    next_refresh_token: Arc<AtomicU64>,

    /// System info for RAM monitoring
    system: Arc<Mutex<System>>,
}

impl MemoryCache {
    pub fn new(config: &MemoryConfig) -> Self {
        info!(
            "Initializing memory cache (short_term={}, long_term={})",
            config.short_term_capacity, config.long_term_capacity
        );
        Self {
            storage: Arc::new(DashMap::new()),
            short_term_capacity: config.short_term_capacity.max(1),
            long_term_capacity: config.long_term_capacity.max(1),
            next_refresh_token: Arc::new(AtomicU64::new(1)),
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    pub fn short_term_capacity(&self) -> usize {
        self.short_term_capacity
    }

    pub fn long_term_capacity(&self) -> usize {
        self.long_term_capacity
    }

    /// Shared handle to the record, inserted atomically when missing.
    /// The map guard is released before the caller locks the record.
    fn record(&self, key: &str) -> SharedRecord {
        self.storage
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating memory record for {}", key);
                Arc::new(RwLock::new(MemoryRecord::new(key, self.short_term_capacity)))
            })
            .value()
            .clone()
    }

    fn existing(&self, key: &str) -> Option<SharedRecord> {
        self.storage.get(key).map(|entry| entry.value().clone())
    }

    /// Snapshot of the record, creating an empty one on first access
    pub fn get_or_create(&self, identity: &IdentityKey) -> MemoryRecord {
        let record = self.record(&identity.as_key());
        let snapshot = record.read().clone();
        snapshot
    }

    /// Snapshot without creating
    pub fn get(&self, identity: &IdentityKey) -> Option<MemoryRecord> {
        let record = self.existing(&identity.as_key())?;
        let snapshot = record.read().clone();
        Some(snapshot)
    }

    /// Append one exchange, evicting the oldest past capacity.
    /// Returns the short-term length after the append.
    pub fn append_short_term(&self, identity: &IdentityKey, exchange: impl Into<String>) -> usize {
        let record = self.record(&identity.as_key());
        let mut record = record.write();

        record.short_term.push_back(exchange.into());
        while record.short_term.len() > self.short_term_capacity {
            record.short_term.pop_front();
        }
        record.last_exchange_at = Some(Utc::now());

        debug!(
            "Short-term memory for {} now holds {} entries",
            identity,
            record.short_term.len()
        );
        record.short_term.len()
    }

    /// Replace long-term memory in one step and stamp `last_updated`
    pub fn replace_long_term(&self, identity: &IdentityKey, mut contexts: Vec<String>) {
        contexts.truncate(self.long_term_capacity);

        let record = self.record(&identity.as_key());
        let mut record = record.write();
        record.long_term = contexts;
        record.last_updated = Some(Utc::now());

        debug!(
            "Long-term memory for {} replaced ({} entries)",
            identity,
            record.long_term.len()
        );
    }

    pub fn set_persona(&self, identity: &IdentityKey, persona: impl Into<String>) {
        let record = self.record(&identity.as_key());
        let mut record = record.write();
        record.persona = Some(persona.into());
        record.persona_updated_at = Some(Utc::now());
    }

    /// Reset short-term, long-term and persona; the record itself stays.
    /// Any refresh in flight loses its right to write back.
    pub fn clear(&self, identity: &IdentityKey) -> bool {
        match self.existing(&identity.as_key()) {
            Some(record) => {
                record.write().reset();
                info!("Cleared memory for {}", identity);
                true
            }
            None => false,
        }
    }

    pub fn stats(&self, identity: &IdentityKey) -> MemoryStats {
        let Some(record) = self.existing(&identity.as_key()) else {
            return MemoryStats::empty(identity.as_key());
        };
        let stats = MemoryStats::from(&*record.read());
        stats
    }

    /// Check-and-set of `is_updating` under the record's write lock.
    /// Returns the refresh token when this caller won the flag.
    pub(crate) fn try_mark_updating(&self, key: &str) -> Option<u64> {
        let record = self.record(key);
        let mut record = record.write();

        if record.is_updating {
            return None;
        }

        let token = self.next_refresh_token.fetch_add(1, Ordering::Relaxed);
        record.is_updating = true;
        record.refresh_token = Some(token);
        Some(token)
    }

    /// Clear `is_updating` if `token` still owns it
    pub(crate) fn release_updating(&self, key: &str, token: u64) {
        if let Some(record) = self.existing(key) {
            let mut record = record.write();
            if record.refresh_token == Some(token) {
                record.is_updating = false;
                record.refresh_token = None;
            }
        }
    }

    /// Write back a finished refresh. Ignored when the record was cleared
    /// after the refresh started.
    pub(crate) fn complete_refresh(
        &self,
        key: &str,
        token: u64,
        contexts: Vec<String>,
        persona: Option<String>,
    ) -> bool {
        let Some(record) = self.existing(key) else {
            return false;
        };
        let mut record = record.write();

        if record.refresh_token != Some(token) {
            debug!("Discarding stale refresh result for {}", key);
            return false;
        }

        let mut contexts = contexts;
        contexts.truncate(self.long_term_capacity);

        let now = Utc::now();
        record.long_term = contexts;
        record.last_updated = Some(now);
        if let Some(persona) = persona.filter(|p| !p.trim().is_empty()) {
            record.persona = Some(persona);
            record.persona_updated_at = Some(now);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Cache-wide statistics for monitoring
    pub fn summary(&self) -> CacheSummary {
        let refreshing = self
            .storage
            .iter()
            .filter(|entry| entry.value().read().is_updating)
            .count();

        let mut sys = self.system.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        let used = sys.used_memory();

        CacheSummary {
            identities: self.len(),
            refreshing,
            memory_usage_mb: used / 1024 / 1024,
            memory_total_mb: total / 1024 / 1024,
            memory_usage_percent: if total == 0 {
                0.0
            } else {
                (used as f64 / total as f64) * 100.0
            },
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(user: &str) -> IdentityKey {
        IdentityKey::user(user).unwrap()
    }

    #[test]
    fn test_get_or_create_is_lazy_and_empty() {
        let cache = MemoryCache::default();
        assert!(cache.get(&key("u1")).is_none());

        let record = cache.get_or_create(&key("u1"));
        assert!(record.short_term.is_empty());
        assert!(record.last_updated.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_short_term_evicts_oldest() {
        let cache = MemoryCache::default();
        let id = key("u1");

        for i in 1..=8 {
            cache.append_short_term(&id, format!("e{}", i));
        }

        let record = cache.get_or_create(&id);
        assert_eq!(record.short_term.len(), 5);
        assert_eq!(record.short_term.front().map(String::as_str), Some("e4"));
        assert_eq!(record.short_term.back().map(String::as_str), Some("e8"));
    }

    #[test]
    fn test_replace_long_term_caps_and_stamps() {
        let cache = MemoryCache::default();
        let id = key("u1");

        cache.replace_long_term(&id, (0..15).map(|i| format!("c{}", i)).collect());

        let record = cache.get_or_create(&id);
        assert_eq!(record.long_term.len(), 10);
        assert!(record.last_updated.is_some());
    }

    #[test]
    fn test_scopes_are_isolated() {
        let cache = MemoryCache::default();
        let work = IdentityKey::new("u1", Some("work".into())).unwrap();
        let personal = IdentityKey::new("u1", Some("personal".into())).unwrap();

        cache.append_short_term(&work, "User: a\nAssistant: b");

        assert_eq!(cache.stats(&work).short_term_entries, 1);
        assert_eq!(cache.stats(&personal).short_term_entries, 0);
    }

    #[test]
    fn test_scoped_key_cannot_be_claimed_by_another_user() {
        let cache = MemoryCache::default();
        let scoped = IdentityKey::new("alice", Some("work".into())).unwrap();
        cache.append_short_term(&scoped, "User: a\nAssistant: b");

        assert!(IdentityKey::user("alice::work").is_err());
        assert_eq!(cache.stats(&key("alice")).short_term_entries, 0);
        assert_eq!(cache.stats(&scoped).short_term_entries, 1);
    }

    #[test]
    fn test_clear_resets_context() {
        let cache = MemoryCache::default();
        let id = key("u1");
        cache.append_short_term(&id, "hello");
        cache.replace_long_term(&id, vec!["fact".into()]);
        cache.set_persona(&id, "runner");

        assert!(cache.clear(&id));

        let stats = cache.stats(&id);
        assert!(stats.cached);
        assert!(!stats.has_context);
        assert_eq!(stats.context_length, 0);
        assert!(!stats.has_persona);
    }

    #[test]
    fn test_stats_counts_characters() {
        let cache = MemoryCache::default();
        let id = key("u1");
        cache.append_short_term(&id, "abc");
        cache.replace_long_term(&id, vec!["héllo".into()]);

        assert_eq!(cache.stats(&id).context_length, 8);
    }

    #[test]
    fn test_updating_flag_is_exclusive() {
        let cache = MemoryCache::default();

        let token = cache.try_mark_updating("u1").unwrap();
        assert!(cache.try_mark_updating("u1").is_none());
        assert!(cache.stats(&key("u1")).is_updating);

        cache.release_updating("u1", token);
        assert!(!cache.stats(&key("u1")).is_updating);
        assert!(cache.try_mark_updating("u1").is_some());
    }

    #[test]
    fn test_clear_invalidates_in_flight_refresh() {
        let cache = MemoryCache::default();
        let id = key("u1");
        let token = cache.try_mark_updating("u1").unwrap();

        cache.clear(&id);
        let applied = cache.complete_refresh("u1", token, vec!["late".into()], None);

        assert!(!applied);
        assert!(cache.get_or_create(&id).long_term.is_empty());

        // a new refresh may start and the old token cannot release it
        let fresh = cache.try_mark_updating("u1").unwrap();
        cache.release_updating("u1", token);
        assert!(cache.stats(&id).is_updating);
        cache.release_updating("u1", fresh);
        assert!(!cache.stats(&id).is_updating);
    }

    #[test]
    fn test_summary_reports_refreshing() {
        let cache = MemoryCache::default();
        cache.get_or_create(&key("a"));
        cache.try_mark_updating("b");

        let summary = cache.summary();
        assert_eq!(summary.identities, 2);
        assert_eq!(summary.refreshing, 1);
        assert!(summary.memory_usage_percent >= 0.0);
    }
}
