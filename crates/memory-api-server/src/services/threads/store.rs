use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::types::{Role, Thread, ThreadMessage, ThreadSummary};
use crate::config::ThreadConfig;
use crate::utils::{EngineError, EngineResult};

/// Input for [`ThreadStore::create`]
#[derive(Debug, Clone, Default)]
pub struct NewThread {
    pub user_id: String,
    /// Falls back to the user id when absent
    pub knowledge_scope: Option<String>,
    pub behavior_override: Option<String>,
    pub title: Option<String>,
    pub initial_message: Option<String>,
}

/// In-memory thread storage. Reads return snapshots.
#[derive(Clone)]
pub struct ThreadStore {
    threads: Arc<DashMap<String, Thread>>,
    max_messages: usize,
}

impl ThreadStore {
    pub fn new(config: &ThreadConfig) -> Self {
        info!("Initializing thread store (max_messages={})", config.max_messages);
        Self {
            threads: Arc::new(DashMap::new()),
            max_messages: config.max_messages.max(1),
        }
    }

    pub fn create(&self, request: NewThread) -> EngineResult<Thread> {
        let user_id = request.user_id.trim();
        if user_id.is_empty() {
            return Err(EngineError::BadRequest("thread requires a user_id".to_string()));
        }

        let scope = request
            .knowledge_scope
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string());
        let behavior = request.behavior_override.filter(|b| !b.trim().is_empty());

        let mut thread = Thread::new(user_id, scope, behavior, request.title);

        if let Some(initial) = request.initial_message.filter(|m| !m.trim().is_empty()) {
            let message = ThreadMessage::new(
                Role::User,
                initial,
                thread.knowledge_scope.clone(),
                thread.behavior_override.clone(),
            );
            thread.push(message, self.max_messages);
        }

        info!("Created thread {} for user {}", thread.thread_id, thread.user_id);
        self.threads.insert(thread.thread_id.clone(), thread.clone());
        Ok(thread)
    }

    /// Append one message; the oldest messages are evicted past the cap
    pub fn append_message(
        &self,
        thread_id: &str,
        role: Role,
        content: impl Into<String>,
        knowledge_scope: impl Into<String>,
        behavior_override: Option<String>,
    ) -> EngineResult<ThreadMessage> {
        let mut thread = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| not_found(thread_id))?;

        let message = ThreadMessage::new(role, content, knowledge_scope, behavior_override);
        thread.push(message.clone(), self.max_messages);

        debug!(
            "Thread {} now holds {} messages ({} total)",
            thread_id,
            thread.messages.len(),
            thread.message_count
        );
        Ok(message)
    }

    /// Append a user message and its reply under one lock so concurrent
    /// chats on the same thread never interleave their pairs
    pub fn append_exchange(
        &self,
        thread_id: &str,
        user_text: &str,
        assistant_text: &str,
        knowledge_scope: &str,
        behavior_override: Option<String>,
    ) -> EngineResult<()> {
        let mut thread = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| not_found(thread_id))?;

        for (role, content) in [(Role::User, user_text), (Role::Assistant, assistant_text)] {
            let message = ThreadMessage::new(role, content, knowledge_scope, behavior_override.clone());
            thread.push(message, self.max_messages);
        }

        debug!(
            "Thread {} now holds {} messages ({} total)",
            thread_id,
            thread.messages.len(),
            thread.message_count
        );
        Ok(())
    }

    pub fn get(&self, thread_id: &str) -> EngineResult<Thread> {
        self.threads
            .get(thread_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(thread_id))
    }

    /// Thread metadata for one user, most recently updated first
    pub fn list_for_user(&self, user_id: &str) -> Vec<ThreadSummary> {
        let mut threads: Vec<ThreadSummary> = self
            .threads
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().summary())
            .collect();

        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        threads
    }

    /// Owner-only, immediate and irreversible
    pub fn delete(&self, thread_id: &str, user_id: &str) -> EngineResult<()> {
        if self
            .threads
            .remove_if(thread_id, |_, thread| thread.user_id == user_id)
            .is_some()
        {
            info!("Deleted thread {} for user {}", thread_id, user_id);
            return Ok(());
        }

        if self.threads.contains_key(thread_id) {
            Err(EngineError::Unauthorized(format!(
                "thread {} does not belong to user {}",
                thread_id, user_id
            )))
        } else {
            Err(not_found(thread_id))
        }
    }

    /// Messages oldest first, optionally only the last `limit`
    pub fn get_messages(&self, thread_id: &str, limit: Option<usize>) -> EngineResult<Vec<ThreadMessage>> {
        let thread = self.threads.get(thread_id).ok_or_else(|| not_found(thread_id))?;

        let skip = limit
            .map(|l| thread.messages.len().saturating_sub(l))
            .unwrap_or(0);
        let messages = thread.messages.iter().skip(skip).cloned().collect();
        Ok(messages)
    }

    /// Replace the thread's default scope or behavior
    pub fn update_settings(
        &self,
        thread_id: &str,
        knowledge_scope: Option<String>,
        behavior_override: Option<String>,
    ) -> EngineResult<Thread> {
        let mut thread = self
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| not_found(thread_id))?;

        if let Some(scope) = knowledge_scope.filter(|s| !s.trim().is_empty()) {
            thread.knowledge_scope = scope;
        }
        if behavior_override.is_some() {
            thread.behavior_override = behavior_override.filter(|b| !b.trim().is_empty());
        }
        thread.updated_at = Utc::now();

        let snapshot = thread.clone();
        Ok(snapshot)
    }

    pub fn count(&self) -> usize {
        self.threads.len()
    }
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new(&ThreadConfig::default())
    }
}

fn not_found(thread_id: &str) -> EngineError {
    EngineError::NotFound(format!("thread {} not found", thread_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_thread(store: &ThreadStore, user: &str) -> Thread {
        store
            .create(NewThread {
                user_id: user.into(),
                knowledge_scope: Some("work".into()),
                ..NewThread::default()
            })
            .unwrap()
    }

    #[test]
    fn test_create_defaults() {
        let store = ThreadStore::default();
        let thread = store
            .create(NewThread {
                user_id: "u1".into(),
                initial_message: Some("hello".into()),
                ..NewThread::default()
            })
            .unwrap();

        assert_eq!(thread.knowledge_scope, "u1");
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].role, Role::User);
        assert!(uuid::Uuid::parse_str(&thread.thread_id).is_ok());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_create_requires_user() {
        let store = ThreadStore::default();
        let result = store.create(NewThread::default());
        assert!(matches!(result, Err(EngineError::BadRequest(_))));
    }

    #[test]
    fn test_append_unknown_thread() {
        let store = ThreadStore::default();
        let result = store.append_message("missing", Role::User, "hi", "u1", None);
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_fifo_cap_keeps_newest() {
        let store = ThreadStore::new(&ThreadConfig {
            max_messages: 3,
            ..ThreadConfig::default()
        });
        let thread = new_thread(&store, "u1");

        for i in 1..=5 {
            store
                .append_message(&thread.thread_id, Role::User, format!("m{}", i), "work", None)
                .unwrap();
        }

        let contents: Vec<String> = store
            .get_messages(&thread.thread_id, None)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);
        assert_eq!(store.get(&thread.thread_id).unwrap().message_count, 5);
    }

    #[test]
    fn test_concurrent_exchanges_stay_paired() {
        let store = ThreadStore::default();
        let thread = new_thread(&store, "u1");

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let thread_id = thread.thread_id.clone();
                std::thread::spawn(move || {
                    store
                        .append_exchange(&thread_id, &format!("q{}", i), &format!("a{}", i), "work", None)
                        .unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let messages = store.get_messages(&thread.thread_id, None).unwrap();
        assert_eq!(messages.len(), 16);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[0].content.replacen('q', "a", 1), pair[1].content);
        }
    }

    #[test]
    fn test_get_messages_limit() {
        let store = ThreadStore::default();
        let thread = new_thread(&store, "u1");
        for i in 1..=4 {
            store
                .append_message(&thread.thread_id, Role::Assistant, format!("m{}", i), "work", None)
                .unwrap();
        }

        let last_two = store.get_messages(&thread.thread_id, Some(2)).unwrap();
        assert_eq!(last_two[0].content, "m3");
        assert_eq!(last_two[1].content, "m4");
        assert_eq!(store.get_messages(&thread.thread_id, Some(10)).unwrap().len(), 4);
    }

    #[test]
    fn test_list_for_user_sorted_by_update() {
        let store = ThreadStore::default();
        let older = new_thread(&store, "u1");
        let newer = new_thread(&store, "u1");
        new_thread(&store, "u2");

        std::thread::sleep(std::time::Duration::from_millis(5));
        store
            .append_message(&older.thread_id, Role::User, "bump", "work", None)
            .unwrap();

        let listed = store.list_for_user("u1");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].thread_id, older.thread_id);
        assert_eq!(listed[1].thread_id, newer.thread_id);
    }

    #[test]
    fn test_delete_checks_owner() {
        let store = ThreadStore::default();
        let thread = new_thread(&store, "u1");

        let denied = store.delete(&thread.thread_id, "intruder");
        assert!(matches!(denied, Err(EngineError::Unauthorized(_))));
        assert!(store.get(&thread.thread_id).is_ok());

        store.delete(&thread.thread_id, "u1").unwrap();
        assert!(matches!(store.get(&thread.thread_id), Err(EngineError::NotFound(_))));
        assert!(matches!(
            store.delete(&thread.thread_id, "u1"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_update_settings() {
        let store = ThreadStore::default();
        let thread = new_thread(&store, "u1");

        let updated = store
            .update_settings(&thread.thread_id, Some("personal".into()), Some("Be brief".into()))
            .unwrap();
        assert_eq!(updated.knowledge_scope, "personal");
        assert_eq!(updated.behavior_override.as_deref(), Some("Be brief"));
    }
}
