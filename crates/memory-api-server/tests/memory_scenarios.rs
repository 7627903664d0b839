mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeBrain;
use memory_api_server::config::{BrainConfig, MemoryConfig, Settings, ThreadConfig};
use memory_api_server::logging::ActivityLogger;
use memory_api_server::services::memory::{
    ContextComposer, IdentityKey, MemoryCache, RefreshCoordinator, RefreshOutcome,
};
use memory_api_server::services::threads::ThreadStore;
use memory_api_server::utils::Limiters;

fn coordinator(brain: Arc<FakeBrain>, config: &MemoryConfig) -> RefreshCoordinator {
    RefreshCoordinator::new(
        MemoryCache::new(config),
        brain,
        Limiters::new(config),
        ActivityLogger::default(),
        config,
        Settings::default().prompts.persona_query,
    )
}

async fn finish(outcome: RefreshOutcome) {
    if let RefreshOutcome::Scheduled(handle) = outcome {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn three_notes_keep_order_and_schedule_one_refresh() {
    let (brain, gate) = FakeBrain::new()
        .with_retrieval("Enjoys hiking", &["bought boots"], None)
        .gated();
    let brain = Arc::new(brain);
    let config = MemoryConfig::default();
    let refresh = coordinator(brain.clone(), &config);
    let id = IdentityKey::user("u1").unwrap();

    let first = refresh.note_exchange(&id, "q1", "a1");
    let second = refresh.note_exchange(&id, "q2", "a2");
    let third = refresh.note_exchange(&id, "q3", "a3");

    assert!(first.refresh.is_scheduled());
    assert!(matches!(second.refresh, RefreshOutcome::AlreadyInFlight));
    assert!(matches!(third.refresh, RefreshOutcome::AlreadyInFlight));

    let record = refresh.cache().get(&id).unwrap();
    let short_term: Vec<&str> = record.short_term.iter().map(String::as_str).collect();
    assert_eq!(
        short_term,
        vec![
            "User: q1\nAssistant: a1",
            "User: q2\nAssistant: a2",
            "User: q3\nAssistant: a3",
        ]
    );
    assert!(record.is_updating);

    gate.notify_one();
    finish(first.refresh).await;

    assert_eq!(brain.full_calls(), 1);
    let record = refresh.cache().get(&id).unwrap();
    assert_eq!(record.long_term, vec!["Enjoys hiking", "bought boots"]);
    assert!(!record.is_updating);
}

#[tokio::test]
async fn back_to_back_triggers_issue_one_retrieval() {
    let (brain, gate) = FakeBrain::new().gated();
    let brain = Arc::new(brain);
    let refresh = coordinator(brain.clone(), &MemoryConfig::default());
    let id = IdentityKey::new("u1", Some("work".into())).unwrap();

    let first = refresh.trigger_refresh(&id);
    let second = refresh.trigger_refresh(&id);
    assert!(first.is_scheduled());
    assert_eq!(second.as_str(), "already_in_flight");

    gate.notify_one();
    finish(first).await;
    assert_eq!(brain.full_calls(), 1);

    // The guard is released once the refresh finishes
    gate.notify_one();
    let third = refresh.trigger_refresh(&id);
    assert!(third.is_scheduled());
    finish(third).await;
    assert_eq!(brain.full_calls(), 2);
}

#[tokio::test]
async fn global_ceiling_reports_saturation() {
    let (brain, gate) = FakeBrain::new().gated();
    let brain = Arc::new(brain);
    let config = MemoryConfig {
        max_concurrent_refreshes: 1,
        ..MemoryConfig::default()
    };
    let refresh = coordinator(brain.clone(), &config);

    let busy = refresh.trigger_refresh(&IdentityKey::user("a").unwrap());
    let other = refresh.trigger_refresh(&IdentityKey::user("b").unwrap());
    assert!(busy.is_scheduled());
    assert!(matches!(other, RefreshOutcome::Saturated));

    // A saturated identity is not left marked as updating
    let stats = refresh.cache().stats(&IdentityKey::user("b").unwrap());
    assert!(!stats.is_updating);

    gate.notify_one();
    finish(busy).await;
}

#[tokio::test]
async fn memory_stays_within_capacities() {
    let brain = Arc::new(FakeBrain::new().with_retrieval(
        "answer",
        &["s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "s12"],
        None,
    ));
    let config = MemoryConfig::default();
    let refresh = coordinator(brain, &config);
    let id = IdentityKey::user("u1").unwrap();

    for i in 0..12 {
        let noted = refresh.note_exchange(&id, &format!("q{}", i), "a");
        assert!(noted.short_term_entries <= config.short_term_capacity);
        finish(noted.refresh).await;
    }

    let record = refresh.cache().get(&id).unwrap();
    assert_eq!(record.short_term.len(), config.short_term_capacity);
    assert!(record.long_term.len() <= config.long_term_capacity);
    assert_eq!(
        record.short_term.front().map(String::as_str),
        Some("User: q7\nAssistant: a")
    );
}

#[tokio::test]
async fn clear_resets_stats() {
    let brain = Arc::new(FakeBrain::new().with_retrieval("answer", &[], Some("Night owl")));
    let refresh = coordinator(brain, &MemoryConfig::default());
    let id = IdentityKey::user("u1").unwrap();

    let noted = refresh.note_exchange(&id, "q", "a");
    finish(noted.refresh).await;
    assert!(refresh.cache().stats(&id).has_context);

    assert!(refresh.cache().clear(&id));
    let stats = refresh.cache().stats(&id);
    assert!(!stats.has_context);
    assert_eq!(stats.context_length, 0);
    assert_eq!(stats.short_term_entries, 0);
}

#[tokio::test]
async fn scopes_are_isolated() {
    let brain = Arc::new(FakeBrain::new());
    let refresh = coordinator(brain, &MemoryConfig::default());
    let personal = IdentityKey::user("u1").unwrap();
    let work = IdentityKey::new("u1", Some("work".into())).unwrap();

    let noted = refresh.note_exchange(&work, "deadline?", "Friday");
    finish(noted.refresh).await;

    assert_eq!(refresh.cache().stats(&work).short_term_entries, 1);
    assert_eq!(refresh.cache().stats(&personal).short_term_entries, 0);
}

#[tokio::test]
async fn slow_quick_search_degrades_to_cached_memory() {
    let brain = Arc::new(
        FakeBrain::new()
            .with_quick_snippets(&["too late"])
            .with_quick_delay(Duration::from_secs(5)),
    );
    let memory = MemoryConfig::default();
    let refresh = coordinator(brain.clone(), &memory);
    let id = IdentityKey::user("u1").unwrap();

    refresh
        .cache()
        .replace_long_term(&id, vec!["Prefers morning meetings".to_string()]);
    refresh.cache().set_persona(&id, "Product manager");

    let composer = ContextComposer::new(
        refresh.clone(),
        ThreadStore::new(&ThreadConfig::default()),
        brain.clone(),
        ActivityLogger::default(),
        &BrainConfig {
            quick_timeout_ms: 50,
            ..BrainConfig::default()
        },
        &memory,
        &ThreadConfig::default(),
    );

    let started = std::time::Instant::now();
    let context = composer.compose(&id, None, "when should we meet?").await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!context.is_empty());
    assert!(context.used_long_term);
    assert!(!context.used_quick);
    assert!(context.text.contains("Prefers morning meetings"));
    assert!(!context.text.contains("too late"));
}
