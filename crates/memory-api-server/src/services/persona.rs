use std::collections::HashSet;

use super::providers::Snippet;

const MAX_TOTAL: usize = 8;
const MAX_RECENT: usize = 5;
const MAX_OLDER_CHATS: usize = 2;
const DEDUP_PREFIX_CHARS: usize = 80;
const PIECE_CHARS: usize = 400;

fn is_conversation(snippet: &Snippet) -> bool {
    snippet.metadata.get("content_type").and_then(|v| v.as_str()) == Some("chat")
        || snippet.metadata.get("memory_type").and_then(|v| v.as_str()) == Some("conversation")
}

fn timestamp(snippet: &Snippet) -> &str {
    snippet
        .metadata
        .get("timestamp")
        .and_then(|v| v.as_str())
        .unwrap_or("1970-01-01")
}

/// Every `stride`-th element, at most `limit` of them
fn stride_sample(items: &[Snippet], stride: usize, limit: usize) -> impl Iterator<Item = &Snippet> {
    items.iter().step_by(stride.max(1)).take(limit)
}

/// Build a compact persona text from retrieval sources.
///
/// Recent conversations weigh most: the five newest are always taken, then
/// older conversations and other sources are sampled across time until eight
/// pieces are chosen. Near-duplicates (same first 80 chars) are dropped and
/// each piece is cut to 400 chars.
pub fn derive_persona(sources: &[Snippet]) -> Option<String> {
    let (mut chats, mut others): (Vec<Snippet>, Vec<Snippet>) =
        sources.iter().cloned().partition(is_conversation);

    // newest first
    chats.sort_by(|a, b| timestamp(b).cmp(timestamp(a)));
    others.sort_by(|a, b| timestamp(b).cmp(timestamp(a)));

    let mut selected: Vec<&Snippet> = chats.iter().take(MAX_RECENT).collect();

    let older = chats.get(MAX_RECENT..).unwrap_or_default();
    if !older.is_empty() {
        let stride = (older.len() / 2).max(1);
        selected.extend(stride_sample(older, stride, MAX_OLDER_CHATS));
    }

    let remaining = MAX_TOTAL.saturating_sub(selected.len());
    if remaining > 0 && !others.is_empty() {
        let stride = (others.len() / remaining).max(1);
        selected.extend(stride_sample(&others, stride, remaining));
    }

    let mut seen = HashSet::new();
    let pieces: Vec<String> = selected
        .into_iter()
        .map(|s| s.text.trim())
        .filter(|text| !text.is_empty())
        .filter(|text| seen.insert(text.chars().take(DEDUP_PREFIX_CHARS).collect::<String>()))
        .map(|text| text.chars().take(PIECE_CHARS).collect())
        .collect();

    if pieces.is_empty() {
        None
    } else {
        Some(pieces.join("\n\n"))
    }
}
