//! Hybrid per-identity memory
//!
//! Short-term exchanges are written on the reply path; long-term context and
//! persona are refreshed by detached background tasks.

mod cache;
mod composer;
mod refresh;
pub mod types;

pub use cache::MemoryCache;
pub use composer::{ComposedContext, ContextComposer};
pub use refresh::{exchange_metadata, NotedExchange, PendingRefresh, RefreshCoordinator};
pub use types::{CacheSummary, IdentityKey, MemoryRecord, MemoryStats, RefreshOutcome};
