#![allow(dead_code)]

use anyhow::Result;
use futures::stream;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use memory_api_server::services::providers::{
    BrainProvider, GenerateRequest, LlmProvider, Retrieval, Snippet, TokenStream,
};

/// Knowledge service fake: counts calls, can hold full retrievals behind a
/// gate and can answer quick searches slowly.
#[derive(Default)]
pub struct FakeBrain {
    pub full_calls: AtomicUsize,
    pub quick_calls: AtomicUsize,
    pub appends: AtomicUsize,
    gate: Option<Arc<Notify>>,
    quick_delay: Option<Duration>,
    quick_snippets: Vec<String>,
    retrieval: Retrieval,
}

impl FakeBrain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full retrievals wait until the returned handle is notified
    pub fn gated(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    pub fn with_quick_delay(mut self, delay: Duration) -> Self {
        self.quick_delay = Some(delay);
        self
    }

    pub fn with_quick_snippets(mut self, snippets: &[&str]) -> Self {
        self.quick_snippets = snippets.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_retrieval(mut self, answer: &str, snippets: &[&str], persona: Option<&str>) -> Self {
        self.retrieval = Retrieval {
            answer: Some(answer.to_string()),
            snippets: snippets.iter().map(|s| Snippet::new(*s)).collect(),
            persona: persona.map(str::to_string),
        };
        self
    }

    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BrainProvider for FakeBrain {
    async fn quick_search(&self, _scope: &str, _query: &str) -> Result<Vec<Snippet>> {
        self.quick_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.quick_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.quick_snippets.iter().map(Snippet::new).collect())
    }

    async fn full_retrieve(&self, _scope: &str, _query: &str) -> Result<Retrieval> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(self.retrieval.clone())
    }

    async fn durable_append(&self, _scope: &str, _content: &str, _metadata: Value) -> Result<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Inference fake replaying fixed pieces; `None` entries become stream errors
pub struct ScriptedLlm {
    pieces: Vec<Option<String>>,
}

impl ScriptedLlm {
    pub fn replying(pieces: &[&str]) -> Self {
        Self {
            pieces: pieces.iter().map(|p| Some(p.to_string())).collect(),
        }
    }

    pub fn failing_after(pieces: &[&str]) -> Self {
        let mut llm = Self::replying(pieces);
        llm.pieces.push(None);
        llm
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    async fn stream_generate(&self, _request: GenerateRequest) -> Result<TokenStream> {
        let items: Vec<Result<String>> = self
            .pieces
            .iter()
            .map(|p| match p {
                Some(text) => Ok(text.clone()),
                None => Err(anyhow::anyhow!("inference connection dropped")),
            })
            .collect();
        Ok(Box::pin(stream::iter(items)))
    }
}
