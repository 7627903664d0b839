use anyhow::Result;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::pin::Pin;

/// Finite, non-restartable stream of generated text pieces
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Supporting text returned by the knowledge service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Snippet {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }
}

/// Result of a full retrieval (search + generation)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    pub answer: Option<String>,
    pub snippets: Vec<Snippet>,
    pub persona: Option<String>,
}

impl Retrieval {
    /// Answer first, then supporting snippets, capped at `limit`
    pub fn into_contexts(self, limit: usize) -> Vec<String> {
        self.answer
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .chain(self.snippets.into_iter().map(|s| s.text))
            .filter(|c| !c.trim().is_empty())
            .take(limit)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub context: String,
    pub message: String,
}

/// Knowledge/retrieval collaborator ("Brain")
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait BrainProvider: Send + Sync {
    /// Fast, generation-free lookup for the current reply
    async fn quick_search(&self, scope: &str, query: &str) -> Result<Vec<Snippet>>;

    /// Slow lookup with generation, used only to refresh long-term memory
    async fn full_retrieve(&self, scope: &str, query: &str) -> Result<Retrieval>;

    async fn durable_append(&self, scope: &str, content: &str, metadata: Value) -> Result<()>;

    async fn health(&self) -> Result<()>;
}

/// Inference collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<TokenStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_answer_first_and_capped() {
        let retrieval = Retrieval {
            answer: Some("summary".into()),
            snippets: (1..=12).map(|i| Snippet::new(format!("s{}", i))).collect(),
            persona: None,
        };

        let contexts = retrieval.into_contexts(10);
        assert_eq!(contexts.len(), 10);
        assert_eq!(contexts[0], "summary");
        assert_eq!(contexts[1], "s1");
    }

    #[test]
    fn test_contexts_skip_blank_answer() {
        let retrieval = Retrieval {
            answer: Some("  ".into()),
            snippets: vec![Snippet::new("s1"), Snippet::new("")],
            persona: None,
        };

        assert_eq!(retrieval.into_contexts(10), vec!["s1"]);
    }
}
