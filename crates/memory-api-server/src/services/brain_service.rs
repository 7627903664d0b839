use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::persona::derive_persona;
use super::providers::{BrainProvider, Retrieval, Snippet};
use crate::config::BrainConfig;

/// Snippet texts kept from a quick search
const QUICK_SNIPPET_LIMIT: usize = 6;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    customer_id: &'a str,
    question: &'a str,
    n_results: usize,
}

#[derive(Debug, Serialize)]
struct IngestRequest<'a> {
    customer_id: &'a str,
    content: &'a str,
    metadata: Value,
}

#[derive(Debug, Default, Deserialize)]
struct BrainResponse {
    #[serde(default)]
    context: Option<Vec<String>>,
    #[serde(default)]
    sources: Option<Vec<Value>>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    persona: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

impl BrainResponse {
    /// Sources as snippets, falling back to the plain `context` list
    fn snippets(&self) -> Vec<Snippet> {
        let from_sources: Vec<Snippet> = self
            .sources
            .iter()
            .flatten()
            .filter_map(|value| serde_json::from_value::<RawSource>(value.clone()).ok())
            .filter_map(|source| {
                let text = source.content.or(source.text)?;
                if text.trim().is_empty() {
                    return None;
                }
                Some(Snippet {
                    text,
                    metadata: source.metadata.unwrap_or_default(),
                })
            })
            .collect();

        if !from_sources.is_empty() {
            return from_sources;
        }

        self.context
            .iter()
            .flatten()
            .filter(|text| !text.trim().is_empty())
            .map(Snippet::new)
            .collect()
    }
}

/// HTTP client for the knowledge service
#[derive(Clone)]
pub struct BrainClient {
    client: Client,
    config: BrainConfig,
}

impl BrainClient {
    pub fn new(config: BrainConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    async fn query(&self, endpoint: &str, scope: &str, question: &str, n_results: usize) -> Result<BrainResponse> {
        let request = QueryRequest {
            customer_id: scope,
            question,
            n_results,
        };

        let response = self
            .client
            .post(self.url(endpoint))
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to connect to brain /{}", endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Brain /{} error ({}): {}", endpoint, status, body);
        }

        response
            .json::<BrainResponse>()
            .await
            .with_context(|| format!("Failed to parse brain /{} response", endpoint))
    }
}

#[async_trait::async_trait]
impl BrainProvider for BrainClient {
    async fn quick_search(&self, scope: &str, query: &str) -> Result<Vec<Snippet>> {
        let response = self.query("search", scope, query, self.config.quick_results).await?;

        let mut snippets = response.snippets();
        snippets.truncate(QUICK_SNIPPET_LIMIT);

        debug!("Quick search in {} returned {} snippets", scope, snippets.len());
        Ok(snippets)
    }

    async fn full_retrieve(&self, scope: &str, query: &str) -> Result<Retrieval> {
        // One pool serves both the long-term snippets and persona sampling
        let pool = self.config.full_results.max(self.config.persona_results);
        let response = self.query("query", scope, query, pool).await?;

        let sources = response.snippets();
        let persona = response
            .persona
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| derive_persona(&sources));

        let mut snippets = sources;
        snippets.truncate(self.config.full_results);

        debug!(
            "Full retrieval in {} returned answer={} snippets={} persona={}",
            scope,
            response.answer.is_some(),
            snippets.len(),
            persona.is_some()
        );

        Ok(Retrieval {
            answer: response.answer,
            snippets,
            persona,
        })
    }

    async fn durable_append(&self, scope: &str, content: &str, metadata: Value) -> Result<()> {
        let request = IngestRequest {
            customer_id: scope,
            content,
            metadata,
        };

        let response = self
            .client
            .post(self.url("ingest"))
            .json(&request)
            .send()
            .await
            .context("Failed to connect to brain /ingest")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Brain /ingest error ({}): {}", status, body);
        }

        debug!("Ingested {} chars into {}", content.len(), scope);
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let response = self
            .client
            .get(self.url("health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Failed to connect to brain /health")?;

        if !response.status().is_success() {
            anyhow::bail!("Brain health check returned {}", response.status());
        }
        Ok(())
    }
}
