use anyhow::{Context, Result};
use chrono::Local;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::providers::{GenerateRequest, LlmProvider, TokenStream};
use super::think_filter::strip_think;
use crate::config::LlmConfig;

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    think: bool,
    keep_alive: &'a str,
    options: GenerateOptions,
}

/// One line of the newline-delimited response
#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

enum LineEvent {
    Token(String),
    Done,
    Failed(String),
    Skip,
}

fn parse_line(line: &[u8]) -> LineEvent {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return LineEvent::Skip;
    }

    let chunk: GenerateChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("Skipping malformed generate line: {}", e);
            return LineEvent::Skip;
        }
    };

    if let Some(error) = chunk.error {
        return LineEvent::Failed(error);
    }
    match chunk.response {
        Some(text) if !text.is_empty() => LineEvent::Token(text),
        _ if chunk.done => LineEvent::Done,
        _ => LineEvent::Skip,
    }
}

/// Prompt sent to the model: optional context, today's date, then the message
pub fn build_prompt(context: &str, message: &str) -> String {
    let today = Local::now().format("%Y-%m-%d");
    if context.trim().is_empty() {
        format!("Today's date: {}\n\nUser: {}\nAssistant:", today, message)
    } else {
        format!(
            "Today's date: {}\n\nContext:\n{}\n\nUser: {}\nAssistant:",
            today, context, message
        )
    }
}

/// Streaming client for an Ollama-compatible `/api/generate` endpoint
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    config: LlmConfig,
}

impl OllamaClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaClient {
    async fn stream_generate(&self, request: GenerateRequest) -> Result<TokenStream> {
        let body = OllamaGenerateRequest {
            model: &self.config.model,
            prompt: build_prompt(&request.context, &request.message),
            system: Some(request.system_prompt.as_str()).filter(|s| !s.trim().is_empty()),
            stream: true,
            think: false,
            keep_alive: "10m",
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        debug!(
            "Starting generation with {} (context {} chars)",
            self.config.model,
            request.context.len()
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.config.base_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .context("Failed to call LLM API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {} - {}", status, body);
        }

        let mut bytes = Box::pin(response.bytes_stream());

        let tokens: TokenStream = Box::pin(async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut finished = false;

            while !finished {
                let item = match bytes.next().await {
                    Some(item) => item,
                    None => break,
                };

                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("LLM stream interrupted"));
                        finished = true;
                        continue;
                    }
                };

                buffer.extend_from_slice(&chunk);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    match parse_line(&line) {
                        LineEvent::Token(text) => yield Ok(text),
                        LineEvent::Done => {
                            finished = true;
                            break;
                        }
                        LineEvent::Failed(error) => {
                            yield Err(anyhow::anyhow!("LLM error: {}", error));
                            finished = true;
                            break;
                        }
                        LineEvent::Skip => {}
                    }
                }
            }

            // A last line without a trailing newline
            if !finished {
                match parse_line(&buffer) {
                    LineEvent::Token(text) => yield Ok(text),
                    LineEvent::Failed(error) => yield Err(anyhow::anyhow!("LLM error: {}", error)),
                    LineEvent::Done | LineEvent::Skip => {}
                }
            }
        });

        if self.config.strip_think {
            Ok(strip_think(tokens))
        } else {
            Ok(tokens)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, strip_think: bool) -> OllamaClient {
        OllamaClient::new(LlmConfig {
            base_url: server.uri(),
            strip_think,
            ..LlmConfig::default()
        })
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            system_prompt: "Be kind".into(),
            context: "## Long-term memory\n- likes tea".into(),
            message: "hello".into(),
        }
    }

    async fn collect(stream: TokenStream) -> Result<String> {
        let pieces: Vec<Result<String>> = stream.collect().await;
        pieces.into_iter().collect::<Result<Vec<_>>>().map(|p| p.concat())
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = build_prompt("ctx", "hi");
        assert!(prompt.starts_with("Today's date: "));
        assert!(prompt.contains("Context:\nctx"));
        assert!(prompt.ends_with("User: hi\nAssistant:"));
        assert!(!build_prompt("", "hi").contains("Context:"));
    }

    #[tokio::test]
    async fn test_streams_ndjson_tokens() {
        let server = MockServer::start().await;
        let body = [
            json!({ "response": "Hel", "done": false }).to_string(),
            json!({ "response": "lo", "done": false }).to_string(),
            json!({ "response": "", "done": true }).to_string(),
        ]
        .join("\n");

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "system": "Be kind", "stream": true })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let stream = client(&server, false).stream_generate(request()).await.unwrap();
        assert_eq!(collect(stream).await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_think_sections_removed() {
        let server = MockServer::start().await;
        let body = [
            json!({ "response": "<thi" }).to_string(),
            json!({ "response": "nk>hmm</think>" }).to_string(),
            json!({ "response": "Answer" }).to_string(),
        ]
        .join("\n");

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let stream = client(&server, true).stream_generate(request()).await.unwrap();
        assert_eq!(collect(stream).await.unwrap(), "Answer");
    }

    #[tokio::test]
    async fn test_error_line_fails_stream() {
        let server = MockServer::start().await;
        let body = [
            json!({ "response": "partial" }).to_string(),
            json!({ "error": "model crashed" }).to_string(),
        ]
        .join("\n");

        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let stream = client(&server, false).stream_generate(request()).await.unwrap();
        assert!(collect(stream).await.is_err());
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let result = client(&server, false).stream_generate(request()).await;
        assert!(result.is_err());
    }
}
