use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub brain: BrainConfig,
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub threads: ThreadConfig,
    pub prompts: PromptsConfig,
    pub activity: ActivityConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// EnvFilter directive, overridden by RUST_LOG
    pub filter: String,
    pub json: bool,
    /// Daily rolling log files are written here when set
    pub directory: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,memory_api_server=debug".to_string(),
            json: true,
            directory: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BrainConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Bound on the quick search issued from the reply path
    pub quick_timeout_ms: u64,
    pub quick_results: usize,
    pub full_results: usize,
    pub persona_results: usize,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_seconds: 30,
            quick_timeout_ms: 800,
            quick_results: 10,
            full_results: 3,
            persona_results: 20,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Drop `<think>...</think>` sections from the token stream
    pub strip_think: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3:14b".to_string(),
            timeout_seconds: 60,
            max_tokens: 1024,
            temperature: 0.7,
            strip_think: true,
        }
    }
}

/// Which query a background refresh sends to full retrieval.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshQueryPolicy {
    /// The exchange that triggered the refresh, captured at trigger time.
    #[default]
    TriggeringExchange,
    /// The most recent short-term exchanges, read when the refresh actually runs.
    LatestExchanges,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub short_term_capacity: usize,
    pub long_term_capacity: usize,
    pub recent_exchanges_in_context: usize,
    pub refresh_timeout_seconds: u64,
    pub max_concurrent_refreshes: usize,
    pub max_concurrent_appends: usize,
    pub persona_ttl_seconds: i64,
    pub refresh_query: RefreshQueryPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 5,
            long_term_capacity: 10,
            recent_exchanges_in_context: 3,
            refresh_timeout_seconds: 60,
            max_concurrent_refreshes: 32,
            max_concurrent_appends: 32,
            persona_ttl_seconds: 600,
            refresh_query: RefreshQueryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ThreadConfig {
    pub max_messages: usize,
    pub history_max_messages: usize,
    pub history_token_budget: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            history_max_messages: 20,
            history_token_budget: 1500,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptsConfig {
    pub system_prompt: String,
    /// Query used for full retrieval when there is no exchange to refresh from
    pub persona_query: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a warm, curious and reliable conversation partner. \
Keep answers short, weave in relevant memories briefly, and ask one focused follow-up question. \
If nothing relevant is remembered, say so briefly."
                .to_string(),
            persona_query: "persona preferences background motivation goals interests tone style \
likes dislikes activities habits summary recent conversations"
                .to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ActivityConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub worker_count: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 1,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name("config/settings").required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }
}
