pub mod settings;

pub use settings::{
    ActivityConfig, BrainConfig, LlmConfig, LogConfig, MemoryConfig, PromptsConfig,
    RefreshQueryPolicy, ServerConfig, Settings, ThreadConfig,
};
