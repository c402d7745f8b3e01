use std::time::Duration;

use serde::{Deserialize, Serialize};

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    Gemini(GeminiProviderConfig),
    OpenAi(OpenAiProviderConfig),
    Ollama(OllamaProviderConfig),
    Mock(MockProviderConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaProviderConfig {
    pub host: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

/// Offline provider that replays canned analyses word by word.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockProviderConfig {
    /// Pause between fragments
    pub delay: Duration,
}
