use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::base::{Provider, TextStream};
use super::configs::OllamaProviderConfig;
use super::utils::{check_status, openai_chat_payload, openai_chunk_text, text_stream};
use crate::errors::{GenerationError, GenerationResult};
use crate::prompt::ComposedPrompt;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";

/// Talks to a local Ollama through its OpenAI compatible endpoint.
pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn stream(&self, prompt: &ComposedPrompt) -> GenerationResult<TextStream> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        let payload = openai_chat_payload(
            &self.config.model,
            prompt,
            self.config.temperature,
            self.config.max_tokens,
        );

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let response = check_status(response).await?;
        Ok(text_stream(response, openai_chunk_text))
    }
}
