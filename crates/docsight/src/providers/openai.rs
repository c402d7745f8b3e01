use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::base::{Provider, TextStream};
use super::configs::OpenAiProviderConfig;
use super::utils::{check_status, openai_chat_payload, openai_chunk_text, text_stream};
use crate::errors::{GenerationError, GenerationResult};
use crate::prompt::ComposedPrompt;

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> anyhow::Result<Self> {
        // Only bound connecting here; the invocation owns the overall deadline
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
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
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let response = check_status(response).await?;
        Ok(text_stream(response, openai_chunk_text))
    }
}
