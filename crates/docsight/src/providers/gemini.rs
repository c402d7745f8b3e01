use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{Provider, TextStream};
use super::configs::GeminiProviderConfig;
use super::utils::{check_status, text_stream};
use crate::errors::{GenerationError, GenerationResult};
use crate::prompt::ComposedPrompt;

pub const GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_MODEL: &str = "gemini-2.5-flash";

pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, config })
    }

    fn payload(&self, prompt: &ComposedPrompt) -> Value {
        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = self.config.temperature {
            generation_config.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = self.config.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(tokens));
        }

        let mut payload = json!({
            "systemInstruction": { "parts": [{ "text": prompt.system_directive }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt.instruction }] }],
        });
        if !generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(generation_config);
        }
        payload
    }
}

/// Concatenate the text parts of the first candidate in one streamed response.
fn chunk_text(event: &str) -> GenerationResult<(Option<String>, bool)> {
    let chunk: Value = serde_json::from_str(event)
        .map_err(|e| GenerationError::InvalidResponse(format!("{}: {}", e, event)))?;

    if let Some(error) = chunk.get("error") {
        return Err(GenerationError::InvalidResponse(format!(
            "Gemini API error: {}",
            error
        )));
    }

    if let Some(reason) = chunk["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::InvalidResponse(format!(
            "Prompt blocked: {}",
            reason
        )));
    }

    let candidate = &chunk["candidates"][0];
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|part| !part["thought"].as_bool().unwrap_or(false))
                .filter_map(|part| part["text"].as_str())
                .collect()
        })
        .unwrap_or_default();

    Ok((Some(text), false))
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn stream(&self, prompt: &ComposedPrompt) -> GenerationResult<TextStream> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.host.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&self.payload(prompt))
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let response = check_status(response).await?;
        Ok(text_stream(response, chunk_text))
    }
}
