use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::GenerationResult;
use crate::prompt::ComposedPrompt;

/// Generated text pieces in the order the upstream model produced them.
pub type TextStream = BoxStream<'static, GenerationResult<String>>;

/// Base trait for generative model providers (Gemini, OpenAI, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider name, used in logs
    fn name(&self) -> &'static str;

    /// Send one streaming generation request for the prompt.
    ///
    /// Resolves once the upstream has accepted the request. Text then flows
    /// through the returned stream until the upstream finishes or fails.
    /// Dropping the stream aborts the upstream call.
    async fn stream(&self, prompt: &ComposedPrompt) -> GenerationResult<TextStream>;
}
