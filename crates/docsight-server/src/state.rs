use anyhow::Result;
use docsight::client::StreamingClient;
use docsight::pipeline::Analyzer;
use docsight::providers::{configs::ProviderConfig, factory};

use crate::configuration::GenerationSettings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Analyzer,
}

impl AppState {
    pub fn new(provider_config: ProviderConfig, generation: &GenerationSettings) -> Result<Self> {
        let provider = factory::get_provider(provider_config)?;
        let client = StreamingClient::new(provider)
            .with_timeout(generation.timeout())
            .with_retry(generation.retry_policy());

        Ok(Self {
            analyzer: Analyzer::new(client),
        })
    }
}
