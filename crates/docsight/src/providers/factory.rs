use super::{
    base::Provider, configs::ProviderConfig, gemini::GeminiProvider, mock::MockProvider,
    ollama::OllamaProvider, openai::OpenAiProvider,
};
use anyhow::Result;
use std::sync::Arc;
use strum_macros::{Display, EnumIter};

#[derive(EnumIter, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    Gemini,
    OpenAi,
    Ollama,
    Mock,
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::Gemini(_) => ProviderType::Gemini,
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
            ProviderConfig::Ollama(_) => ProviderType::Ollama,
            ProviderConfig::Mock(_) => ProviderType::Mock,
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Gemini(gemini_config) => Ok(Arc::new(GeminiProvider::new(gemini_config)?)),
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Ollama(ollama_config) => Ok(Arc::new(OllamaProvider::new(ollama_config)?)),
        ProviderConfig::Mock(mock_config) => Ok(Arc::new(MockProvider::new(mock_config))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::configs::{MockProviderConfig, OllamaProviderConfig};
    use crate::providers::ollama::{OLLAMA_HOST, OLLAMA_MODEL};

    #[test]
    fn test_get_provider_matches_config() {
        let provider = get_provider(ProviderConfig::Mock(MockProviderConfig::default())).unwrap();
        assert_eq!(provider.name(), "mock");

        let config = ProviderConfig::Ollama(OllamaProviderConfig {
            host: OLLAMA_HOST.to_string(),
            model: OLLAMA_MODEL.to_string(),
            temperature: None,
            max_tokens: None,
        });
        assert_eq!(config.provider_type(), ProviderType::Ollama);
        assert_eq!(get_provider(config).unwrap().name(), "ollama");
    }

    #[test]
    fn test_provider_type_names() {
        assert_eq!(ProviderType::OpenAi.to_string(), "openai");
        assert_eq!(ProviderType::Gemini.to_string(), "gemini");
    }
}
