use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use config::{Config, Environment};
use docsight::client::{RetryPolicy, DEFAULT_TIMEOUT};
use docsight::providers::{
    configs::{
        GeminiProviderConfig, MockProviderConfig, OllamaProviderConfig, OpenAiProviderConfig,
        ProviderConfig,
    },
    factory::ProviderType,
    gemini, ollama, openai,
};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Gemini {
        #[serde(default = "default_gemini_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_gemini_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Ollama {
        #[serde(default = "default_ollama_host")]
        host: String,
        #[serde(default = "default_ollama_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
    },
    Mock {
        /// Pause between canned fragments, in milliseconds
        #[serde(default)]
        delay_ms: u64,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::Gemini { .. } => ProviderType::Gemini,
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
            ProviderSettings::Ollama { .. } => ProviderType::Ollama,
            ProviderSettings::Mock { .. } => ProviderType::Mock,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Gemini {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Gemini(GeminiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Ollama {
                host,
                model,
                temperature,
                max_tokens,
            } => ProviderConfig::Ollama(OllamaProviderConfig {
                host,
                model,
                temperature,
                max_tokens,
            }),
            ProviderSettings::Mock { delay_ms } => ProviderConfig::Mock(MockProviderConfig {
                delay: Duration::from_millis(delay_ms),
            }),
        }
    }
}

/// Limits applied to every model call.
#[derive(Debug, Deserialize)]
pub struct GenerationSettings {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl GenerationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub generation: GenerationSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => {
                tracing::debug!(
                    provider = %settings.provider.provider_type(),
                    timeout_secs = settings.generation.timeout_secs,
                    max_retries = settings.generation.max_retries,
                    "configuration loaded"
                );
                Ok(settings)
            }
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let message = err.to_string();
                if let Some(field) = missing_field(&message) {
                    // only provider fields are required
                    let path = match field {
                        "provider" | "type" => "provider.type".to_string(),
                        other => format!("provider.{}", other),
                    };
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&path),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

// serde reports "missing field `api_key`"
fn missing_field(message: &str) -> Option<&str> {
    message
        .strip_prefix("missing field `")?
        .split('`')
        .next()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_backoff_ms() -> u64 {
    500
}

fn default_gemini_host() -> String {
    gemini::GEMINI_HOST.to_string()
}

fn default_gemini_model() -> String {
    gemini::GEMINI_MODEL.to_string()
}

fn default_openai_host() -> String {
    openai::OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    openai::OPENAI_MODEL.to_string()
}

fn default_ollama_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_ollama_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}
