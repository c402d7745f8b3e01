use std::any::Any;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use docsight::errors::ValidationError;
use thiserror::Error;

pub const ENV_PREFIX: &str = "DOCSIGHT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration, set {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// `provider.api_key` becomes `DOCSIGHT_PROVIDER__API_KEY`.
pub fn to_env_var(path: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        path.to_uppercase().replace('.', "__")
    )
}

/// Failures returned to HTTP callers before a stream starts.
///
/// Only validation reasons are shown verbatim; everything else is logged and
/// answered with a fixed body.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(e) => {
                tracing::info!(reason = %e, "request rejected");
                (StatusCode::BAD_REQUEST, e.to_string()).into_response()
            }
            ApiError::InvalidBody(e) => {
                tracing::info!(reason = %e.body_text(), "request body rejected");
                (StatusCode::BAD_REQUEST, "Invalid request body").into_response()
            }
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

/// Turns a panicking handler into a logged 500.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };

    ApiError::Internal(anyhow::anyhow!("handler panicked: {}", detail)).into_response()
}
