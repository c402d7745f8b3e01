use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::fragment::MessageId;

/// Structural problems with an incoming request, detected before any model call.
///
/// The display strings are the reasons returned to the caller verbatim.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum ValidationError {
    #[error("No PDF text provided")]
    EmptyDocument,

    #[error("Invalid action")]
    UnknownAction(Option<String>),
}

/// Failures while talking to the generative model.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream throttled the request")]
    Throttled,

    #[error("Invalid upstream payload: {0}")]
    InvalidResponse(String),

    #[error("Generation exceeded {0:?}")]
    Timeout(Duration),

    #[error("Generation cancelled")]
    Cancelled,

    /// Reported by the far end of a stream; the detail stays on that side.
    #[error("Remote generation failed: {0}")]
    Remote(String),
}

/// Failures of the incremental channel between producer and consumer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Malformed stream frame: {0}")]
    Malformed(String),

    #[error("Stream ended before a finish frame")]
    UnexpectedEof,

    #[error("Stream read failed: {0}")]
    Io(String),
}

/// Anything that can end a consumed stream early.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// An event arrived for a message that already reached a terminal state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("Message {0} is already complete")]
    AlreadyComplete(MessageId),
}

pub type GenerationResult<T> = Result<T, GenerationError>;
