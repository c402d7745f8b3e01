use serde::{Deserialize, Serialize};

use crate::action::{self, Action};
use crate::errors::ValidationError;

/// A submission as it arrives off the wire, before any checks.
///
/// Accepts both the browser client's field names (`pdfText`, `action`) and
/// the logical ones (`documentText`, `actionId`). Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRequest {
    #[serde(default, rename = "pdfText", alias = "documentText")]
    pub document_text: Option<String>,
    #[serde(default, rename = "action", alias = "actionId")]
    pub action_id: Option<String>,
}

impl RawRequest {
    pub fn new<S: Into<String>, T: Into<String>>(document_text: S, action_id: T) -> Self {
        Self {
            document_text: Some(document_text.into()),
            action_id: Some(action_id.into()),
        }
    }
}

/// A request that passed validation. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    document_text: String,
    action: Action,
}

impl AnalysisRequest {
    pub fn document_text(&self) -> &str {
        &self.document_text
    }

    pub fn action(&self) -> Action {
        self.action
    }
}

/// Check a raw request. The document is checked before the action, and the
/// first failure wins.
pub fn validate(raw: RawRequest) -> Result<AnalysisRequest, ValidationError> {
    let document_text = match raw.document_text {
        Some(text) if !text.is_empty() => text,
        _ => return Err(ValidationError::EmptyDocument),
    };

    let action_id = raw.action_id.ok_or(ValidationError::UnknownAction(None))?;
    let definition = action::lookup(&action_id)?;

    Ok(AnalysisRequest {
        document_text,
        action: definition.id,
    })
}
