//! The closed set of analysis actions a caller can request.
//!
//! Each [`Action`] maps to a fixed instruction template under `src/prompts`.
//! Adding an action means adding a variant here; every match over the enum
//! is exhaustive so a missing template is a compile error.
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::errors::ValidationError;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Action {
    Summarize,
    ExtractTags,
    RiskScan,
}

/// Shape of the text a template asks the model to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputShape {
    Markdown,
    KeywordList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    pub id: Action,
    pub instruction_template: &'static str,
    pub output: OutputShape,
}

impl Action {
    pub fn definition(self) -> ActionDefinition {
        let (instruction_template, output) = match self {
            Action::Summarize => (include_str!("prompts/summarize.md"), OutputShape::Markdown),
            Action::ExtractTags => (
                include_str!("prompts/extract_tags.md"),
                OutputShape::KeywordList,
            ),
            Action::RiskScan => (include_str!("prompts/risk_scan.md"), OutputShape::Markdown),
        };

        ActionDefinition {
            id: self,
            instruction_template,
            output,
        }
    }

    /// Human readable label, as shown on buttons and in the CLI listing.
    pub fn label(self) -> &'static str {
        match self {
            Action::Summarize => "Summarize Document",
            Action::ExtractTags => "Extract Tags",
            Action::RiskScan => "Risk Scan",
        }
    }
}

/// Resolve a wire id such as `riskScan` to its definition.
pub fn lookup(id: &str) -> Result<ActionDefinition, ValidationError> {
    id.parse::<Action>()
        .map(Action::definition)
        .map_err(|_| ValidationError::UnknownAction(Some(id.to_string())))
}

pub fn all() -> impl Iterator<Item = ActionDefinition> {
    Action::iter().map(Action::definition)
}
