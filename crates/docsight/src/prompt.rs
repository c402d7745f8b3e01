use indoc::formatdoc;
use serde::Serialize;

use crate::validator::AnalysisRequest;

pub const SYSTEM_DIRECTIVE: &str = include_str!("prompts/system.md");

/// The exact text sent to the model for one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedPrompt {
    pub system_directive: String,
    pub instruction: String,
}

/// Compose the prompt for a validated request.
///
/// The document text is inserted verbatim, without escaping, between
/// `<document>` delimiters after the action's template.
pub fn build(request: &AnalysisRequest) -> ComposedPrompt {
    let definition = request.action().definition();
    let instruction = formatdoc! {"
        {template}

        Document Content:
        <document>
        {document}
        </document>",
        template = definition.instruction_template.trim_end(),
        document = request.document_text(),
    };

    ComposedPrompt {
        system_directive: SYSTEM_DIRECTIVE.trim_end().to_string(),
        instruction,
    }
}
