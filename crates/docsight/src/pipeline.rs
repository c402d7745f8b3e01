use tracing::info;

use crate::client::{Invocation, StreamingClient};
use crate::errors::ValidationError;
use crate::prompt;
use crate::validator::{validate, RawRequest};

/// Validates a submission, composes its prompt and starts the model call.
#[derive(Clone)]
pub struct Analyzer {
    client: StreamingClient,
}

impl Analyzer {
    pub fn new(client: StreamingClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &StreamingClient {
        &self.client
    }

    /// Validation failures are returned before anything is sent upstream.
    pub fn analyze(&self, raw: RawRequest) -> Result<Invocation, ValidationError> {
        let request = validate(raw)?;
        let prompt = prompt::build(&request);
        let invocation = self.client.invoke(prompt);

        info!(
            message_id = %invocation.message_id(),
            action = %request.action(),
            document_chars = request.document_text().chars().count(),
            "analysis accepted"
        );

        Ok(invocation)
    }
}
