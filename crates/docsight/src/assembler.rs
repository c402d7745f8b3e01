//! Consumer side reassembly of streamed fragments.
//!
//! Each message moves `Idle -> Streaming -> Completed | Failed`. Text is the
//! concatenation of fragments in arrival order and is readable at any point,
//! so a presentation layer can re-render after every fragment.
use std::collections::HashMap;

use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::Invocation;
use crate::errors::{AssemblyError, GenerationError, StreamError, TransportError};
use crate::models::fragment::MessageId;
use crate::transport::{FinishReason, StreamPart};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

impl MessageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageState::Completed | MessageState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssembledMessage {
    id: MessageId,
    text: String,
    state: MessageState,
    error: Option<String>,
}

impl AssembledMessage {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            text: String::new(),
            state: MessageState::Idle,
            error: None,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Owns one [`AssembledMessage`] per stream. Messages never share text.
#[derive(Debug, Default)]
pub struct Assembler {
    messages: HashMap<MessageId, AssembledMessage>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, id: MessageId) -> Result<&mut AssembledMessage, AssemblyError> {
        let message = self
            .messages
            .entry(id)
            .or_insert_with(|| AssembledMessage::new(id));
        if message.state.is_terminal() {
            return Err(AssemblyError::AlreadyComplete(id));
        }
        Ok(message)
    }

    /// Register a message before its first fragment arrives.
    pub fn start(&mut self, id: MessageId) -> Result<(), AssemblyError> {
        self.entry(id).map(|_| ())
    }

    pub fn on_fragment(&mut self, id: MessageId, fragment: &str) -> Result<(), AssemblyError> {
        let message = self.entry(id)?;
        message.text.push_str(fragment);
        message.state = MessageState::Streaming;
        Ok(())
    }

    pub fn on_end(&mut self, id: MessageId) -> Result<(), AssemblyError> {
        self.entry(id)?.state = MessageState::Completed;
        Ok(())
    }

    /// Mark the message failed. Text received so far is kept.
    pub fn on_error(&mut self, id: MessageId, error: impl ToString) -> Result<(), AssemblyError> {
        let message = self.entry(id)?;
        message.state = MessageState::Failed;
        message.error = Some(error.to_string());
        Ok(())
    }

    pub fn message(&self, id: MessageId) -> Option<&AssembledMessage> {
        self.messages.get(&id)
    }

    pub fn text(&self, id: MessageId) -> Option<&str> {
        self.message(id).map(AssembledMessage::text)
    }

    /// Hand a message over to the caller, typically once it is complete.
    pub fn take(&mut self, id: MessageId) -> Option<AssembledMessage> {
        self.messages.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Drive decoded protocol parts into `assembler`, calling `observe` after
/// every change.
///
/// Returns the message id once the stream finished cleanly. A remote error
/// part, a transport failure, or an end without a finish part all leave the
/// message `Failed` and come back as the error.
pub async fn assemble<S, F>(
    parts: S,
    assembler: &mut Assembler,
    mut observe: F,
) -> Result<MessageId, StreamError>
where
    S: Stream<Item = Result<StreamPart, TransportError>>,
    F: FnMut(&AssembledMessage),
{
    futures::pin_mut!(parts);
    let mut id = None;
    let mut failure: Option<StreamError> = None;

    while let Some(part) = parts.next().await {
        let current = match (&part, id) {
            (Ok(StreamPart::Start { message_id }), None) => *message_id,
            (_, Some(current)) => current,
            (_, None) => MessageId::new(),
        };
        if id.is_none() {
            assembler.start(current).map_err(late_event)?;
            id = Some(current);
        }

        let applied = match part {
            Ok(StreamPart::Start { .. }) => Ok(()),
            Ok(StreamPart::Text(text)) => assembler.on_fragment(current, &text),
            Ok(StreamPart::Error(message)) => {
                let applied = assembler.on_error(current, &message);
                if applied.is_ok() && failure.is_none() {
                    failure = Some(GenerationError::Remote(message).into());
                }
                applied
            }
            Ok(StreamPart::Finish(reason)) => match (reason, failure.is_some()) {
                (_, true) => Ok(()),
                (FinishReason::Error, false) => {
                    let message = "stream finished with an error";
                    failure = Some(GenerationError::Remote(message.to_string()).into());
                    assembler.on_error(current, message)
                }
                _ => assembler.on_end(current),
            },
            Err(e) => {
                warn!(message_id = %current, error = %e, "stream broke");
                let applied = assembler.on_error(current, &e);
                if applied.is_ok() && failure.is_none() {
                    failure = Some(e.into());
                }
                applied
            }
        };

        if let Err(e) = applied {
            debug!(error = %e, "ignoring event for completed message");
            continue;
        }
        if let Some(message) = assembler.message(current) {
            observe(message);
        }
    }

    let id = match id {
        Some(id) => id,
        None => {
            let id = MessageId::new();
            assembler.on_error(id, TransportError::UnexpectedEof).map_err(late_event)?;
            return Err(TransportError::UnexpectedEof.into());
        }
    };

    if let Some(failure) = failure {
        return Err(failure);
    }
    match assembler.message(id).map(AssembledMessage::state) {
        Some(MessageState::Completed) => Ok(id),
        _ => {
            assembler.on_error(id, TransportError::UnexpectedEof).map_err(late_event)?;
            Err(TransportError::UnexpectedEof.into())
        }
    }
}

/// Assemble an in-process invocation directly, without a wire in between.
pub async fn assemble_invocation<F>(
    invocation: Invocation,
    assembler: &mut Assembler,
    mut observe: F,
) -> Result<MessageId, StreamError>
where
    F: FnMut(&AssembledMessage),
{
    let id = invocation.message_id();
    assembler.start(id).map_err(late_event)?;
    futures::pin_mut!(invocation);

    while let Some(item) = invocation.next().await {
        match item {
            Ok(fragment) => {
                assembler
                    .on_fragment(id, &fragment.text)
                    .map_err(late_event)?;
            }
            Err(e) => {
                assembler.on_error(id, &e).map_err(late_event)?;
                if let Some(message) = assembler.message(id) {
                    observe(message);
                }
                return Err(e.into());
            }
        }
        if let Some(message) = assembler.message(id) {
            observe(message);
        }
    }

    assembler.on_end(id).map_err(late_event)?;
    if let Some(message) = assembler.message(id) {
        observe(message);
    }
    Ok(id)
}

// A fresh message id cannot already be complete, so this only fires if the
// caller reused an assembler entry.
fn late_event(e: AssemblyError) -> StreamError {
    TransportError::Malformed(e.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StreamingClient;
    use crate::prompt::ComposedPrompt;
    use crate::providers::mock::{MockProvider, Step};
    use crate::transport;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Arc;
    use std::time::Duration;

    fn prompt() -> ComposedPrompt {
        ComposedPrompt {
            system_directive: "system".to_string(),
            instruction: "instruction".to_string(),
        }
    }

    #[test]
    fn test_state_machine() {
        let mut assembler = Assembler::new();
        let id = MessageId::new();

        assembler.start(id).unwrap();
        assert_eq!(assembler.message(id).unwrap().state(), MessageState::Idle);

        assembler.on_fragment(id, "Hello").unwrap();
        assert_eq!(assembler.message(id).unwrap().state(), MessageState::Streaming);

        assembler.on_fragment(id, ", world").unwrap();
        assembler.on_end(id).unwrap();
        let message = assembler.message(id).unwrap();
        assert_eq!(message.state(), MessageState::Completed);
        assert_eq!(message.text(), "Hello, world");
        assert!(message.is_complete());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut assembler = Assembler::new();
        let id = MessageId::new();
        assembler.on_fragment(id, "kept").unwrap();
        assembler.on_error(id, "boom").unwrap();

        assert_eq!(
            assembler.on_fragment(id, "late"),
            Err(AssemblyError::AlreadyComplete(id))
        );
        assert_eq!(assembler.on_end(id), Err(AssemblyError::AlreadyComplete(id)));

        let message = assembler.message(id).unwrap();
        assert_eq!(message.state(), MessageState::Failed);
        assert_eq!(message.text(), "kept");
        assert_eq!(message.error(), Some("boom"));
    }

    #[test]
    fn test_end_without_fragments() {
        let mut assembler = Assembler::new();
        let id = MessageId::new();
        assembler.on_end(id).unwrap();
        let message = assembler.message(id).unwrap();
        assert_eq!(message.state(), MessageState::Completed);
        assert_eq!(message.text(), "");
    }

    #[test]
    fn test_messages_do_not_mix() {
        let mut assembler = Assembler::new();
        let a = MessageId::new();
        let b = MessageId::new();
        assembler.on_fragment(a, "a1 ").unwrap();
        assembler.on_fragment(b, "b1 ").unwrap();
        assembler.on_fragment(a, "a2").unwrap();
        assembler.on_fragment(b, "b2").unwrap();

        assert_eq!(assembler.text(a), Some("a1 a2"));
        assert_eq!(assembler.text(b), Some("b1 b2"));

        let taken = assembler.take(a).unwrap();
        assert_eq!(taken.text(), "a1 a2");
        assert!(assembler.message(a).is_none());
        assert_eq!(assembler.len(), 1);
    }

    #[test]
    fn test_concatenation_preserves_every_fragment_once() {
        let fragments: Vec<String> = (0..200).map(|i| format!("<{}>", i)).collect();
        let mut assembler = Assembler::new();
        let id = MessageId::new();
        for fragment in &fragments {
            assembler.on_fragment(id, fragment).unwrap();
        }
        assembler.on_end(id).unwrap();
        assert_eq!(assembler.text(id).unwrap(), fragments.concat());
    }

    #[tokio::test]
    async fn test_assemble_reports_progress() {
        let id = MessageId::new();
        let parts = stream::iter(vec![
            Ok(StreamPart::Start { message_id: id }),
            Ok(StreamPart::Text("## Risk".to_string())),
            Ok(StreamPart::Text(" Analysis Report".to_string())),
            Ok(StreamPart::Finish(FinishReason::Stop)),
        ]);

        let mut assembler = Assembler::new();
        let mut seen = Vec::new();
        let result = assemble(parts, &mut assembler, |m| seen.push(m.text().to_string())).await;

        assert_eq!(result, Ok(id));
        assert_eq!(
            seen,
            vec!["", "## Risk", "## Risk Analysis Report", "## Risk Analysis Report"]
        );
        assert_eq!(assembler.message(id).unwrap().state(), MessageState::Completed);
    }

    #[tokio::test]
    async fn test_assemble_remote_error_keeps_text() {
        let id = MessageId::new();
        let parts = stream::iter(vec![
            Ok(StreamPart::Start { message_id: id }),
            Ok(StreamPart::Text("partial".to_string())),
            Ok(StreamPart::Error("An error occurred.".to_string())),
            Ok(StreamPart::Finish(FinishReason::Error)),
        ]);

        let mut assembler = Assembler::new();
        let result = assemble(parts, &mut assembler, |_| {}).await;

        assert_eq!(
            result,
            Err(StreamError::Generation(GenerationError::Remote(
                "An error occurred.".to_string()
            )))
        );
        let message = assembler.message(id).unwrap();
        assert_eq!(message.state(), MessageState::Failed);
        assert_eq!(message.text(), "partial");
    }

    #[tokio::test]
    async fn test_assemble_transport_failure() {
        let id = MessageId::new();
        let parts = stream::iter(vec![
            Ok(StreamPart::Start { message_id: id }),
            Ok(StreamPart::Text("half".to_string())),
            Err(TransportError::Io("reset".to_string())),
        ]);

        let mut assembler = Assembler::new();
        let result = assemble(parts, &mut assembler, |_| {}).await;

        assert_eq!(
            result,
            Err(StreamError::Transport(TransportError::Io("reset".to_string())))
        );
        assert_eq!(assembler.message(id).unwrap().state(), MessageState::Failed);
        assert_eq!(assembler.text(id), Some("half"));
    }

    #[tokio::test]
    async fn test_assemble_first_failure_wins() {
        let id = MessageId::new();
        let parts = stream::iter(vec![
            Ok(StreamPart::Start { message_id: id }),
            Ok(StreamPart::Text("partial".to_string())),
            Ok(StreamPart::Error("An error occurred.".to_string())),
            Err(TransportError::UnexpectedEof),
        ]);

        let mut assembler = Assembler::new();
        let result = assemble(parts, &mut assembler, |_| {}).await;

        assert_eq!(
            result,
            Err(StreamError::Generation(GenerationError::Remote(
                "An error occurred.".to_string()
            )))
        );
        assert_eq!(
            assembler.message(id).unwrap().error(),
            Some("An error occurred.")
        );
    }

    #[tokio::test]
    async fn test_assemble_keeps_text_decoded_before_a_bad_line() {
        let id = MessageId::new();
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from(format!(
                "{}0:\"F1 \"\n",
                StreamPart::Start { message_id: id }.encode()
            ))),
            Ok(Bytes::from_static(b"0:\"F2 \"\n0:broken\n")),
        ];

        let mut assembler = Assembler::new();
        let result = assemble(transport::decode(stream::iter(chunks)), &mut assembler, |_| {}).await;

        assert!(matches!(
            result,
            Err(StreamError::Transport(TransportError::Malformed(_)))
        ));
        let message = assembler.message(id).unwrap();
        assert_eq!(message.text(), "F1 F2 ");
        assert_eq!(message.state(), MessageState::Failed);
    }

    #[tokio::test]
    async fn test_assemble_without_finish_fails() {
        let id = MessageId::new();
        let parts = stream::iter(vec![
            Ok(StreamPart::Start { message_id: id }),
            Ok(StreamPart::Text("cut".to_string())),
        ]);

        let mut assembler = Assembler::new();
        let result = assemble(parts, &mut assembler, |_| {}).await;
        assert_eq!(result, Err(TransportError::UnexpectedEof.into()));
        assert_eq!(assembler.message(id).unwrap().state(), MessageState::Failed);
    }

    #[tokio::test]
    async fn test_assemble_invocation_in_order() {
        let fragments = ["Contract", " renews", " annually."];
        let client = StreamingClient::new(Arc::new(MockProvider::fragments(fragments)));

        let mut assembler = Assembler::new();
        let id = assemble_invocation(client.invoke(prompt()), &mut assembler, |_| {})
            .await
            .unwrap();

        let message = assembler.take(id).unwrap();
        assert_eq!(message.text(), fragments.concat());
        assert_eq!(message.state(), MessageState::Completed);
        assert!(assembler.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_keeps_delivered_fragments() {
        let provider = MockProvider::steps([
            Step::Text("F1 ".to_string()),
            Step::Text("F2 ".to_string()),
            Step::Pause(Duration::from_secs(30)),
            Step::Text("F3".to_string()),
        ]);
        let client = StreamingClient::new(Arc::new(provider));
        let invocation = client.invoke(prompt());
        let handle = invocation.cancel_handle();

        let mut assembler = Assembler::new();
        let mut delivered = 0;
        let result = assemble_invocation(invocation, &mut assembler, |m| {
            if m.state() == MessageState::Streaming {
                delivered += 1;
                if delivered == 2 {
                    handle.cancel();
                }
            }
        })
        .await;

        assert_eq!(result, Err(GenerationError::Cancelled.into()));
        let id = assembler
            .messages
            .keys()
            .next()
            .copied()
            .unwrap();
        let message = assembler.message(id).unwrap();
        assert_eq!(message.text(), "F1 F2 ");
        assert_eq!(message.state(), MessageState::Failed);
    }
}
