//! Wire format between the pipeline and its consumers.
//!
//! Streams use the Vercel AI SDK data stream protocol (v1): one line per
//! part, a single character type code, a colon, then a JSON value.
//!
//! ```text
//! f:{"messageId":"msg-..."}
//! 0:"## Risk Analysis Report\n"
//! 0:"- **Severity**: Low\n"
//! d:{"finishReason":"stop","usage":{"promptTokens":0,"completionTokens":0}}
//! ```
//!
//! A failure mid-stream is sent as `3:"An error occurred."` followed by a
//! `d:` part with `finishReason` `error`, so "done" and "failed" are never
//! confused. A stream that stops without any `d:` part was cut off.
use async_stream::stream;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::client::Invocation;
use crate::errors::TransportError;
use crate::models::fragment::MessageId;

/// Header announcing the protocol to clients
pub const STREAM_PROTOCOL_HEADER: &str = "x-vercel-ai-data-stream";
pub const STREAM_PROTOCOL_VERSION: &str = "v1";

/// The only failure text that leaves the server.
pub const GENERIC_ERROR: &str = "An error occurred.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Error,
    /// Any other reason a producer may send, such as `length`
    Other,
}

impl FinishReason {
    fn parse(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "error" => FinishReason::Error,
            _ => FinishReason::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPart {
    Start { message_id: MessageId },
    Text(String),
    Error(String),
    Finish(FinishReason),
}

// Protocol-specific message formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_start(message_id: &MessageId) -> String {
        // Step starts begin with "f:"
        format!("f:{}\n", json!({ "messageId": message_id.to_string() }))
    }

    fn format_text(text: &str) -> String {
        format!("0:{}\n", Value::String(text.to_string()))
    }

    fn format_error(message: &str) -> String {
        format!("3:{}\n", Value::String(message.to_string()))
    }

    fn format_finish(reason: FinishReason) -> String {
        // Finish messages start with "d:"
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": 0,
                "completionTokens": 0
            }
        });
        format!("d:{}\n", finish)
    }
}

impl StreamPart {
    /// One complete protocol line, newline included.
    pub fn encode(&self) -> String {
        match self {
            StreamPart::Start { message_id } => ProtocolFormatter::format_start(message_id),
            StreamPart::Text(text) => ProtocolFormatter::format_text(text),
            StreamPart::Error(message) => ProtocolFormatter::format_error(message),
            StreamPart::Finish(reason) => ProtocolFormatter::format_finish(*reason),
        }
    }

    /// Parse one line (without its newline). Unknown type codes are skipped.
    pub fn decode(line: &str) -> Result<Option<StreamPart>, TransportError> {
        let (code, payload) = line
            .split_once(':')
            .ok_or_else(|| TransportError::Malformed(line.to_string()))?;
        let malformed =
            |e: serde_json::Error| TransportError::Malformed(format!("{}: {}", e, line));

        let part = match code {
            "f" => {
                let value: Value = serde_json::from_str(payload).map_err(malformed)?;
                let message_id = value["messageId"]
                    .as_str()
                    .and_then(|id| id.parse().ok())
                    .ok_or_else(|| TransportError::Malformed(line.to_string()))?;
                StreamPart::Start { message_id }
            }
            "0" => StreamPart::Text(serde_json::from_str(payload).map_err(malformed)?),
            "3" => StreamPart::Error(serde_json::from_str(payload).map_err(malformed)?),
            "d" => {
                let value: Value = serde_json::from_str(payload).map_err(malformed)?;
                let reason = value["finishReason"]
                    .as_str()
                    .map(FinishReason::parse)
                    .ok_or_else(|| TransportError::Malformed(line.to_string()))?;
                StreamPart::Finish(reason)
            }
            code if code.len() == 1 => return Ok(None),
            _ => return Err(TransportError::Malformed(line.to_string())),
        };

        Ok(Some(part))
    }
}

/// The parts for one invocation, in order: start, a text part per fragment,
/// then either a clean finish or a generic error and an error finish.
///
/// Failure detail is logged here and never put on the wire.
pub fn parts(invocation: Invocation) -> impl Stream<Item = StreamPart> + Send {
    stream! {
        let message_id = invocation.message_id();
        yield StreamPart::Start { message_id };

        let mut invocation = invocation;
        while let Some(item) = invocation.next().await {
            match item {
                Ok(fragment) => yield StreamPart::Text(fragment.text),
                Err(e) => {
                    error!(message_id = %message_id, error = %e, "generation failed");
                    yield StreamPart::Error(GENERIC_ERROR.to_string());
                    yield StreamPart::Finish(FinishReason::Error);
                    return;
                }
            }
        }

        yield StreamPart::Finish(FinishReason::Stop);
    }
}

/// Encode an invocation into protocol lines, one per part, produced lazily.
pub fn encode(invocation: Invocation) -> impl Stream<Item = String> + Send {
    parts(invocation).map(|part| part.encode())
}

/// Incremental decoder for the receiving side.
///
/// A line that fails to decode does not discard the parts completed before
/// it: `push` returns those and holds the error until [`take_error`] or the
/// next call.
///
/// [`take_error`]: StreamDecoder::take_error
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    // prefix of `buffer` known to hold no newline
    scanned: usize,
    finished: bool,
    error: Option<TransportError>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The decode failure held back by the last `push`, if any.
    pub fn take_error(&mut self) -> Option<TransportError> {
        self.error.take()
    }

    /// Feed bytes as they arrive; returns the parts completed by this chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamPart>, TransportError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let mut line = self.buffer[start..end].to_vec();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            start = end + 1;
            self.scanned = start;

            match self.decode_line(line) {
                Ok(Some(part)) => parts.push(part),
                Ok(None) => {}
                Err(e) => {
                    self.error = Some(e);
                    self.buffer.clear();
                    self.scanned = 0;
                    return Ok(parts);
                }
            }
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        Ok(parts)
    }

    /// Called at end of input. Any unterminated line is decoded first; a
    /// stream without a finish part is an error.
    pub fn finish(&mut self) -> Result<Vec<StreamPart>, TransportError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let mut parts = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            if let Some(part) = self.decode_line(line)? {
                parts.push(part);
            }
        }
        if !self.finished {
            return Err(TransportError::UnexpectedEof);
        }
        Ok(parts)
    }

    fn decode_line(&mut self, line: Vec<u8>) -> Result<Option<StreamPart>, TransportError> {
        let line =
            String::from_utf8(line).map_err(|e| TransportError::Malformed(e.to_string()))?;
        if line.trim().is_empty() {
            return Ok(None);
        }
        if self.finished {
            return Err(TransportError::Malformed(format!(
                "data after finish: {}",
                line
            )));
        }

        let part = StreamPart::decode(&line)?;
        if matches!(part, Some(StreamPart::Finish(_))) {
            self.finished = true;
        }
        Ok(part)
    }
}

/// Decode a byte stream, such as an HTTP response body, into parts.
///
/// Ends after the finish part, or with a single [`TransportError`] that
/// follows every part decoded before the failure.
pub fn decode<S, E>(body: S) -> impl Stream<Item = Result<StreamPart, TransportError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::fmt::Display + Send,
{
    stream! {
        futures::pin_mut!(body);
        let mut decoder = StreamDecoder::new();

        while let Some(chunk) = body.next().await {
            let decoded = match chunk {
                Ok(bytes) => decoder.push(&bytes),
                Err(e) => Err(TransportError::Io(e.to_string())),
            };
            match decoded {
                Ok(parts) => {
                    for part in parts {
                        yield Ok(part);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
            if let Some(e) = decoder.take_error() {
                yield Err(e);
                return;
            }
            if decoder.is_finished() {
                return;
            }
        }

        match decoder.finish() {
            Ok(parts) => {
                for part in parts {
                    yield Ok(part);
                }
            }
            Err(e) => yield Err(e),
        }
    }
}
