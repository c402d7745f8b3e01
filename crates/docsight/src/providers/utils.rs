use async_stream::try_stream;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::{Stream, StreamExt};
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};

use super::base::TextStream;
use crate::errors::{GenerationError, GenerationResult};
use crate::prompt::ComposedPrompt;

/// Build an OpenAI chat completions payload with streaming enabled
pub fn openai_chat_payload(
    model: &str,
    prompt: &ComposedPrompt,
    temperature: Option<f32>,
    max_tokens: Option<i32>,
) -> Value {
    let mut payload = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": prompt.system_directive },
            { "role": "user", "content": prompt.instruction },
        ],
        "stream": true,
    });

    if let Some(object) = payload.as_object_mut() {
        if let Some(temp) = temperature {
            object.insert("temperature".to_string(), json!(temp));
        }
        if let Some(tokens) = max_tokens {
            object.insert("max_tokens".to_string(), json!(tokens));
        }
    }

    payload
}

/// Read the text delta out of one OpenAI streaming event.
///
/// `[DONE]` ends the stream. An `error` object sent mid-stream is a failure.
pub fn openai_chunk_text(event: &str) -> GenerationResult<(Option<String>, bool)> {
    if event.trim() == "[DONE]" {
        return Ok((None, true));
    }

    let chunk: Value = serde_json::from_str(event)
        .map_err(|e| GenerationError::InvalidResponse(format!("{}: {}", e, event)))?;

    if let Some(error) = chunk.get("error") {
        return Err(GenerationError::InvalidResponse(format!(
            "OpenAI API error: {}",
            error
        )));
    }

    let text = chunk["choices"][0]["delta"]["content"]
        .as_str()
        .map(str::to_string);
    Ok((text, false))
}

/// Map a non-success upstream status to a generation error.
///
/// Throttling is reported separately so logs can tell rate limits apart
/// from outages. Neither is retried here.
pub async fn check_status(response: Response) -> GenerationResult<Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::TOO_MANY_REQUESTS => Err(GenerationError::Throttled),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(GenerationError::Upstream {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Turn an upstream byte stream into a stream of event payloads.
///
/// Only each event's `data` is kept; comments and other fields are dropped.
pub fn sse_events<S, B, E>(body: S) -> impl Stream<Item = GenerationResult<String>> + Send
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    body.eventsource().filter_map(|event| {
        future::ready(match event {
            Ok(event) if event.data.is_empty() => None,
            Ok(event) => Some(Ok(event.data)),
            Err(EventStreamError::Transport(e)) => {
                Some(Err(GenerationError::Request(e.to_string())))
            }
            Err(e) => Some(Err(GenerationError::InvalidResponse(e.to_string()))),
        })
    })
}

/// Parse each event payload with `extract`, which returns the text carried by
/// the event (if any) and whether the event marks the end of the stream.
pub fn text_stream<F>(response: Response, extract: F) -> TextStream
where
    F: FnMut(&str) -> GenerationResult<(Option<String>, bool)> + Send + 'static,
{
    Box::pin(extract_texts(sse_events(response.bytes_stream()), extract))
}

fn extract_texts<S, F>(
    events: S,
    mut extract: F,
) -> impl Stream<Item = GenerationResult<String>> + Send
where
    S: Stream<Item = GenerationResult<String>> + Send,
    F: FnMut(&str) -> GenerationResult<(Option<String>, bool)> + Send,
{
    try_stream! {
        futures::pin_mut!(events);
        while let Some(event) = events.next().await {
            let (text, done) = extract(&event?)?;
            if let Some(text) = text.filter(|t| !t.is_empty()) {
                yield text;
            }
            if done {
                break;
            }
        }
    }
}
