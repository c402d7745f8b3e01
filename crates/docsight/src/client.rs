//! Streaming invocation of a generative model.
//!
//! [`StreamingClient::invoke`] turns one [`ComposedPrompt`] into an
//! [`Invocation`]: a lazy, single-use stream of [`ResponseFragment`]s that
//! ends normally when the model finishes or with exactly one error when the
//! upstream fails, times out, or is cancelled. Fragments already yielded are
//! never taken back.
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_stream::stream;
use futures::stream::{BoxStream, Stream, StreamExt};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{GenerationError, GenerationResult};
use crate::models::fragment::{MessageId, ResponseFragment};
use crate::prompt::ComposedPrompt;
use crate::providers::base::{Provider, TextStream};

/// Upper bound on a whole generation unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Retries for failures that happen before the first fragment.
///
/// Once any text has been yielded a failure always ends the stream, so a
/// retry can never duplicate partial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn allows(&self, retries_so_far: u32, error: &GenerationError) -> bool {
        !matches!(
            error,
            GenerationError::Cancelled | GenerationError::Timeout(_)
        ) && retries_so_far < self.max_retries
    }

    /// Linear backoff: the first retry waits `backoff`, the second twice that.
    fn delay(&self, retries_so_far: u32) -> Duration {
        self.backoff.saturating_mul(retries_so_far + 1)
    }
}

#[derive(Clone)]
pub struct StreamingClient {
    provider: Arc<dyn Provider>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl StreamingClient {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Start a generation for `prompt`.
    ///
    /// Nothing is sent upstream until the returned stream is first polled.
    pub fn invoke(&self, prompt: ComposedPrompt) -> Invocation {
        let message_id = MessageId::new();
        let cancel = CancellationToken::new();
        let fragments = generate(
            self.provider.clone(),
            prompt,
            message_id,
            self.timeout,
            self.retry,
            cancel.clone(),
        );

        Invocation {
            message_id,
            cancel,
            fragments: fragments.boxed(),
        }
    }
}

/// The output of one model call. Consumed once; a new attempt needs a new
/// call to [`StreamingClient::invoke`].
pub struct Invocation {
    message_id: MessageId,
    cancel: CancellationToken,
    fragments: BoxStream<'static, GenerationResult<ResponseFragment>>,
}

impl Invocation {
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// A handle that stops this invocation from elsewhere, such as the task
    /// watching for a disconnected caller.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for Invocation {
    type Item = GenerationResult<ResponseFragment>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.fragments.as_mut().poll_next(cx)
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        // wake anything still holding a handle; the upstream call itself is
        // aborted when `fragments` drops
        self.cancel.cancel();
    }
}

fn generate(
    provider: Arc<dyn Provider>,
    prompt: ComposedPrompt,
    message_id: MessageId,
    timeout: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
) -> impl Stream<Item = GenerationResult<ResponseFragment>> + Send {
    stream! {
        let deadline = Instant::now() + timeout;
        let mut retries = 0;
        let mut index = 0u64;

        'attempts: loop {
            info!(
                message_id = %message_id,
                provider = provider.name(),
                attempt = retries + 1,
                "opening generation stream"
            );

            let opened: GenerationResult<TextStream> = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(GenerationError::Cancelled),
                _ = sleep_until(deadline) => Err(GenerationError::Timeout(timeout)),
                result = provider.stream(&prompt) => result,
            };

            let mut upstream = match opened {
                Ok(upstream) => upstream,
                Err(e) => {
                    if retry.allows(retries, &e) {
                        warn!(message_id = %message_id, error = %e, "retrying generation");
                        if let Err(e) = backoff(&retry, retries, deadline, timeout, &cancel).await {
                            yield Err(e);
                            return;
                        }
                        retries += 1;
                        continue 'attempts;
                    }
                    yield Err(e);
                    return;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Some(Err(GenerationError::Cancelled)),
                    _ = sleep_until(deadline) => Some(Err(GenerationError::Timeout(timeout))),
                    item = upstream.next() => item,
                };

                match next {
                    Some(Ok(text)) if text.is_empty() => continue,
                    Some(Ok(text)) => {
                        debug!(message_id = %message_id, index, len = text.len(), "fragment");
                        yield Ok(ResponseFragment::new(message_id, index, text));
                        index += 1;
                    }
                    Some(Err(e)) => {
                        if index == 0 && retry.allows(retries, &e) {
                            warn!(message_id = %message_id, error = %e, "retrying generation");
                            drop(upstream);
                            if let Err(e) = backoff(&retry, retries, deadline, timeout, &cancel).await {
                                yield Err(e);
                                return;
                            }
                            retries += 1;
                            continue 'attempts;
                        }
                        yield Err(e);
                        return;
                    }
                    None => {
                        info!(message_id = %message_id, fragments = index, "generation finished");
                        return;
                    }
                }
            }
        }
    }
}

async fn backoff(
    retry: &RetryPolicy,
    retries: u32,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancellationToken,
) -> GenerationResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenerationError::Cancelled),
        _ = sleep_until(deadline) => Err(GenerationError::Timeout(timeout)),
        _ = sleep(retry.delay(retries)) => Ok(()),
    }
}
