use async_trait::async_trait;
use futures::stream;
use indoc::indoc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::base::{Provider, TextStream};
use super::configs::MockProviderConfig;
use crate::errors::{GenerationError, GenerationResult};
use crate::prompt::ComposedPrompt;

const CANNED_SUMMARY: &str = indoc! {"
    ## Executive Summary
    The document describes its subject at a high level.

    ## Key Insights
    - **Scope**: The text covers a single topic.

    ## Conclusion
    No further action is required.
"};

const CANNED_TAGS: &str = "#overview, #document, #analysis";

const CANNED_RISKS: &str = indoc! {"
    ## Risk Analysis Report
    - **Contractual**: Terms may renew without explicit review.
    - **Severity**: Medium
"};

/// One step of a scripted reply
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Fail(GenerationError),
    Pause(Duration),
}

#[derive(Debug, Clone)]
enum Script {
    /// Replays the same steps for every call
    Fixed(Vec<Step>),
    /// Picks a canned answer from the prompt's template, split on spaces
    Canned(Duration),
    /// Rejects the call before any text
    Reject(GenerationError),
}

/// A provider that returns pre-configured replies for testing and offline runs
#[derive(Clone)]
pub struct MockProvider {
    script: Script,
    /// Failures returned by the next calls before the script is used
    pending_failures: Arc<Mutex<Vec<GenerationError>>>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<ComposedPrompt>>>,
}

impl MockProvider {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            pending_failures: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn new(config: MockProviderConfig) -> Self {
        Self::with_script(Script::Canned(config.delay))
    }

    /// Reply with these fragments, in order
    pub fn fragments<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Self::steps(fragments.into_iter().map(|f| Step::Text(f.into())))
    }

    pub fn steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self::with_script(Script::Fixed(steps.into_iter().collect()))
    }

    pub fn rejecting(error: GenerationError) -> Self {
        Self::with_script(Script::Reject(error))
    }

    /// Fail the next calls with these errors, in order, before replying normally
    pub fn failing_first(self, errors: impl IntoIterator<Item = GenerationError>) -> Self {
        if let Ok(mut pending) = self.pending_failures.lock() {
            pending.extend(errors);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<ComposedPrompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn canned_steps(prompt: &ComposedPrompt, delay: Duration) -> Vec<Step> {
        let answer = if prompt.instruction.contains("## Risk Analysis Report") {
            CANNED_RISKS
        } else if prompt.instruction.contains("comma-separated") {
            CANNED_TAGS
        } else {
            CANNED_SUMMARY
        };

        let mut steps = Vec::new();
        for word in answer.split_inclusive(' ') {
            if !delay.is_zero() {
                steps.push(Step::Pause(delay));
            }
            steps.push(Step::Text(word.to_string()));
        }
        steps
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stream(&self, prompt: &ComposedPrompt) -> GenerationResult<TextStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }

        let pending = self
            .pending_failures
            .lock()
            .ok()
            .and_then(|mut p| (!p.is_empty()).then(|| p.remove(0)));
        if let Some(error) = pending {
            return Err(error);
        }

        let steps = match &self.script {
            Script::Fixed(steps) => steps.clone(),
            Script::Canned(delay) => Self::canned_steps(prompt, *delay),
            Script::Reject(error) => return Err(error.clone()),
        };

        let replay = stream::unfold(steps.into_iter(), |mut steps| async move {
            loop {
                match steps.next()? {
                    Step::Pause(duration) => tokio::time::sleep(duration).await,
                    Step::Text(text) => return Some((Ok(text), steps)),
                    Step::Fail(error) => return Some((Err(error), Vec::new().into_iter())),
                }
            }
        });

        Ok(Box::pin(replay))
    }
}
