//! Scripted backend for tests. Responses are picked by a substring of the
//! system prompt, so each fix strategy can be answered differently.

use super::{ReasoningBackend, ReasoningError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct ScriptedBackend {
    rules: Vec<(String, Result<String, ReasoningError>)>,
    fallback: Result<String, ReasoningError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn answering(fallback: &str) -> Self {
        Self {
            rules: Vec::new(),
            fallback: Ok(fallback.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: ReasoningError) -> Self {
        Self {
            rules: Vec::new(),
            fallback: Err(err),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answer prompts whose system text contains `needle`.
    pub fn on(mut self, needle: &str, response: Result<String, ReasoningError>) -> Self {
        self.rules.push((needle.to_string(), response));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn generate(
        &self,
        system: &str,
        _user: &str,
        _max_tokens: u32,
    ) -> Result<String, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.rules
            .iter()
            .find(|(needle, _)| system.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
