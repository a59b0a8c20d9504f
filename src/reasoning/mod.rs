//! Access to the language model that drafts candidate fixes.
//!
//! The pipeline only sees [`ReasoningBackend`]. Every error it returns is
//! handled the same way: the candidate that asked is unusable.

pub mod openrouter;

#[cfg(test)]
pub mod fake;

pub use openrouter::{OpenRouterBackend, OpenRouterSettings};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ReasoningError {
    #[error("reasoning backend unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning request timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// One completion for a system + user prompt pair.
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ReasoningError>;

    fn name(&self) -> &str;
}

/// Stand-in when no credentials are configured. Every call fails, so every
/// defect ends without consensus and no attempt is charged.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ReasoningBackend for UnavailableBackend {
    async fn generate(
        &self,
        _system: &str,
        _user: &str,
        _max_tokens: u32,
    ) -> Result<String, ReasoningError> {
        Err(ReasoningError::Unavailable(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
