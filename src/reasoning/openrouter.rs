use super::{ReasoningBackend, ReasoningError};
use crate::util::truncate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;

#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// OpenRouter chat completions.
pub struct OpenRouterBackend {
    client: reqwest::Client,
    settings: OpenRouterSettings,
}

impl OpenRouterBackend {
    pub fn new(settings: OpenRouterSettings) -> Result<Self, ReasoningError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ReasoningError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<(u16, String), ReasoningError> {
        let response = self
            .client
            .post(&self.settings.base_url)
            .header("Content-Type", "application/json")
            .header("X-Title", "remedy")
            .header("Authorization", format!("Bearer {}", self.settings.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok((status, text))
    }

    fn transport_error(&self, err: reqwest::Error) -> ReasoningError {
        if err.is_timeout() {
            ReasoningError::Timeout(self.settings.request_timeout.as_secs())
        } else {
            ReasoningError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl ReasoningBackend for OpenRouterBackend {
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, ReasoningError> {
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            stream: false,
        };

        let mut retry_count = 0;
        loop {
            let (status, text) = self.send_once(&request).await?;

            if (200..300).contains(&status) {
                return parse_content(&text);
            }

            if status == 429 {
                if retry_count >= MAX_RETRIES {
                    return Err(ReasoningError::RateLimited {
                        retries: retry_count,
                    });
                }
                retry_count += 1;
                let retry_after = parse_retry_after(&text)
                    .unwrap_or(INITIAL_BACKOFF_MS * BACKOFF_MULTIPLIER.pow(retry_count - 1) / 1000);
                warn!(
                    retry_after_secs = retry_after,
                    attempt = retry_count,
                    max = MAX_RETRIES,
                    "OpenRouter rate limited, backing off"
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                continue;
            }

            return Err(ReasoningError::Http {
                status,
                body: truncate(&text, 200),
            });
        }
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

fn parse_content(text: &str) -> Result<String, ReasoningError> {
    let parsed: ChatResponse = serde_json::from_str(text)
        .map_err(|e| ReasoningError::InvalidResponse(format!("{}: {}", e, truncate(text, 200))))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ReasoningError::InvalidResponse("empty completion".to_string()))
}

/// Extract a retry-after hint ("retry after 12 seconds") from an error body.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_ascii_digit())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"APPROACH: guard\n```ts\nx\n```"}}]}"#;
        assert!(parse_content(body).unwrap().starts_with("APPROACH: guard"));
    }

    #[test]
    fn empty_or_malformed_bodies_are_invalid() {
        assert!(matches!(
            parse_content(r#"{"choices":[]}"#),
            Err(ReasoningError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_content(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(ReasoningError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_content("<html>bad gateway</html>"),
            Err(ReasoningError::InvalidResponse(_))
        ));
    }

    #[test]
    fn retry_after_hint_is_bounded() {
        assert_eq!(parse_retry_after("Please retry after 12 seconds"), Some(12));
        assert_eq!(parse_retry_after("retry in 9000 seconds"), None);
        assert_eq!(parse_retry_after("rate limited"), None);
    }
}
