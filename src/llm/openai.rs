//! OpenAI chat completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConverseError, Result};
use crate::llm::types::Message;
use crate::llm::LlmClient;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Maximum number of attempts for transient errors.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// OpenAI client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.1,
            max_output_tokens: 3072,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Resolves the model from `OPENAI_MODEL`, falling back to the default.
    pub fn model_from_env() -> String {
        std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string())
    }

    pub fn with_sampling(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// OpenAI LLM client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConverseError::llm(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|m| OpenAiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    /// Parses an API error response and returns (error, is_retryable).
    fn parse_error(status: reqwest::StatusCode, body: &str) -> (ConverseError, bool) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return (
                ConverseError::llm("Authentication failed. Check your OPENAI_API_KEY."),
                false,
            );
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return (
                ConverseError::llm("Rate limited. Please wait and try again."),
                true,
            );
        }

        let is_retryable = status.is_server_error();

        if let Ok(error_response) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            return (
                ConverseError::llm(format!(
                    "OpenAI API error: {}",
                    error_response.error.message
                )),
                is_retryable,
            );
        }

        (
            ConverseError::llm(format!("OpenAI API error ({status}): {body}")),
            is_retryable,
        )
    }

    async fn send_once(&self, request: &OpenAiRequest) -> std::result::Result<String, (ConverseError, bool)> {
        let response = self
            .client
            .post(OPENAI_API_URL)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect();
                let error = if e.is_timeout() {
                    ConverseError::llm("Request timed out. Try again.")
                } else if e.is_connect() {
                    ConverseError::llm("Failed to connect to OpenAI API. Check your network.")
                } else {
                    ConverseError::llm(format!("Request failed: {e}"))
                };
                (error, retryable)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| (ConverseError::llm(format!("Failed to read response: {e}")), false))?;

        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }

        let parsed: OpenAiResponse = serde_json::from_str(&body)
            .map_err(|e| (ConverseError::llm(format!("Failed to parse response: {e}")), false))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| (ConverseError::llm("No response from OpenAI"), false))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = OpenAiRequest {
            model: self.config.model.clone(),
            messages: Self::convert_messages(messages),
            temperature: self.config.temperature,
            max_tokens: self.config.max_output_tokens,
        };

        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!(attempt, model = %self.config.model, "OpenAI request");

            match self.send_once(&request).await {
                Ok(content) => return Ok(content),
                Err((error, true)) if attempt < MAX_RETRY_ATTEMPTS => {
                    warn!(attempt, ?delay, error = %error, "OpenAI request failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err((error, _)) => return Err(error),
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OpenAiConfig::new("sk-test", "gpt-4o");
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_output_tokens, 3072);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);

        let config = config.with_sampling(0.5, 512).with_timeout(60);
        assert!((config.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.max_output_tokens, 512);
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_convert_messages() {
        let messages = vec![
            Message::system("TASK: classify_intent"),
            Message::user("show me orders"),
            Message::assistant("{}"),
        ];

        let converted = OpenAiClient::convert_messages(&messages);
        let roles: Vec<_> = converted.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[test]
    fn test_request_serialization() {
        let request = OpenAiRequest {
            model: "gpt-4o".to_string(),
            messages: vec![],
            temperature: 0.1,
            max_tokens: 100,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["max_tokens"], 100);
        assert_eq!(json["model"], "gpt-4o");
    }

    #[test]
    fn test_parse_error_unauthorized() {
        let (error, is_retryable) =
            OpenAiClient::parse_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(error.to_string().contains("Authentication failed"));
        assert!(!is_retryable);
    }

    #[test]
    fn test_parse_error_rate_limited_is_retryable() {
        let (error, is_retryable) =
            OpenAiClient::parse_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(error.to_string().contains("Rate limited"));
        assert!(is_retryable);
    }

    #[test]
    fn test_parse_error_with_message() {
        let body = r#"{"error":{"message":"Invalid API key"}}"#;
        let (error, is_retryable) =
            OpenAiClient::parse_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(error.to_string().contains("Invalid API key"));
        assert!(!is_retryable);
    }
}
