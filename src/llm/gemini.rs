//! Google Gemini client (`generateContent`).
//!
//! Gemini takes the system prompt as a separate `systemInstruction` and names
//! the assistant role `model`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ConverseError, Result};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const MAX_RETRY_ATTEMPTS: u32 = 3;

const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Gemini client configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 3072,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Resolves the model from `GEMINI_MODEL`, falling back to the default.
    pub fn model_from_env() -> String {
        std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string())
    }

    pub fn with_sampling(mut self, temperature: f32, max_output_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_output_tokens = max_output_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!("{GEMINI_API_BASE}/{}:generateContent", self.model)
    }
}

/// Gemini LLM client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConverseError::llm(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn build_request(&self, messages: &[Message]) -> GeminiRequest {
        let system_text = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| GeminiContent {
                role: Some(if m.role == Role::Assistant { "model" } else { "user" }.to_string()),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GeminiRequest {
            system_instruction: (!system_text.is_empty()).then(|| GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: system_text }],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                top_k: self.config.top_k,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }

    /// Parses an API error response and returns (error, is_retryable).
    fn parse_error(status: reqwest::StatusCode, body: &str) -> (ConverseError, bool) {
        let retryable =
            status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return (
                ConverseError::llm("Authentication failed. Check your GOOGLE_API_KEY."),
                false,
            );
        }

        match serde_json::from_str::<GeminiErrorResponse>(body) {
            Ok(parsed) => (
                ConverseError::llm(format!("Gemini API error: {}", parsed.error.message)),
                retryable,
            ),
            Err(_) => (
                ConverseError::llm(format!("Gemini API error ({status}): {body}")),
                retryable,
            ),
        }
    }

    fn extract_text(response: GeminiResponse) -> Result<String> {
        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| content.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ConverseError::llm("Empty response from Gemini"));
        }
        Ok(text)
    }

    async fn send_once(
        &self,
        request: &GeminiRequest,
    ) -> std::result::Result<String, (ConverseError, bool)> {
        let response = self
            .client
            .post(self.config.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let retryable = e.is_timeout() || e.is_connect();
                (ConverseError::llm(format!("Request failed: {e}")), retryable)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| (ConverseError::llm(format!("Failed to read response: {e}")), false))?;

        if !status.is_success() {
            return Err(Self::parse_error(status, &body));
        }

        let parsed: GeminiResponse = serde_json::from_str(&body)
            .map_err(|e| (ConverseError::llm(format!("Failed to parse response: {e}")), false))?;

        Self::extract_text(parsed).map_err(|e| (e, false))
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = self.build_request(messages);
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
        let mut attempt = 1;

        loop {
            debug!(attempt, model = %self.config.model, "Gemini request");

            match self.send_once(&request).await {
                Ok(text) => return Ok(text),
                Err((error, true)) if attempt < MAX_RETRY_ATTEMPTS => {
                    warn!(attempt, ?delay, error = %error, "Gemini request failed, retrying");
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
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client() -> GeminiClient {
        GeminiClient::new(GeminiConfig::new("test-key", "gemini-1.5-flash")).unwrap()
    }

    #[test]
    fn test_request_splits_system_and_maps_roles() {
        let request = client().build_request(&[
            Message::system("TASK: general_answer"),
            Message::user("what is a foreign key?"),
            Message::assistant("A reference."),
            Message::user("thanks"),
        ]);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "TASK: general_answer"
        );
        let roles: Vec<_> = json["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 3072);
    }

    #[test]
    fn test_request_without_system_omits_instruction() {
        let request = client().build_request(&[Message::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_extract_text_joins_parts() {
        let response: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"SELECT "},{"text":"1"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(GeminiClient::extract_text(response).unwrap(), "SELECT 1");

        let empty: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(GeminiClient::extract_text(empty).is_err());
    }

    #[test]
    fn test_parse_error() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let (error, retryable) = GeminiClient::parse_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(error.to_string().contains("API key not valid"));
        assert!(!retryable);

        let (_, retryable) =
            GeminiClient::parse_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(retryable);
    }
}
