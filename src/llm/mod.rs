//! Language-model boundary.
//!
//! Every model call goes through [`LlmClient::complete`] with messages built
//! from a typed [`LlmTask`]; replies are parsed into the shape that task
//! expects before anything else looks at them.

pub mod factory;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod parser;
pub mod tasks;
pub mod types;

pub use factory::create_client;
pub use gemini::{GeminiClient, GeminiConfig};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, OpenAiConfig};
pub use parser::{extract_sql, parse_json_reply, strip_code_fences};
pub use tasks::{ClassificationReply, GuidanceReply, LlmTask, PromptContext, SuggestionsReply};
pub use types::{Message, Role};

use async_trait::async_trait;
use std::str::FromStr;

use crate::error::{ConverseError, Result};

/// Text-completion capability.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generates a completion for the given messages.
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    OpenAi,
    #[default]
    Gemini,
    /// Deterministic offline client (no API key required).
    Mock,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ConverseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" | "google" => Ok(Self::Gemini),
            "mock" => Ok(Self::Mock),
            _ => Err(ConverseError::config(format!(
                "Unknown LLM provider '{s}'. Expected openai, gemini or mock"
            ))),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
