//! LLM client factory.
//!
//! Centralizes provider-specific logic for creating LLM clients.

use crate::config::LlmConfig;
use crate::error::{ConverseError, Result};
use crate::llm::{
    GeminiClient, GeminiConfig, LlmClient, LlmProvider, MockLlmClient, OpenAiClient, OpenAiConfig,
};

/// Creates an LLM client from the `[llm]` configuration.
///
/// API keys come from the environment (`OPENAI_API_KEY`, `GOOGLE_API_KEY`).
/// The model is resolved in order:
/// 1. `model` in the config file
/// 2. Environment variable (`OPENAI_MODEL` or `GEMINI_MODEL`)
/// 3. The provider default
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    let provider: LlmProvider = config.provider.parse()?;

    match provider {
        LlmProvider::OpenAi => {
            let key = api_key("OPENAI_API_KEY")?;
            let model = config.model.clone().unwrap_or_else(OpenAiConfig::model_from_env);
            let client_config = OpenAiConfig::new(key, model)
                .with_sampling(config.temperature, config.max_output_tokens);
            Ok(Box::new(OpenAiClient::new(client_config)?))
        }
        LlmProvider::Gemini => {
            let key = api_key("GOOGLE_API_KEY")?;
            let model = config.model.clone().unwrap_or_else(GeminiConfig::model_from_env);
            let client_config = GeminiConfig::new(key, model)
                .with_sampling(config.temperature, config.max_output_tokens);
            Ok(Box::new(GeminiClient::new(client_config)?))
        }
        LlmProvider::Mock => Ok(Box::new(MockLlmClient::new())),
    }
}

fn api_key(var: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            ConverseError::config(format!(
                "No API key configured. Set {var} in the environment or a .env file."
            ))
        })
}
