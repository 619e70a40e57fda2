use super::compat::CompatChatClient;
use super::BoxError;
use crate::llm::LlmConfig;

pub const DEFAULT_MODEL: &str = "llama3.1";
pub const DEFAULT_URL: &str = "http://localhost:11434/v1/chat/completions";

/// Local Ollama through its OpenAI-compatible endpoint. No key needed.
pub fn from_config(config: &LlmConfig) -> Result<CompatChatClient, BoxError> {
    CompatChatClient::new(
        "ollama",
        config.api_key.clone(),
        config.completion_model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        config.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
        config.temperature,
        config.max_tokens
    )
}
