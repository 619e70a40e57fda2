use super::compat::CompatChatClient;
use super::BoxError;
use crate::llm::LlmConfig;

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub fn from_config(config: &LlmConfig) -> Result<CompatChatClient, BoxError> {
    let api_key = config.api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| "Groq API key is required".to_string())?;

    CompatChatClient::new(
        "groq",
        Some(api_key),
        config.completion_model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        config.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
        config.temperature,
        config.max_tokens
    )
}
