use super::compat::CompatChatClient;
use super::BoxError;
use crate::llm::LlmConfig;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub fn from_config(config: &LlmConfig) -> Result<CompatChatClient, BoxError> {
    let api_key = config.api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| "OpenAI API key is required".to_string())?;

    CompatChatClient::new(
        "openai",
        Some(api_key),
        config.completion_model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        config.base_url.clone().unwrap_or_else(|| DEFAULT_URL.to_string()),
        config.temperature,
        config.max_tokens
    )
}
