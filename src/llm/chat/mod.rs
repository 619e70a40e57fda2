pub mod compat;
pub mod groq;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use futures::{ Future, Stream };
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ LlmConfig, LlmType };

pub type BoxError = Box<dyn StdError + Send + Sync>;

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, BoxError>> + Send>>;

/// A function the model may call, described by a JSON schema.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments exactly as the model produced them.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelMessage {
    User(String),
    Assistant {
        content: String,
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// What a model generation step yields, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    TextDelta(String),
    ToolCall(ToolCallRequest),
    Finished(FinishReason),
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts one generation step. An `Err` here means the provider refused
    /// the request before producing anything.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ModelStream, BoxError>;

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> ModelStream
    where
        F: FnOnce(mpsc::Sender<Result<ModelEvent, BoxError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, BoxError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Groq => Arc::new(groq::from_config(config)?),
        LlmType::OpenAI => Arc::new(openai::from_config(config)?),
        LlmType::Ollama => Arc::new(ollama::from_config(config)?),
    };
    Ok(client)
}
