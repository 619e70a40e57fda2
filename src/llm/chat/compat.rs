//! OpenAI-compatible `/chat/completions` streaming with tool calls.
//!
//! Groq, OpenAI and Ollama all speak this wire format; the provider modules
//! only differ in defaults.

use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use super::{
    create_streaming_response,
    BoxError,
    ChatClient,
    ChatRequest,
    FinishReason,
    ModelEvent,
    ModelMessage,
    ModelStream,
    ToolCallRequest,
    ToolDefinition,
};

pub struct CompatChatClient {
    http: HttpClient,
    provider: &'static str,
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum WireMessage<'a> {
    System {
        content: &'a str,
    },
    User {
        content: &'a str,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<&'a str>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall<'a>>,
    },
    Tool {
        tool_call_id: &'a str,
        content: &'a str,
    },
}

#[derive(Serialize)]
struct WireToolCall<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall<'a>,
}

#[derive(Serialize)]
struct WireFunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<JsonValue>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<DeltaFunction>,
}

#[derive(Deserialize)]
struct DeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn build_wire_request<'a>(
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    request: &'a ChatRequest
) -> WireRequest<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(WireMessage::System { content: request.system.as_str() });
    for message in &request.messages {
        let wire = match message {
            ModelMessage::User(content) => WireMessage::User { content: content.as_str() },
            ModelMessage::Assistant { content, tool_calls } =>
                WireMessage::Assistant {
                    content: if content.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(content.as_str())
                    },
                    tool_calls: tool_calls
                        .iter()
                        .map(|call| WireToolCall {
                            id: call.id.as_str(),
                            kind: "function",
                            function: WireFunctionCall {
                                name: call.name.as_str(),
                                arguments: call.arguments.as_str(),
                            },
                        })
                        .collect(),
                },
            ModelMessage::Tool { tool_call_id, content } =>
                WireMessage::Tool {
                    tool_call_id: tool_call_id.as_str(),
                    content: content.as_str(),
                },
        };
        messages.push(wire);
    }

    let tools: Vec<WireTool<'a>> = request.tools
        .iter()
        .map(|function| WireTool { kind: "function", function })
        .collect();
    let tool_choice = if tools.is_empty() { None } else { Some("auto") };

    WireRequest {
        model,
        messages,
        tools,
        tool_choice,
        temperature,
        max_tokens,
        stream: true,
    }
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Turns SSE bytes into [`ModelEvent`]s.
///
/// Lines may be split across network chunks, and tool calls arrive as
/// fragments keyed by `index`; both are buffered here.
#[derive(Default)]
pub struct CompatStreamParser {
    line_buf: Vec<u8>,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finished: bool,
}

impl CompatStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ModelEvent>, BoxError> {
        self.line_buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.line_buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end_matches(['\n', '\r']), &mut events)?;
        }
        Ok(events)
    }

    /// Flushes a trailing unterminated line and any tool calls never closed
    /// by a `finish_reason`.
    pub fn finish(&mut self) -> Result<Vec<ModelEvent>, BoxError> {
        let mut events = Vec::new();
        if !self.line_buf.is_empty() {
            let rest = std::mem::take(&mut self.line_buf);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.handle_line(line.trim_end_matches('\r'), &mut events)?;
        }
        if !self.finished {
            let reason = if self.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            };
            self.finish_with(reason, &mut events);
        }
        Ok(events)
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<ModelEvent>) -> Result<(), BoxError> {
        if line.is_empty() || line.starts_with(':') || self.finished {
            return Ok(());
        }
        let Some(data) = line.strip_prefix("data:") else {
            debug!("Ignoring non-data SSE line: {}", line);
            return Ok(());
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            let reason = if self.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            };
            self.finish_with(reason, events);
            return Ok(());
        }

        let chunk = match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Failed to parse stream chunk: {}, error: {}", data, e);
                return Ok(());
            }
        };
        if let Some(err) = chunk.error {
            return Err(format!("provider stream error: {}", err).into());
        }

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    events.push(ModelEvent::TextDelta(content));
                }
            }
            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                let partial = self.tool_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    partial.id = Some(id);
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_with(FinishReason::from_wire(&reason), events);
            }
        }
        Ok(())
    }

    fn finish_with(&mut self, reason: FinishReason, events: &mut Vec<ModelEvent>) {
        if self.finished {
            return;
        }
        for (index, partial) in std::mem::take(&mut self.tool_calls) {
            if partial.name.is_empty() {
                warn!("Dropping tool call #{} without a function name", index);
                continue;
            }
            events.push(
                ModelEvent::ToolCall(ToolCallRequest {
                    id: partial.id.unwrap_or_else(|| format!("call_{}", index)),
                    name: partial.name,
                    arguments: if partial.arguments.trim().is_empty() {
                        "{}".to_string()
                    } else {
                        partial.arguments
                    },
                })
            );
        }
        events.push(ModelEvent::Finished(reason));
        self.finished = true;
    }
}

impl CompatChatClient {
    pub fn new(
        provider: &'static str,
        api_key: Option<String>,
        model: String,
        url: String,
        temperature: f32,
        max_tokens: u32
    ) -> Result<Self, BoxError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e|
                    format!("Invalid API key format: {}", e)
                )?
            );
        }

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as BoxError)?;

        Ok(Self {
            http,
            provider,
            model,
            url,
            temperature,
            max_tokens,
        })
    }
}

#[async_trait]
impl ChatClient for CompatChatClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ModelStream, BoxError> {
        let wire = build_wire_request(&self.model, self.temperature, self.max_tokens, request);
        info!(
            "Starting {} stream request to {} ({} messages, {} tools)",
            self.provider,
            self.url,
            wire.messages.len(),
            wire.tools.len()
        );

        let resp = self.http.post(&self.url).json(&wire).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("{} API error ({}): {}", self.provider, status, body.trim()).into());
        }

        let provider = self.provider;
        Ok(
            create_streaming_response(move |tx| async move {
                let mut parser = CompatStreamParser::new();
                let mut bytes = resp.bytes_stream();

                while let Some(chunk) = bytes.next().await {
                    let events = match chunk {
                        Ok(buf) => parser.push_bytes(&buf),
                        Err(e) => Err(Box::new(e) as BoxError),
                    };
                    match events {
                        Ok(events) => {
                            for event in events {
                                if tx.send(Ok(event)).await.is_err() {
                                    debug!("{} stream consumer went away", provider);
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                    if parser.is_finished() {
                        return;
                    }
                }

                match parser.finish() {
                    Ok(events) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                    }
                }
            })
        )
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(parser: &mut CompatStreamParser, parts: &[&str]) -> Vec<ModelEvent> {
        let mut out = Vec::new();
        for part in parts {
            out.extend(parser.push_bytes(part.as_bytes()).unwrap());
        }
        out.extend(parser.finish().unwrap());
        out
    }

    #[test]
    fn text_deltas_survive_split_lines() {
        let mut parser = CompatStreamParser::new();
        let events = feed(&mut parser, &[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Sear\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"ching...\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n",
        ]);
        assert_eq!(events, vec![
            ModelEvent::TextDelta("Sear".into()),
            ModelEvent::TextDelta("ching...".into()),
            ModelEvent::Finished(FinishReason::Stop)
        ]);
    }

    #[test]
    fn tool_call_fragments_are_reassembled() {
        let mut parser = CompatStreamParser::new();
        let events = feed(&mut parser, &[
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"function\":{\"name\":\"searchItems\",\"arguments\":\"{\\\"query\\\":\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"blue wallet\\\"}\"}}]}}]}\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n",
        ]);
        assert_eq!(events, vec![
            ModelEvent::ToolCall(ToolCallRequest {
                id: "call_a".into(),
                name: "searchItems".into(),
                arguments: "{\"query\":\"blue wallet\"}".into(),
            }),
            ModelEvent::Finished(FinishReason::ToolCalls)
        ]);
    }

    #[test]
    fn stream_without_finish_reason_still_finishes() {
        let mut parser = CompatStreamParser::new();
        let events = feed(&mut parser, &["data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}"]);
        assert_eq!(events, vec![
            ModelEvent::TextDelta("hi".into()),
            ModelEvent::Finished(FinishReason::Stop)
        ]);
    }

    #[test]
    fn in_band_error_is_reported() {
        let mut parser = CompatStreamParser::new();
        let result = parser.push_bytes(b"data: {\"error\":{\"message\":\"rate limited\"}}\n");
        assert!(result.is_err());
    }

    #[test]
    fn wire_request_carries_tools_and_history() {
        let request = ChatRequest {
            system: "policy".into(),
            messages: vec![
                ModelMessage::User("find my keys".into()),
                ModelMessage::Assistant {
                    content: String::new(),
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".into(),
                        name: "searchItems".into(),
                        arguments: "{\"query\":\"keys\"}".into(),
                    }],
                },
                ModelMessage::Tool { tool_call_id: "call_1".into(), content: "Found 0 items".into() }
            ],
            tools: vec![ToolDefinition {
                name: "navigate",
                description: "go",
                parameters: json!({"type": "object"}),
            }],
        };
        let wire = serde_json::to_value(build_wire_request("m", 0.7, 1024, &request)).unwrap();

        assert_eq!(wire["stream"], json!(true));
        assert_eq!(wire["tool_choice"], json!("auto"));
        assert_eq!(wire["messages"][0], json!({"role": "system", "content": "policy"}));
        assert_eq!(wire["messages"][2]["role"], json!("assistant"));
        assert!(wire["messages"][2].get("content").is_none());
        assert_eq!(wire["messages"][2]["tool_calls"][0]["function"]["name"], json!("searchItems"));
        assert_eq!(wire["messages"][3], json!({"role": "tool", "tool_call_id": "call_1", "content": "Found 0 items"}));
        assert_eq!(wire["tools"][0]["type"], json!("function"));
        assert_eq!(wire["tools"][0]["function"]["name"], json!("navigate"));
    }
}
