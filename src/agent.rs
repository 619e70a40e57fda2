use crate::cli::Args;
use crate::config::prompt::SystemPolicy;
use crate::config::routes::RouteTable;
use crate::llm::LlmConfig;
use crate::llm::chat::{
    new_client as new_chat_client,
    BoxError,
    ChatClient,
    ChatRequest,
    ModelEvent,
    ModelMessage,
    ModelStream,
};
use crate::models::chat::{ Role, Turn };
use crate::redirect::{ RedirectSplitter, Segment };
use crate::store::initialize_item_store;
use crate::tools::{ tool_definitions, ToolExecutor };

use futures::{ Stream, StreamExt };
use log::{ debug, error, info, warn };
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_MAX_STEPS: usize = 5;
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(30);

pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't put together an answer just now. Could you rephrase or try again?";

/// What a turn sends towards the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Text(String),
    /// Already validated against the route table. At most one per turn and
    /// always the last event.
    Navigate(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("the model provider rejected the request: {0}")] Upstream(String),
    #[error("turn exceeded its {0:?} time budget")] TimedOut(Duration),
}

pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent, AgentError>> + Send>>;

#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub max_steps: usize,
    pub turn_timeout: Duration,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
        }
    }
}

/// Turns a conversation into a streamed reply, running tool calls in
/// between model generations. Shares nothing mutable between requests.
#[derive(Clone)]
pub struct Assistant {
    chat_client: Arc<dyn ChatClient>,
    tools: ToolExecutor,
    policy: Arc<SystemPolicy>,
    settings: AssistantSettings,
}

impl Assistant {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        tools: ToolExecutor,
        policy: SystemPolicy,
        settings: AssistantSettings
    ) -> Self {
        let settings = AssistantSettings {
            max_steps: settings.max_steps.max(1),
            ..settings
        };
        Self {
            chat_client,
            tools,
            policy: Arc::new(policy),
            settings,
        }
    }

    pub async fn from_args(args: &Args) -> Result<Self, BoxError> {
        let chat_config = LlmConfig {
            llm_type: args.chat_llm_type.parse()?,
            api_key: Some(args.chat_api_key.clone()).filter(|k| !k.is_empty()),
            completion_model: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
            temperature: args.chat_temperature,
            max_tokens: args.chat_max_tokens,
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, URL={}",
            chat_config.llm_type,
            chat_client.get_model(),
            chat_client.get_base_url().as_deref().unwrap_or("adapter default")
        );

        let routes = RouteTable::parse_list(&args.allowed_routes);
        let policy = match &args.system_prompt_path {
            Some(path) => SystemPolicy::load(path, &routes)?,
            None => SystemPolicy::new(&routes),
        };
        let store = initialize_item_store(args)?;
        let tools = ToolExecutor::new(store, routes, args.search_limit);

        Ok(
            Self::new(chat_client, tools, policy, AssistantSettings {
                max_steps: args.max_steps,
                turn_timeout: Duration::from_secs(args.turn_timeout_secs.max(1)),
            })
        )
    }

    pub fn routes(&self) -> &RouteTable {
        self.tools.routes()
    }

    /// Opens the first model generation and hands back the reply stream.
    ///
    /// Fails only if that first call cannot start; anything that goes wrong
    /// afterwards is absorbed into the stream.
    pub async fn start_turn(
        &self,
        request_id: &str,
        turns: &[Turn],
        pathname: Option<&str>
    ) -> Result<TurnStream, AgentError> {
        let deadline = Instant::now() + self.settings.turn_timeout;
        let request = ChatRequest {
            system: self.policy.for_request(pathname),
            messages: turns.iter().map(to_model_message).collect(),
            tools: tool_definitions(),
        };

        let first = match tokio::time::timeout_at(deadline, self.chat_client.stream_chat(&request)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("[{}] Model request failed before streaming: {}", request_id, e);
                return Err(AgentError::Upstream(e.to_string()));
            }
            Err(_) => {
                return Err(AgentError::TimedOut(self.settings.turn_timeout));
            }
        };

        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();
        let request_id = request_id.to_string();
        let budget = self.settings.turn_timeout;

        tokio::spawn(async move {
            let sink = TurnSink::new(tx.clone(), this.routes().clone(), request_id.clone());
            let run = this.run_steps(&request_id, request, first, sink);
            if tokio::time::timeout_at(deadline, run).await.is_err() {
                warn!("[{}] Turn timed out after {:?}, aborting stream", request_id, budget);
                let _ = tx.send(Err(AgentError::TimedOut(budget))).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn run_steps(
        &self,
        request_id: &str,
        mut request: ChatRequest,
        first: ModelStream,
        mut sink: TurnSink
    ) {
        let mut stream = first;
        let mut step = 1;

        loop {
            let mut step_text = String::new();
            let mut calls = Vec::new();
            let mut failed = false;

            while let Some(event) = stream.next().await {
                match event {
                    Ok(ModelEvent::TextDelta(delta)) => {
                        step_text.push_str(&delta);
                        match sink.text(&delta).await {
                            Flow::Continue => {}
                            Flow::Redirected => {
                                info!("[{}] Redirect sent, ending turn", request_id);
                                return;
                            }
                            Flow::Disconnected => {
                                info!("[{}] Client disconnected, stopping turn", request_id);
                                return;
                            }
                        }
                    }
                    Ok(ModelEvent::ToolCall(call)) => calls.push(call),
                    Ok(ModelEvent::Finished(reason)) => {
                        debug!("[{}] Step {} finished: {:?}", request_id, step, reason);
                        break;
                    }
                    Err(e) => {
                        error!("[{}] Model stream failed at step {}: {}", request_id, step, e);
                        failed = true;
                        break;
                    }
                }
            }

            if failed || calls.is_empty() {
                break;
            }

            request.messages.push(ModelMessage::Assistant {
                content: step_text,
                tool_calls: calls.clone(),
            });
            for call in &calls {
                info!("[{}] Tool call {}({})", request_id, call.name, call.arguments);
                let (result, outcome) = self.tools.execute_request(call).await;
                if let Some(path) = outcome.as_ref().and_then(|o| o.accepted_navigation()) {
                    sink.note_navigation(path);
                }
                request.messages.push(ModelMessage::Tool {
                    tool_call_id: call.id.clone(),
                    content: result,
                });
            }

            if step >= self.settings.max_steps {
                warn!(
                    "[{}] Step budget of {} exhausted, ending turn",
                    request_id,
                    self.settings.max_steps
                );
                break;
            }
            step += 1;

            stream = match self.chat_client.stream_chat(&request).await {
                Ok(next) => next,
                Err(e) => {
                    error!("[{}] Model request failed at step {}: {}", request_id, step, e);
                    break;
                }
            };
        }

        sink.finish().await;
    }
}

fn to_model_message(turn: &Turn) -> ModelMessage {
    match turn.role {
        Role::User => ModelMessage::User(turn.content.clone()),
        Role::Assistant =>
            ModelMessage::Assistant {
                content: turn.content.clone(),
                tool_calls: Vec::new(),
            },
    }
}

enum Flow {
    Continue,
    /// The redirect went out; nothing more is sent this turn.
    Redirected,
    Disconnected,
}

/// Per-turn output state: splits control tags out of the model text,
/// tracks whether anything visible was said, and owns the one redirect.
struct TurnSink {
    tx: mpsc::Sender<Result<TurnEvent, AgentError>>,
    routes: RouteTable,
    request_id: String,
    splitter: RedirectSplitter,
    visible: bool,
    navigation: Option<String>,
    redirected: bool,
}

impl TurnSink {
    fn new(tx: mpsc::Sender<Result<TurnEvent, AgentError>>, routes: RouteTable, request_id: String) -> Self {
        Self {
            tx,
            routes,
            request_id,
            splitter: RedirectSplitter::new(),
            visible: false,
            navigation: None,
            redirected: false,
        }
    }

    /// An accepted tag in the model text is forwarded at its position and
    /// ends the turn.
    async fn text(&mut self, delta: &str) -> Flow {
        if self.redirected {
            return Flow::Redirected;
        }
        for segment in self.splitter.push(delta) {
            match segment {
                Segment::Text(text) => {
                    if !self.send_text(text).await {
                        return Flow::Disconnected;
                    }
                }
                Segment::Redirect(raw) => {
                    let Some(path) = self.routes.resolve(&raw).map(str::to_string) else {
                        warn!("[{}] Dropping redirect to unknown path {:?}", self.request_id, raw);
                        continue;
                    };
                    self.note_navigation(&path);
                    return if self.redirect().await { Flow::Redirected } else { Flow::Disconnected };
                }
            }
        }
        Flow::Continue
    }

    /// Sends the pending redirect, preceded by a fallback sentence when
    /// nothing visible was said yet. Returns false once the receiver is gone.
    async fn redirect(&mut self) -> bool {
        let Some(path) = self.navigation.clone() else {
            return true;
        };
        self.redirected = true;
        if !self.visible {
            warn!("[{}] Model produced no visible text, sending fallback", self.request_id);
            if !self.send_text(format!("Taking you to {}.", path)).await {
                return false;
            }
        }
        info!("[{}] Redirecting client to {}", self.request_id, path);
        self.tx.send(Ok(TurnEvent::Navigate(path))).await.is_ok()
    }

    fn note_navigation(&mut self, path: &str) {
        match &self.navigation {
            None => self.navigation = Some(path.to_string()),
            Some(existing) if existing != path =>
                debug!("[{}] Ignoring second redirect {} (keeping {})", self.request_id, path, existing),
            Some(_) => {}
        }
    }

    async fn send_text(&mut self, text: String) -> bool {
        if text.is_empty() {
            return true;
        }
        if !text.trim().is_empty() {
            self.visible = true;
        }
        self.tx.send(Ok(TurnEvent::Text(text))).await.is_ok()
    }

    /// Closes a turn that did not redirect mid-stream. A navigation accepted
    /// by the tool but never tagged in the text goes out here, last.
    async fn finish(mut self) {
        if self.redirected {
            return;
        }
        if let Some(rest) = self.splitter.finish() {
            if !self.send_text(rest).await {
                return;
            }
        }
        if self.navigation.is_some() {
            self.redirect().await;
            return;
        }
        if !self.visible {
            warn!("[{}] Model produced no visible text, sending fallback", self.request_id);
            self.send_text(FALLBACK_REPLY.to_string()).await;
        }
    }
}
