#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use chrono::{ Duration, TimeZone, Utc };
use lostfound_assistant::agent::{ Assistant, AssistantSettings };
use lostfound_assistant::config::prompt::SystemPolicy;
use lostfound_assistant::config::routes::RouteTable;
use lostfound_assistant::llm::chat::{
    BoxError,
    ChatClient,
    ChatRequest,
    FinishReason,
    ModelEvent,
    ModelStream,
    ToolCallRequest,
};
use lostfound_assistant::server::api::{ router, AppState };
use lostfound_assistant::store::{ Item, ItemCategory, ItemStatus, ItemType, MemoryItemStore };
use lostfound_assistant::tools::ToolExecutor;
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration as StdDuration;
use std::net::SocketAddr;
use std::sync::{ Arc, Mutex };

/// Stands in for the hosted model: each call to `stream_chat` replays the
/// next scripted step.
#[derive(Default)]
pub struct ScriptedClient {
    steps: Mutex<VecDeque<Vec<ModelEvent>>>,
    requests: Mutex<Vec<ChatRequest>>,
    refuse: bool,
    /// `stream_chat` never returns.
    hang: bool,
    /// Calls (0-based) whose stream stays open after its scripted events.
    stalled: Vec<usize>,
}

impl ScriptedClient {
    pub fn new(steps: Vec<Vec<ModelEvent>>) -> Arc<Self> {
        Arc::new(Self { steps: Mutex::new(steps.into()), ..Self::default() })
    }

    pub fn refusing() -> Arc<Self> {
        Arc::new(Self { refuse: true, ..Self::default() })
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self { hang: true, ..Self::default() })
    }

    pub fn stalling(steps: Vec<Vec<ModelEvent>>, stalled: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            stalled: stalled.to_vec(),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ModelStream, BoxError> {
        if self.refuse {
            return Err("groq API error (401 Unauthorized): invalid api key".into());
        }
        if self.hang {
            return std::future::pending().await;
        }
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let events = self.steps.lock().unwrap().pop_front().unwrap_or_default();
        let scripted = futures::stream::iter(events.into_iter().map(Ok::<ModelEvent, BoxError>));
        if self.stalled.contains(&call) {
            Ok(Box::pin(scripted.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(scripted))
        }
    }

    fn get_model(&self) -> String {
        "scripted".into()
    }

    fn get_base_url(&self) -> Option<String> {
        None
    }
}

pub fn text(s: &str) -> ModelEvent {
    ModelEvent::TextDelta(s.into())
}

pub fn stop() -> ModelEvent {
    ModelEvent::Finished(FinishReason::Stop)
}

pub fn tool(id: &str, name: &str, args: &str) -> ModelEvent {
    ModelEvent::ToolCall(ToolCallRequest { id: id.into(), name: name.into(), arguments: args.into() })
}

pub fn item(id: &str, title: &str, description: &str, item_type: ItemType, hours_ago: i64) -> Item {
    Item {
        id: id.into(),
        title: title.into(),
        description: Some(description.into()),
        item_type,
        category: ItemCategory::Other,
        status: ItemStatus::Open,
        location: Some("Main library".into()),
        date_incident: None,
        user_id: Some("user-1".into()),
        image_url: None,
        created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() - Duration::hours(hours_ago),
        deleted_at: None,
    }
}

/// Two blue wallets, a deleted one, and some noise.
pub fn campus_items() -> Vec<Item> {
    let mut removed = item("3", "Blue wallet", "Reported twice", ItemType::Found, 1);
    removed.deleted_at = Some(Utc.with_ymd_and_hms(2025, 3, 1, 13, 0, 0).unwrap());
    vec![
        item("1", "Blue wallet", "Leather, student card inside", ItemType::Lost, 5),
        item("2", "Wallet", "Small blue wallet near the cafeteria", ItemType::Found, 2),
        removed,
        item("4", "Red umbrella", "Left in lecture hall B", ItemType::Found, 3)
    ]
}

pub fn assistant(client: Arc<ScriptedClient>, items: Vec<Item>) -> Arc<Assistant> {
    let routes = RouteTable::default();
    let tools = ToolExecutor::new(Arc::new(MemoryItemStore::new(items)), routes.clone(), 5);
    Arc::new(Assistant::new(client, tools, SystemPolicy::new(&routes), AssistantSettings::default()))
}

pub fn app(client: Arc<ScriptedClient>, items: Vec<Item>) -> Router {
    router(AppState::new(assistant(client, items), 100, 1024 * 1024))
}

/// Like [`app`] with a short turn budget.
pub fn app_with_timeout(client: Arc<ScriptedClient>, timeout: StdDuration) -> Router {
    let routes = RouteTable::default();
    let tools = ToolExecutor::new(Arc::new(MemoryItemStore::new(vec![])), routes.clone(), 5);
    let settings = AssistantSettings { turn_timeout: timeout, ..AssistantSettings::default() };
    let assistant = Arc::new(Assistant::new(client, tools, SystemPolicy::new(&routes), settings));
    router(AppState::new(assistant, 100, 1024 * 1024))
}

/// Serves `app` on an ephemeral local port and returns the chat URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/chat", addr)
}
