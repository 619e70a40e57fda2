//! The two capabilities the model may call: item search and navigation.

use log::{ info, warn };
use serde::{ Deserialize, Deserializer };
use serde_json::json;
use std::sync::Arc;

use crate::config::routes::RouteTable;
use crate::llm::chat::{ ToolCallRequest, ToolDefinition };
use crate::redirect::format_tag;
use crate::store::{ ItemQuery, ItemStore, ItemSummary, ItemType, MAX_SEARCH_RESULTS };

pub const SEARCH_ITEMS: &str = "searchItems";
pub const NAVIGATE: &str = "navigate";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchItemsArgs {
    #[serde(default)]
    pub query: String,
    #[serde(default, rename = "type", deserialize_with = "lenient_item_type")]
    pub item_type: Option<ItemType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NavigateArgs {
    pub path: String,
}

/// Models send `"lost"`, `"LOST"`, `null` or `"ALL"` interchangeably.
fn lenient_item_type<'de, D>(deserializer: D) -> Result<Option<ItemType>, D::Error>
    where D: Deserializer<'de>
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("any") => Ok(None),
        Some(s) => s.parse::<ItemType>().map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    SearchItems(SearchItemsArgs),
    Navigate(NavigateArgs),
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")] UnknownTool(String),
    #[error("invalid arguments for {tool}: {message}")] InvalidArguments {
        tool: &'static str,
        message: String,
    },
}

impl ToolCall {
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
        match name {
            SEARCH_ITEMS =>
                serde_json
                    ::from_str(arguments)
                    .map(ToolCall::SearchItems)
                    .map_err(|e| ToolError::InvalidArguments {
                        tool: SEARCH_ITEMS,
                        message: e.to_string(),
                    }),
            NAVIGATE =>
                serde_json
                    ::from_str(arguments)
                    .map(ToolCall::Navigate)
                    .map_err(|e| ToolError::InvalidArguments {
                        tool: NAVIGATE,
                        message: e.to_string(),
                    }),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::SearchItems(_) => SEARCH_ITEMS,
            ToolCall::Navigate(_) => NAVIGATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Failed(String),
    Empty {
        query: String,
    },
    Matches(Vec<ItemSummary>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigateOutcome {
    Accepted(String),
    Rejected {
        requested: String,
        allowed: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Search(SearchOutcome),
    Navigate(NavigateOutcome),
}

impl ToolOutcome {
    /// The string fed back to the model as the tool result.
    pub fn to_model_text(&self) -> String {
        match self {
            ToolOutcome::Search(SearchOutcome::Failed(message)) =>
                format!("Error: Failed to search. {}", message),
            ToolOutcome::Search(SearchOutcome::Empty { query }) =>
                format!("Search completed. Found 0 items matching \"{}\".", query),
            ToolOutcome::Search(SearchOutcome::Matches(items)) => {
                let json = serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string());
                format!("Found {} items: {}", items.len(), json)
            }
            ToolOutcome::Navigate(NavigateOutcome::Accepted(path)) =>
                format!("Action: Navigating to {}. {}", path, format_tag(path)),
            ToolOutcome::Navigate(NavigateOutcome::Rejected { requested, allowed }) =>
                format!(
                    "Error: \"{}\" is not a page of this site. Valid paths: {}.",
                    requested,
                    allowed
                ),
        }
    }

    pub fn accepted_navigation(&self) -> Option<&str> {
        match self {
            ToolOutcome::Navigate(NavigateOutcome::Accepted(path)) => Some(path),
            _ => None,
        }
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: SEARCH_ITEMS,
            description: "Search for lost or found items in the database",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query (e.g., \"keys\", \"blue wallet\")"
                    },
                    "type": {
                        "type": "string",
                        "enum": ["LOST", "FOUND"],
                        "description": "Only return items reported as lost or as found"
                    }
                },
                "required": ["query"]
            }),
        },
        ToolDefinition {
            name: NAVIGATE,
            description: "Navigate the user to a specific page path",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "The relative URL path to navigate to (e.g., /report/lost)"
                    }
                },
                "required": ["path"]
            }),
        }
    ]
}

/// Runs tool calls. Holds no mutable state, so one executor serves every
/// concurrent conversation.
#[derive(Clone)]
pub struct ToolExecutor {
    store: Arc<dyn ItemStore>,
    routes: RouteTable,
    search_limit: usize,
}

impl ToolExecutor {
    pub fn new(store: Arc<dyn ItemStore>, routes: RouteTable, search_limit: usize) -> Self {
        Self {
            store,
            routes,
            search_limit: search_limit.clamp(1, MAX_SEARCH_RESULTS),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        match call {
            ToolCall::SearchItems(args) => ToolOutcome::Search(self.search(args).await),
            ToolCall::Navigate(args) => ToolOutcome::Navigate(self.navigate(args)),
        }
    }

    /// Parses and runs a raw model request. Parse failures come back as an
    /// error string for the model rather than failing the turn.
    pub async fn execute_request(&self, request: &ToolCallRequest) -> (String, Option<ToolOutcome>) {
        match ToolCall::parse(&request.name, &request.arguments) {
            Ok(call) => {
                let outcome = self.execute(&call).await;
                (outcome.to_model_text(), Some(outcome))
            }
            Err(e) => {
                warn!("Rejected tool call {} ({}): {}", request.name, request.arguments, e);
                (format!("Error: {}", e), None)
            }
        }
    }

    async fn search(&self, args: &SearchItemsArgs) -> SearchOutcome {
        info!(
            "[Tool] Searching for: \"{}\" (Type: {})",
            args.query,
            args.item_type.map(|t| t.as_str()).unwrap_or("ALL")
        );
        let query = ItemQuery::new(args.query.clone(), args.item_type, self.search_limit);
        match self.store.search(&query).await {
            Ok(items) if items.is_empty() => SearchOutcome::Empty { query: query.text },
            Ok(items) => SearchOutcome::Matches(items.iter().map(|i| i.summary()).collect()),
            Err(e) => {
                warn!("Search error: {}", e);
                SearchOutcome::Failed(e.to_string())
            }
        }
    }

    fn navigate(&self, args: &NavigateArgs) -> NavigateOutcome {
        match self.routes.resolve(&args.path) {
            Some(path) => {
                info!("[Tool] Navigate to {} (requested {})", path, args.path);
                NavigateOutcome::Accepted(path.to_string())
            }
            None => {
                warn!("[Tool] Refusing navigation to unknown path {}", args.path);
                NavigateOutcome::Rejected {
                    requested: args.path.clone(),
                    allowed: self.routes.describe(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ Item, ItemCategory, ItemStatus, MemoryItemStore, StoreError };
    use async_trait::async_trait;
    use chrono::{ TimeZone, Utc };

    struct BrokenStore;

    #[async_trait]
    impl ItemStore for BrokenStore {
        async fn search(&self, _query: &ItemQuery) -> Result<Vec<Item>, StoreError> {
            Err(StoreError::Backend { status: 500, message: "connection refused".into() })
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn wallet() -> Item {
        Item {
            id: "1".into(),
            title: "Blue wallet".into(),
            description: Some("leather".into()),
            item_type: ItemType::Lost,
            category: ItemCategory::Other,
            status: ItemStatus::Open,
            location: Some("Library".into()),
            date_incident: None,
            user_id: Some("secret-user".into()),
            image_url: None,
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            deleted_at: None,
        }
    }

    fn executor(store: Arc<dyn ItemStore>) -> ToolExecutor {
        ToolExecutor::new(store, RouteTable::default(), 5)
    }

    #[test]
    fn parses_both_tools() {
        let call = ToolCall::parse(SEARCH_ITEMS, r#"{"query":"keys","type":"lost"}"#).unwrap();
        assert_eq!(
            call,
            ToolCall::SearchItems(SearchItemsArgs {
                query: "keys".into(),
                item_type: Some(ItemType::Lost),
            })
        );
        let call = ToolCall::parse(SEARCH_ITEMS, r#"{"query":"keys","type":null}"#).unwrap();
        assert_eq!(call.name(), SEARCH_ITEMS);

        let call = ToolCall::parse(NAVIGATE, r#"{"path":"/items"}"#).unwrap();
        assert_eq!(call, ToolCall::Navigate(NavigateArgs { path: "/items".into() }));
    }

    #[test]
    fn parse_rejects_unknown_tools_and_bad_args() {
        assert!(matches!(ToolCall::parse("deleteItems", "{}"), Err(ToolError::UnknownTool(_))));
        assert!(
            matches!(ToolCall::parse(NAVIGATE, "{}"), Err(ToolError::InvalidArguments { tool: NAVIGATE, .. }))
        );
        assert!(ToolCall::parse(SEARCH_ITEMS, r#"{"query":"x","type":"STOLEN"}"#).is_err());
    }

    #[tokio::test]
    async fn zero_results_are_distinct_from_errors() {
        let empty = executor(Arc::new(MemoryItemStore::default()));
        let (text, _) = empty.execute_request(&ToolCallRequest {
            id: "c".into(),
            name: SEARCH_ITEMS.into(),
            arguments: r#"{"query":"unicorn"}"#.into(),
        }).await;
        assert_eq!(text, "Search completed. Found 0 items matching \"unicorn\".");

        let broken = executor(Arc::new(BrokenStore));
        let (text, outcome) = broken.execute_request(&ToolCallRequest {
            id: "c".into(),
            name: SEARCH_ITEMS.into(),
            arguments: r#"{"query":"unicorn"}"#.into(),
        }).await;
        assert!(text.starts_with("Error: Failed to search."));
        assert!(text.contains("connection refused"));
        assert!(matches!(outcome, Some(ToolOutcome::Search(SearchOutcome::Failed(_)))));
    }

    #[tokio::test]
    async fn matches_are_projected() {
        let exec = executor(Arc::new(MemoryItemStore::new(vec![wallet()])));
        let outcome = exec.execute(
            &ToolCall::SearchItems(SearchItemsArgs { query: "wallet".into(), item_type: None })
        ).await;
        let text = outcome.to_model_text();
        assert!(text.starts_with("Found 1 items: ["));
        assert!(text.contains("Blue wallet"));
        assert!(!text.contains("secret-user"));
    }

    #[tokio::test]
    async fn navigate_validates_against_routes() {
        let exec = executor(Arc::new(MemoryItemStore::default()));
        let ok = exec.execute(&ToolCall::Navigate(NavigateArgs { path: "/report-lost".into() })).await;
        assert_eq!(ok.accepted_navigation(), Some("/report/lost"));
        assert_eq!(ok.to_model_text(), "Action: Navigating to /report/lost. __REDIRECT:/report/lost__");

        let bad = exec.execute(&ToolCall::Navigate(NavigateArgs { path: "/admin".into() })).await;
        assert!(bad.accepted_navigation().is_none());
        assert!(bad.to_model_text().starts_with("Error: \"/admin\""));
    }

    #[tokio::test]
    async fn malformed_request_becomes_error_text() {
        let exec = executor(Arc::new(MemoryItemStore::default()));
        let (text, outcome) = exec.execute_request(&ToolCallRequest {
            id: "c".into(),
            name: "launchRockets".into(),
            arguments: "{}".into(),
        }).await;
        assert_eq!(text, "Error: unknown tool 'launchRockets'");
        assert!(outcome.is_none());
    }
}
