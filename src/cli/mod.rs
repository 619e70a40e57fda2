use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Lost & Found chat assistant service", long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Serve HTTPS. Requires --tls-cert-path and --tls-key-path.
    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Path to the TLS certificate file (PEM format).
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Path to the TLS private key file (PEM format).
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    /// Chat requests admitted per second across all clients.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "10")]
    pub rate_limit_per_second: u32,

    /// Largest accepted request body in bytes.
    #[arg(long, env = "MAX_REQUEST_BYTES", default_value = "1048576")]
    pub max_request_bytes: usize,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (groq, openai, ollama)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "groq")]
    pub chat_llm_type: String,

    /// Full chat-completions URL of the provider. Adapters supply a default.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// API Key for the chat provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name (e.g., llama-3.3-70b-versatile, gpt-4o-mini)
    #[arg(long, env = "CHAT_MODEL")]
    pub chat_model: Option<String>,

    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub chat_temperature: f32,

    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "1024")]
    pub chat_max_tokens: u32,

    // --- Item Store Args ---
    /// Where item searches run (supabase, memory)
    #[arg(long, env = "ITEM_STORE_TYPE", default_value = "supabase")]
    pub item_store_type: String,

    /// Project URL of the hosted backend (e.g., https://xyz.supabase.co)
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Anon or service key for the hosted backend.
    #[arg(long, env = "SUPABASE_KEY")]
    pub supabase_key: Option<String>,

    #[arg(long, env = "ITEMS_TABLE", default_value = "items")]
    pub items_table: String,

    /// JSON array of items loaded into the memory store.
    #[arg(long, env = "ITEMS_SEED_PATH")]
    pub items_seed_path: Option<String>,

    // --- Assistant Args ---
    /// Maximum model generations (text or tool-call steps) per request.
    #[arg(long, env = "MAX_STEPS", default_value = "5")]
    pub max_steps: usize,

    /// Items returned by one search (capped at 5).
    #[arg(long, env = "SEARCH_LIMIT", default_value = "5")]
    pub search_limit: usize,

    /// Wall-clock budget for one chat turn.
    #[arg(long, env = "TURN_TIMEOUT_SECS", default_value = "30")]
    pub turn_timeout_secs: u64,

    /// Comma separated pages the assistant may redirect to.
    #[arg(long, env = "ALLOWED_ROUTES", default_value = "/,/report/lost,/report/found,/items,/dashboard")]
    pub allowed_routes: String,

    /// Optional policy file replacing the built-in system prompt. Must contain {routes}.
    #[arg(long, env = "SYSTEM_PROMPT_PATH")]
    pub system_prompt_path: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

/// Terminal front-end for the chat endpoint.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Talk to the Lost & Found assistant from a terminal", long_about = None)]
pub struct ChatArgs {
    #[arg(long, env = "CHAT_ENDPOINT", default_value = "http://127.0.0.1:4000/api/chat")]
    pub endpoint: String,

    /// Ask the server for typed NDJSON frames instead of plain text.
    #[arg(long, env = "STRUCTURED_STREAM", default_value = "false")]
    pub structured: bool,

    /// Page the session starts on.
    #[arg(long, env = "START_PATH", default_value = "/")]
    pub start_path: String,

    #[arg(long, env = "ALLOWED_ROUTES", default_value = "/,/report/lost,/report/found,/items,/dashboard")]
    pub allowed_routes: String,

    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
