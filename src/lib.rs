pub mod agent;
pub mod cli;
pub mod client;
pub mod config;
pub mod llm;
pub mod models;
pub mod redirect;
pub mod server;
pub mod store;
pub mod tools;

use agent::Assistant;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("provider default"));
    info!("Item Store Type: {}", args.item_store_type);
    info!("Items Table: {}", args.items_table);
    info!("Max Steps: {}", args.max_steps);
    info!("Search Limit: {}", args.search_limit);
    info!("Turn Timeout: {}s", args.turn_timeout_secs);
    info!("Allowed Routes: {}", args.allowed_routes);
    info!("System Prompt: {}", args.system_prompt_path.as_deref().unwrap_or("built-in"));
    info!("Rate Limit: {}/s", args.rate_limit_per_second);
    info!("-------------------------");

    let assistant = Arc::new(Assistant::from_args(&args).await?);
    info!("Starting server on: {}", args.server_addr);
    let server = Server::new(assistant, args);
    server.run().await?;

    Ok(())
}
