pub mod api;

use crate::agent::Assistant;
use crate::cli::Args;
use std::error::Error;
use std::sync::Arc;

pub struct Server {
    assistant: Arc<Assistant>,
    args: Args,
}

impl Server {
    pub fn new(assistant: Arc<Assistant>, args: Args) -> Self {
        Self { assistant, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(&self.args, self.assistant.clone()).await
    }
}
