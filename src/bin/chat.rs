use clap::Parser;
use dotenv::dotenv;
use lostfound_assistant::cli::ChatArgs;
use lostfound_assistant::client::{ ChatSession, ChatView, SessionError };
use lostfound_assistant::config::routes::RouteTable;
use log::info;
use std::error::Error;
use std::io::Write;
use tokio::io::{ AsyncBufReadExt, BufReader };

/// Prints the reply as it grows. Earlier output is never rewritten, so only
/// the part past what was already printed goes to stdout.
#[derive(Default)]
struct TerminalView {
    printed: String,
}

impl TerminalView {
    fn start_turn(&mut self) {
        self.printed.clear();
        print!("assistant> ");
        let _ = std::io::stdout().flush();
    }
}

impl ChatView for TerminalView {
    fn render(&mut self, text: &str) {
        match text.strip_prefix(self.printed.as_str()) {
            Some(rest) => print!("{}", rest),
            None => print!("\nassistant> {}", text),
        }
        self.printed = text.to_string();
        let _ = std::io::stdout().flush();
    }

    fn navigate(&mut self, path: &str) {
        println!("\n[navigated to {}]", path);
    }

    fn show_error(&mut self, message: &str) {
        eprintln!("\n[error] {}", message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let args = ChatArgs::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let routes = RouteTable::parse_list(&args.allowed_routes);
    let mut session = ChatSession::new(args.endpoint.clone(), routes)
        .structured(args.structured)
        .starting_at(args.start_path.clone());
    let mut view = TerminalView::default();
    info!("Chatting with {}", args.endpoint);

    println!("Lost & Found assistant. Ctrl-C cancels a reply, Ctrl-D quits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}> ", session.pathname());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        view.start_turn();
        tokio::select! {
            result = session.send(&line, &mut view) => {
                match result {
                    Ok(_) => println!(),
                    Err(SessionError::EmptyInput) => println!("(nothing to send)"),
                    // Already shown through the view.
                    Err(_) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n[cancelled]");
            }
        }
    }

    println!();
    Ok(())
}
