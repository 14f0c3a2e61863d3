//! opsmind CLI - Interactive REPL for the operations assistant
//!
//! Chats with the assistant (streaming by default), keeps conversations in
//! memory for the session, and runs direct host commands through the same API.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use opsmind::{ApiClient, ChatSession};

mod commands;
mod config;
mod display;
mod repl;

use config::{CliConfig, Overrides};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    /// (default: ~/.config/opsmind/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the assistant API, including the /api prefix
    #[arg(long)]
    base_url: Option<String>,

    /// User id sent with every chat request
    #[arg(long)]
    user_id: Option<String>,

    /// Bearer token (or set OPSMIND_API_TOKEN env var)
    #[arg(long)]
    api_token: Option<String>,

    /// Wait for whole answers instead of streaming them
    #[arg(long)]
    no_stream: bool,
}

/// Logs go to stderr so they never interleave with streamed answers on stdout.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let format = std::env::var("OPSMIND_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("opsmind=warn,opsmind_client=warn,opsmind_cli=warn"));

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = CliConfig::load(args.config.as_deref())?.with_overrides(Overrides {
        base_url: args.base_url,
        user_id: args.user_id,
        api_token: args.api_token,
        no_stream: args.no_stream,
    });

    let client = ApiClient::new(config.client_config()?)
        .context("Failed to create the assistant API client")?;
    tracing::info!(base_url = %config.base_url, stream = config.stream, "Starting opsmind");

    let session = ChatSession::new(client);
    repl::run_repl(&session, &config.history_path(), config.stream).await
}
