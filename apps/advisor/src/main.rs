mod advisor;
mod chat;
mod cli;
mod config;
mod errors;
mod llm_client;
mod routes;
mod state;

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::advisor::controller::ConversationController;
use crate::advisor::store::SessionStore;
use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::llm_client::OpenRouterClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging; stderr keeps stdout clean for chat output
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Career Advisor v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client
    let llm = OpenRouterClient::new(&config.llm)?;
    info!("LLM client initialized (model: {})", llm.model());

    let controller = Arc::new(ConversationController::new(
        Arc::new(llm),
        config.controller_options(),
    ));
    let options = controller.options();
    info!(
        "Controller: malformed policy {}, conversation mode {}, max turns {:?}, request timeout {}s",
        options.malformed_policy,
        options.conversation_mode,
        options.max_turns,
        options.request_timeout.as_secs()
    );

    match cli.command {
        Command::Serve { port } => {
            serve(controller, port.unwrap_or(config.port), config.session_ttl).await
        }
        Command::Chat { message } => {
            let mut stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            chat::run_chat(&controller, message, &mut stdin, &mut stdout).await?;
            Ok(())
        }
    }
}

async fn serve(
    controller: Arc<ConversationController>,
    port: u16,
    session_ttl: Duration,
) -> Result<()> {
    let sessions = SessionStore::new();
    sessions.spawn_sweeper(session_ttl);
    info!("Idle sessions expire after {}s", session_ttl.as_secs());

    let state = AppState {
        sessions,
        controller,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
