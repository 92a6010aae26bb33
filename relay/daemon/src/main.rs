//! Relay Daemon - Streaming Chat Relay Server and Turn Observer
//!
//! Entry point for the chat relay. By default it serves the HTTP relay
//! endpoint; the `ask` and `history` subcommands drive and inspect turns from
//! the terminal through the turn conductor.
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP relay with defaults
//! relay-daemon
//!
//! # Custom upstream and bind address
//! relay-daemon --upstream-url http://10.0.0.5:8000 --bind 0.0.0.0:3000
//!
//! # With config file
//! relay-daemon --config /etc/chat-relay/relay.toml
//!
//! # Ask a question and watch the thinking steps arrive
//! relay-daemon ask --session demo "What is a stack?"
//!
//! # Show stored turns of a session
//! relay-daemon --history-dir ~/.local/share/chat-relay history --session demo
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use relay_core::{
    default_config_path, load_config_from_path, ChatRelayConfig, CompletedTurn, ConfigOverrides,
    HistoryStore, HttpUpstream, JsonlHistoryStore, MemoryHistoryStore, MessageRole, Relay,
    SessionId, TurnConductor, TurnUpdate,
};

use server::AppState;

/// Relay Daemon - streaming chat relay server
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Upstream chat service base URL
    #[arg(short = 'u', long, value_name = "URL")]
    upstream_url: Option<String>,

    /// Address to listen on
    #[arg(short = 'b', long = "bind", value_name = "ADDR")]
    bind_addr: Option<SocketAddr>,

    /// Directory for JSON-lines session history
    #[arg(long, value_name = "DIR")]
    history_dir: Option<PathBuf>,

    /// Grace delay before the fallback apology, in milliseconds
    #[arg(long, value_name = "MS")]
    fallback_grace_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Subcommands
#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP relay (default)
    Serve,

    /// Submit one turn and print its progress
    Ask {
        /// Session to continue (a new one is created if omitted)
        #[arg(short = 's', long)]
        session: Option<String>,

        /// Bearer token forwarded upstream
        #[arg(long, env = "RELAY_USER_TOKEN")]
        token: Option<String>,

        /// The message
        #[arg(required = true)]
        message: Vec<String>,
    },

    /// Print the stored turns of a session
    History {
        /// Session to show
        #[arg(short = 's', long)]
        session: String,

        /// Print thinking steps too
        #[arg(long)]
        thoughts: bool,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            upstream_url: self.upstream_url.clone(),
            bind_addr: self.bind_addr,
            history_dir: self.history_dir.clone(),
            fallback_grace_ms: self.fallback_grace_ms,
            auth_token: None,
        }
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Pick the history store the configuration asks for
fn history_store(config: &ChatRelayConfig) -> Arc<dyn HistoryStore> {
    match config.history_dir {
        Some(ref dir) => {
            info!(dir = %dir.display(), "Using JSON-lines history store");
            Arc::new(JsonlHistoryStore::new(dir.clone()))
        }
        None => Arc::new(MemoryHistoryStore::new()),
    }
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, initiating shutdown"),
        () = terminate => info!("Received SIGTERM, initiating shutdown"),
    }
}

async fn serve(config: ChatRelayConfig) -> Result<()> {
    let upstream =
        HttpUpstream::new(config.upstream.clone()).context("Failed to create HTTP client")?;
    let relay = Arc::new(Relay::new(upstream, config.relay.clone()));
    let app = server::router(AppState::new(relay, config.turn.max_input_length));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!(
        addr = %config.bind_addr,
        upstream = %config.upstream.base_url,
        "Relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Relay daemon stopped cleanly");
    Ok(())
}

async fn ask(
    config: ChatRelayConfig,
    session: Option<String>,
    token: Option<String>,
    message: &str,
) -> Result<()> {
    let upstream =
        HttpUpstream::new(config.upstream.clone()).context("Failed to create HTTP client")?;
    let conductor = TurnConductor::new(
        Relay::new(upstream, config.relay.clone()),
        history_store(&config),
        config.turn.clone(),
    );

    let session_id = session.map_or_else(SessionId::new, SessionId::from);
    eprintln!("session: {session_id}");

    let mut turn = conductor
        .submit_authenticated_turn(&session_id, message, token)
        .await
        .context("Turn was not accepted")?;

    let done = loop {
        match turn.next_update().await {
            Some(TurnUpdate::Thought { content, .. }) => println!("  ... {content}"),
            Some(TurnUpdate::Completed(done)) => break done,
            // The turn task ended without a terminal update
            None => break turn.finish().await?,
        }
    };

    print_answer(&done);
    Ok(())
}

fn print_answer(done: &CompletedTurn) {
    if !done.resolution.is_answered() {
        warn!(resolution = ?done.resolution, "Turn ended without an answer");
    }
    println!("{}", done.final_content);
}

async fn history(config: ChatRelayConfig, session: String, show_thoughts: bool) -> Result<()> {
    if config.history_dir.is_none() {
        warn!("No history directory configured; history is kept in memory only");
    }
    let store = history_store(&config);
    let turns = store
        .load_turns(&SessionId::from(session))
        .await
        .context("Failed to load history")?;

    for turn in turns {
        println!("{}: {}", role_label(MessageRole::User), turn.user_input);
        if show_thoughts {
            for thought in &turn.thoughts {
                println!("  ... {thought}");
            }
        }
        println!(
            "{}: {}",
            role_label(MessageRole::Assistant),
            turn.assistant_output
        );
        println!();
    }
    Ok(())
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "you",
        MessageRole::Assistant => "ai",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate()?;

    info!(source = %config.source(), "Configuration loaded");

    match args.command {
        None | Some(Command::Serve) => {
            info!("Relay daemon starting");
            info!("Version: {}", env!("CARGO_PKG_VERSION"));
            serve(config).await
        }
        Some(Command::Ask {
            session,
            token,
            message,
        }) => ask(config, session, token, &message.join(" ")).await,
        Some(Command::History { session, thoughts }) => history(config, session, thoughts).await,
    }
}
