// ABOUTME: Main entry point for the natter persona chat bot
// ABOUTME: Initializes logging, config, persona, memory and backend, then chats on the console

use anyhow::{Context, Result};
use clap::Parser;
use natter::{app::App, config::Config, paths, BackendRegistry, ConsoleSurface};
use natter_core::traits::ChatSurface;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "natter", version, about = "Persona chat bot for the terminal")]
struct Cli {
    /// Path to config.toml (defaults to NATTER_CONFIG_PATH, ./config.toml, then the XDG config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Character card to load, overriding persona.character_path
    #[arg(long)]
    character: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Also write logs to a daily rolling file in the data directory
    #[arg(long)]
    log_file: bool,

    /// Disable idle chatter regardless of config
    #[arg(long)]
    no_chatter: bool,
}

/// Logs go to stderr so they never interleave with the chat on stdout
fn init_logging(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let (file_layer, guard) = if cli.log_file {
        let appender = tracing_appender::rolling::daily(paths::log_dir(), "natter.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        )
    } else {
        (None, None)
    };

    let json_layer = cli.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer =
        (!cli.json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting natter");

    // Load configuration; --character wins over the file and the environment
    dotenvy::dotenv().ok();
    let mut config = Config::load_with(cli.config.as_deref(), cli.character.as_deref())
        .context("Failed to load configuration")?;

    if cli.no_chatter {
        config.chatter.enabled = false;
    }

    tracing::info!(
        character = %config.persona.character_path,
        backend = %config.backend.backend_type,
        memory_dir = %config.memory.dir,
        history_limit = config.persona.history_limit,
        "Configuration loaded"
    );

    let persona = App::load_persona(&config)?;
    let greeting = persona.substitute(&persona.first_mes);
    let surface = Arc::new(ConsoleSurface::stdio(&config.console, &persona.name));

    let app = App::build(
        &config,
        &BackendRegistry::default(),
        Arc::clone(&surface) as Arc<dyn ChatSurface>,
        persona,
    )
    .await?;

    if !greeting.trim().is_empty() {
        surface.send(&config.console.channel_id, &greeting).await?;
    }

    app.run().await
}
