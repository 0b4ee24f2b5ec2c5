//! Command-line front end for `charsheet`.
//!
//! Runs one command against a conversation stored as a JSON file. The
//! OpenRouter key is read from the `OPENROUTER_KEY` environment variable.
//!
//! # Examples
//!
//! ```sh
//! # Force an update of the sheet stored in chat.json
//! charsheet --history chat.json update
//!
//! # Use a remote summarization service instead
//! charsheet --history chat.json --extras-url http://localhost:5100 update
//!
//! # Recommend and store trigger thresholds
//! charsheet --history chat.json --settings sheet.json tune
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use charsheet::api::RetryConfig;
use charsheet::backend::local::ServerModel;
use charsheet::prelude::*;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Keep a running character sheet for a conversation.
#[derive(Parser)]
#[command(name = "charsheet", version)]
struct Cli {
    /// Conversation history (JSON). Created on first save if missing.
    #[arg(long, default_value = "chat.json")]
    history: PathBuf,

    /// Settings file (JSON). Missing means defaults; changes are saved back.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Model for OpenRouter-backed summaries.
    #[arg(long, default_value = charsheet::DEFAULT_MODEL)]
    model: String,

    /// Base URL of a remote summarization service.
    #[arg(long)]
    extras_url: Option<String>,

    /// Chat-completions endpoint of a local model server.
    #[arg(long)]
    local_url: Option<String>,

    /// Context size of the local model.
    #[arg(long, default_value_t = 8192)]
    local_context: usize,

    /// Retries for transient OpenRouter failures.
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Suppress notices for forced updates.
    #[arg(long)]
    quiet: bool,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short = 'q', long = "silent")]
    silent: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Force an update (and the sibling, in lock mode).
    Update,
    /// Force this summary and the sibling's.
    Sync,
    /// Stop automatic updates.
    Freeze,
    /// Resume automatic updates.
    Unfreeze,
    /// Drive the sibling summarizer from this one.
    Lock,
    /// Let the sibling summarizer run on its own.
    Unlock,
    /// Print the current summary.
    Get,
    /// Replace the current summary.
    Edit {
        /// New summary text.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Drop the current checkpoint and fall back to the previous one.
    Restore,
    /// Show whether updates are frozen and lock mode is on.
    Status,
    /// Recommend and store the trigger thresholds.
    Tune,
}

impl From<Command> for Action {
    fn from(command: Command) -> Self {
        match command {
            Command::Update => Action::Update,
            Command::Sync => Action::Sync,
            Command::Freeze => Action::Freeze,
            Command::Unfreeze => Action::Unfreeze,
            Command::Lock => Action::Lock,
            Command::Unlock => Action::Unlock,
            Command::Get => Action::Get,
            Command::Edit { text } => Action::Edit(text.join(" ")),
            Command::Restore => Action::Restore,
            Command::Status => Action::Status,
            Command::Tune => Action::Tune,
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = match (cli.silent, cli.verbose) {
        (true, _) => LevelFilter::ERROR,
        (false, 0) => LevelFilter::INFO,
        (false, 1) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(level)
        .init();
}

async fn build_engine(cli: &Cli, store: Arc<FileHistory>) -> Result<SheetEngine, String> {
    let settings = match &cli.settings {
        Some(path) => SheetSettings::load(path)?,
        None => SheetSettings::default(),
    };

    let mut engine = SheetEngine::from_shared(settings, store.clone(), store)
        .with_event_handler(Arc::new(LoggingHandler));
    if let Some(path) = &cli.settings {
        engine = engine.with_settings_path(path);
    }

    match std::env::var("OPENROUTER_KEY") {
        Ok(key) => {
            let client = Arc::new(
                OpenRouterClient::with_headers(key, "https://crates.io/crates/charsheet", "charsheet")?
                    .with_retry(RetryConfig::with_retries(cli.retries)),
            );
            engine = engine
                .with_backend(Arc::new(QuietBackend::new(client.clone(), &cli.model)))
                .with_backend(Arc::new(RawBackend::blocking(client.clone(), &cli.model)))
                .with_backend(Arc::new(RawBackend::non_blocking(client, &cli.model)));
        }
        Err(_) => debug!("OPENROUTER_KEY not set, OpenRouter backends disabled"),
    }

    if let Some(url) = &cli.local_url {
        let client = Arc::new(OpenRouterClient::new("local")?.with_endpoint(url.as_str()));
        let model = ServerModel::new(client, &cli.model, cli.local_context);
        engine = engine.with_backend(Arc::new(LocalBackend::new(model)));
    }

    if let Some(url) = &cli.extras_url {
        let delegated = DelegatedBackend::new(url.as_str())?;
        if let Err(e) = delegated.connect().await {
            warn!("Could not reach summarization service: {e}");
        }
        engine = engine.with_backend(Arc::new(delegated));
    }

    Ok(engine)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let store = match FileHistory::open(&cli.history) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let engine = match build_engine(&cli, store.clone()).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let action = cli.command.map(Action::from).unwrap_or(Action::Status);
    let output = engine.execute(action, cli.quiet).await;
    if !output.is_empty() {
        println!("{output}");
    }

    if let Err(e) = store.flush() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
