//! # askdoc CLI
//!
//! Ask questions about a single document.
//!
//! ## Usage
//!
//! ```bash
//! askdoc --config ./askdoc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdoc serve` | Start the HTTP server (upload / query / clear) |
//! | `askdoc ask <file> "<question>"` | Index a file and answer a question from it |
//! | `askdoc chunk <file>` | Print the chunks a file would be split into |
//!
//! Without `--config`, `./askdoc.toml` is used if it exists, otherwise the
//! built-in defaults (offline `hash` embeddings, no answer generation).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use askdoc::ask::{self, AskOptions};
use askdoc::chunk_cmd;
use askdoc::config::{self, Config};
use askdoc::progress::ProgressMode;
use askdoc::server;

const DEFAULT_CONFIG: &str = "./askdoc.toml";

#[derive(Parser)]
#[command(
    name = "askdoc",
    about = "Ask questions about a document: extract, chunk, embed, retrieve, answer",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Index a PDF, DOCX, text or markdown file and answer a question from it.
    Ask {
        file: PathBuf,
        question: String,

        /// Number of chunks to retrieve (default `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Print the answer, context and chunks as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr: human, json, or off. Defaults to human on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Print chunk boundaries for a file without embedding it.
    Chunk {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
            ProgressArg::Off => ProgressMode::Off,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "askdoc=debug" } else { "askdoc=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut cfg = load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            file,
            question,
            top_k,
            json,
            progress,
        } => {
            let opts = AskOptions {
                top_k,
                json,
                progress: progress
                    .map(ProgressMode::from)
                    .unwrap_or_else(ProgressMode::default_for_tty),
            };
            ask::run_ask(&cfg, &file, &question, opts).await?;
        }
        Commands::Chunk { file, json } => {
            chunk_cmd::run_chunk(&cfg, &file, json).await?;
        }
    }

    Ok(())
}
