//! # doc-cache CLI (`dcache`)
//!
//! ## Usage
//!
//! ```bash
//! dcache --config ./config/dcache.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dcache init` | Create the SQLite database and run schema migrations |
//! | `dcache register <path>` | Register a stored document as a cache record |
//! | `dcache reconcile <id>` | Upload or reuse the remote copy of one record |
//! | `dcache reconcile-pending` | Reconcile every record that is not ACTIVE |
//! | `dcache list` | List cache records |
//! | `dcache stats` | Summarise cache state and reuse savings |
//! | `dcache serve` | Start the HTTP server |
//! | `dcache cost` | Estimate prompt cost in USD |

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use doc_cache::events::{EventMode, ReconcileObserver};
use doc_cache::intake::IntakeOptions;
use doc_cache::{config, cost_cmd, intake, list, migrate, reconcile, server, stats};
use doc_cache_core::cost::{GeminiModel, Priority, DEFAULT_ESTIMATED_OUTPUT_TOKENS};
use doc_cache_core::FileState;

/// doc-cache: keep an LLM vendor's File API in sync with stored documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/dcache.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dcache",
    about = "doc-cache: content-addressed document cache for the Gemini File API",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dcache.toml")]
    config: PathBuf,

    /// Reconciliation events on stderr. Defaults to `human` on a TTY, otherwise `off`.
    #[arg(long, global = true, value_enum)]
    events: Option<EventsArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum EventsArg {
    Human,
    Json,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Cost,
    Quality,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Register a document already present in blob storage.
    ///
    /// The size and MIME type are read from the blob store.
    Register {
        /// Path of the blob, relative to the configured root or bucket.
        path: String,

        /// Display name sent to the vendor (defaults to the file name).
        #[arg(long)]
        name: Option<String>,

        /// MIME type override.
        #[arg(long)]
        mime: Option<String>,
    },

    /// Reconcile one record with the vendor File API.
    Reconcile {
        /// Record id.
        id: String,
    },

    /// Reconcile every record that is not ACTIVE, one at a time.
    ReconcilePending,

    /// List cache records, newest first.
    List {
        /// Only records in this state: none, processing, active, failed.
        #[arg(long)]
        state: Option<FileState>,
    },

    /// Show cache statistics.
    Stats,

    /// Start the HTTP server.
    Serve,

    /// Estimate the USD cost of a prompt.
    Cost {
        /// gemini-1.5-flash or gemini-1.5-pro. Chosen by --prefer when omitted.
        #[arg(long)]
        model: Option<GeminiModel>,

        /// Input tokens.
        #[arg(long)]
        input: u64,

        /// Expected output tokens.
        #[arg(long, default_value_t = DEFAULT_ESTIMATED_OUTPUT_TOKENS)]
        output: u64,

        /// What to optimise for when no model is given.
        #[arg(long, value_enum, default_value = "cost")]
        prefer: PriorityArg,

        /// Print the breakdown as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn observer(arg: Option<EventsArg>) -> Arc<dyn ReconcileObserver> {
    let mode = match arg {
        Some(EventsArg::Human) => EventMode::Human,
        Some(EventsArg::Json) => EventMode::Json,
        Some(EventsArg::Off) => EventMode::Off,
        None => EventMode::default_for_tty(),
    };
    Arc::from(mode.observer())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Cost {
        model,
        input,
        output,
        prefer,
        json,
    } = cli.command
    {
        let priority = match prefer {
            PriorityArg::Cost => Priority::Cost,
            PriorityArg::Quality => Priority::Quality,
        };
        return cost_cmd::run_cost(model, input, output, priority, json);
    }

    let cfg = config::load_config(&cli.config)?;
    let events = observer(cli.events);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Register { path, name, mime } => {
            let options = IntakeOptions {
                display_name: name,
                mime_type: mime,
            };
            intake::run_register(&cfg, &path, options).await?;
        }
        Commands::Reconcile { id } => {
            reconcile::run_reconcile(&cfg, &id, events).await?;
        }
        Commands::ReconcilePending => {
            reconcile::run_reconcile_pending(&cfg, events).await?;
        }
        Commands::List { state } => {
            list::run_list(&cfg, state).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg, events).await?;
        }
        Commands::Cost { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
