//! # Comic Mirror CLI (`comic-mirror`)
//!
//! Keeps a local SQLite mirror of the numbered comic archive up to date and
//! searchable offline.
//!
//! ## Usage
//!
//! ```bash
//! comic-mirror --config ./config/comics.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `comic-mirror init` | Create the SQLite database and run schema migrations |
//! | `comic-mirror sync` | Fetch everything missing below and above the stored range |
//! | `comic-mirror search "<query>"` | Search stored items |
//! | `comic-mirror get <number>` | Print one stored item |
//! | `comic-mirror image <number>` | Download an item's image |
//! | `comic-mirror stats` | Show what is stored and recent sync runs |
//!
//! ## Examples
//!
//! ```bash
//! # First run: create the database and mirror the whole archive
//! comic-mirror init
//! comic-mirror sync --progress human
//!
//! # Later runs only fetch what is new
//! comic-mirror sync
//!
//! # Also refill holes left by failed batches
//! comic-mirror sync --repair
//!
//! comic-mirror search "bobby tables"
//! comic-mirror image 327 --out ./exploits.png
//! ```

use std::env;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use comic_mirror::progress::ProgressMode;
use comic_mirror::{config, get, migrate, search, stats, sync};

/// Comic Mirror: an offline, searchable mirror of the comic archive.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Missing sections fall back to defaults, and so does a missing
/// default file.
#[derive(Parser)]
#[command(
    name = "comic-mirror",
    about = "Comic Mirror: keep an offline, searchable copy of the comic archive",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to
    /// `./config/comics.toml`, or built-in defaults when that is missing.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Fetch missing items from the remote archive.
    ///
    /// Walks everything below the lowest stored number down to 1 and
    /// everything above the highest stored number up to the latest one.
    Sync {
        /// Also refetch holes inside the stored range.
        #[arg(long)]
        repair: bool,

        /// Progress output on stderr: auto, off, human or json.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Search stored items by title, alt text, transcript, link or number.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Print one stored item.
    Get { number: u32 },

    /// Download a stored item's image.
    Image {
        number: u32,

        /// Output file. Defaults to the image's file name.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Skip the high-resolution variant.
        #[arg(long)]
        normal: bool,
    },

    /// Show item counts, coverage and recent sync runs.
    Stats,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("COMIC_MIRROR_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "comic_mirror=debug,info"
        } else {
            "comic_mirror=info,warn"
        })
    });

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Compact => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let cfg = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { repair, progress } => {
            let mode = ProgressMode::parse(&progress)?;
            sync::run_sync(&cfg, repair, mode).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Get { number } => {
            get::run_get(&cfg, number).await?;
        }
        Commands::Image {
            number,
            out,
            normal,
        } => {
            get::run_image(&cfg, number, out, normal).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
