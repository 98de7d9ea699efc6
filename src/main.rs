//! ftpdex: crawler and keyword index for a fleet of FTP servers

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ftpdex::config::Config;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "ftpdex")]
#[command(about = "Crawl FTP servers and search their files by name")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "ftpdex.toml")]
    config: PathBuf,

    /// Keyspace snapshot file, overriding the configured one
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every online server and rebuild the index
    Index {
        /// Servers crawled in parallel
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },

    /// Search file names
    Search {
        /// Words to look for; quote phrases containing separators
        query: String,

        /// Result page, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Ordering: server, name, size or date, optionally suffixed .asc or .desc
        #[arg(long)]
        sort: Option<String>,

        /// Include servers that are currently offline
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List known servers
    Servers {
        /// Show details of one server
        id: Option<String>,
    },

    /// Show network statistics
    Stats,

    /// Record a liveness probe result
    ReportPing {
        /// Server host
        host: String,

        /// The server did not answer
        #[arg(long)]
        dead: bool,
    },

    /// Rename a server
    Rename { id: String, name: String },

    /// Forget a server and everything crawled from it
    Delete { id: String },

    /// List the files of a server's current generation
    Files { id: String },

    /// Rebuild postings of every current generation
    Reindex,

    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    if let Some(snapshot) = cli.snapshot {
        config.store.snapshot_path = Some(snapshot);
    }

    ftpdex::logging::init(&config.logging, cli.verbose)?;
    debug!("Using configuration from {}", cli.config.display());

    match cli.command {
        Commands::Init { path } => commands::init::init_config(path),
        command => {
            let workspace = commands::Workspace::open(&config)?;
            let result = run(&workspace, &config, command).await;
            workspace.save()?;
            result
        }
    }
}

async fn run(workspace: &commands::Workspace, config: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Index { concurrency } => {
            let concurrency = concurrency.unwrap_or(config.crawl.max_concurrency);
            commands::index::run_batch(workspace, concurrency).await
        }
        Commands::Search {
            query,
            page,
            sort,
            all,
            format,
        } => commands::search::search(workspace, &query, page, sort.as_deref(), !all, &format),
        Commands::Servers { id: None } => commands::servers::list_servers(workspace),
        Commands::Servers { id: Some(id) } => commands::servers::show_server(workspace, &id),
        Commands::Stats => commands::stats::show_stats(workspace, config),
        Commands::ReportPing { host, dead } => commands::servers::report_ping(workspace, &host, !dead),
        Commands::Rename { id, name } => commands::servers::rename(workspace, &id, &name),
        Commands::Delete { id } => commands::servers::delete(workspace, &id),
        Commands::Files { id } => commands::servers::list_files(workspace, &id),
        Commands::Reindex => commands::index::reindex(workspace),
        Commands::Init { path } => commands::init::init_config(path),
    }
}
