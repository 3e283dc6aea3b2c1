//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod convert;
mod document;
mod helpers;
mod init;
mod status;
mod work;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::models::DocumentSource;

#[derive(Parser)]
#[command(name = "papertext")]
#[command(about = "Coordinate PDF-to-text conversion of registered documents")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Manage registered documents
    Document {
        #[command(subcommand)]
        command: DocumentCommands,
    },

    /// Request conversion of a document
    Convert {
        /// Document ID
        id: i64,
        /// Run workers in this process and wait for the result
        #[arg(short, long)]
        wait: bool,
        /// Seconds to wait (defaults to the configured wait timeout)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Show conversion status, for one document or overall
    Status {
        /// Document ID (omit for a summary)
        id: Option<i64>,
    },

    /// Print a document's text, converting it first if needed
    Text {
        /// Document ID
        id: i64,
        /// Seconds to wait (defaults to the configured wait timeout)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Run conversion workers until interrupted
    Work {
        /// Number of workers (defaults to the configured pool size)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Maximum number of unfinished conversions to re-queue at startup
        #[arg(long, default_value = "1000")]
        recover_limit: i64,
    },
}

#[derive(Subcommand)]
enum DocumentCommands {
    /// Register a document
    Add {
        /// Where the document comes from
        #[arg(value_enum)]
        source: DocumentSource,
        /// Source reference (arXiv identifier for arxiv documents)
        external_ref: String,
        /// Optional title
        #[arg(long)]
        title: Option<String>,
    },
    /// List registered documents
    List {
        /// Maximum number of documents to show
        #[arg(short, long, default_value = "50")]
        limit: i64,
    },
    /// Show a document and its conversion record
    Show {
        /// Document ID
        id: i64,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options).await;
    tracing::debug!("Using database {}", settings.database_display());

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Document { command } => match command {
            DocumentCommands::Add {
                source,
                external_ref,
                title,
            } => document::cmd_document_add(&settings, source, &external_ref, title.as_deref()).await,
            DocumentCommands::List { limit } => document::cmd_document_list(&settings, limit).await,
            DocumentCommands::Show { id } => document::cmd_document_show(&settings, id).await,
        },
        Commands::Convert { id, wait, timeout } => {
            convert::cmd_convert(&settings, id, wait, timeout).await
        }
        Commands::Status { id } => status::cmd_status(&settings, id).await,
        Commands::Text { id, timeout } => convert::cmd_text(&settings, id, timeout).await,
        Commands::Work {
            workers,
            recover_limit,
        } => work::cmd_work(&settings, workers, recover_limit).await,
    }
}
