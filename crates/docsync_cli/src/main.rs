//! docsync CLI
//!
//! Command-line tools for docsync stores.
//!
//! # Commands
//!
//! - `schema check` - Validate an object model schema
//! - `schema show` - Print the loaded model and its fingerprint
//! - `blobs` - List the attachments in a blob directory
//! - `checkpoints` - List replication checkpoints

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docsync command-line tools.
#[derive(Parser)]
#[command(name = "docsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Object model schema tools
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// List the attachments stored in a blob directory
    Blobs {
        /// Blob store root directory
        dir: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List replication checkpoints
    Checkpoints {
        /// Checkpoint file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Validate a JSON schema file
    Check {
        /// Schema file
        file: PathBuf,
    },

    /// Print the loaded model
    Show {
        /// Schema file
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Schema { action } => match action {
            SchemaAction::Check { file } => commands::schema::check(&file)?,
            SchemaAction::Show { file, format } => commands::schema::show(&file, &format)?,
        },
        Commands::Blobs { dir, format } => commands::blobs::run(&dir, &format)?,
        Commands::Checkpoints { file, format } => commands::checkpoints::run(&file, &format)?,
        Commands::Version => {
            println!("docsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
