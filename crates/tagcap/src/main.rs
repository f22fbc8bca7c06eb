//! Tagcap CLI - tag-grounded caption generation and refinement.
//!
//! Tagcap asks a remote multimodal service for captions that mention every
//! ground-truth tag of an image, verifies coverage, and refines until the
//! caption is acceptable, across a whole collection, concurrently, against
//! a pool of rate-limited credentials.
//!
//! # Usage
//!
//! ```bash
//! # Caption a directory of images
//! tagcap caption ./images/ --credentials api_keys.txt
//!
//! # Caption a single image
//! tagcap caption ./images/5841101.png --api-key $GEMINI_API_KEY
//!
//! # Audit coverage of existing captions
//! tagcap check ./images/
//!
//! # View configuration
//! tagcap config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Tagcap - tag-grounded caption generation and refinement.
#[derive(Parser, Debug)]
#[command(name = "tagcap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate and refine captions for images
    Caption(cli::caption::CaptionArgs),

    /// Audit tag coverage of existing caption artifacts
    Check(cli::check::CheckArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging from config, with CLI verbose override.
    // Note: logging isn't initialized yet, so use eprintln for config warnings.
    let config = match tagcap_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `tagcap config path`."
            );
            tagcap_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Tagcap v{}", tagcap_core::VERSION);

    // Dispatch to the appropriate command handler
    match cli.command {
        Commands::Caption(args) => cli::caption::execute(args).await,
        Commands::Check(args) => cli::check::execute(args).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}
