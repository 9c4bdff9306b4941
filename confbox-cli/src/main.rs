use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "confbox")]
#[command(about = "confbox - portable configuration archives")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "confbox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack the configured target directories into a portable archive
    Export {
        /// Directory the archive is written into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Restore the target directories from a local archive
    Import {
        /// Archive produced by a previous export
        archive: PathBuf,
    },

    /// Download an archive over HTTP(S) and restore the target directories
    ImportUrl {
        /// URL of the archive
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = confbox::Config::load_or_create(&cli.config)?;
    config.ensure_dirs()?;
    let porter = Arc::new(confbox::Porter::new(&config));

    match cli.command {
        Commands::Export { output } => commands::run_export(porter, output).await,
        Commands::Import { archive } => commands::run_import_file(porter, archive).await,
        Commands::ImportUrl { url } => commands::run_import_url(porter, url).await,
    }
}
