use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "urlwatch", version, about = "URL check controller CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the controller with a config file
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Declare or update a UrlCheck from a YAML manifest
    Apply {
        #[arg(short, long)]
        config: PathBuf,
        /// Path to the UrlCheck manifest
        file: PathBuf,
    },
    /// List declared UrlChecks and their last results
    Get {
        #[arg(short, long)]
        config: PathBuf,
    },
}
