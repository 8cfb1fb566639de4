use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "photosift")]
#[command(author, version, about = "Photo/video import automation tool")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import files from sources and removable devices into the archive
    Run {
        /// Source directories to import/watch (overrides config)
        #[arg(long, num_args = 1..)]
        sources: Vec<PathBuf>,

        /// Removable drive labels to import/watch (overrides config)
        #[arg(long, num_args = 1..)]
        devices: Vec<String>,

        /// Archive root directory (overrides config)
        #[arg(long)]
        destination: Option<PathBuf>,

        /// Keep watching sources/devices after the first import pass
        #[arg(long)]
        watch: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
