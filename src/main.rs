mod cli;

use photosift::{config, metadata::ExifReader, processor::Ingestor, volume::SystemVolumes};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on the
    // verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "photosift=trace".to_string()
        } else {
            "photosift=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Run {
            sources,
            devices,
            destination,
            watch,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_import(
                cli.config.as_deref(),
                sources,
                devices,
                destination,
                watch,
            ))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("photosift {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_import(
    config_path: Option<&Path>,
    sources: Vec<PathBuf>,
    devices: Vec<String>,
    destination: Option<PathBuf>,
    watch: bool,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI arguments override config-file values.
    if !sources.is_empty() {
        config.sources = sources;
    }
    if !devices.is_empty() {
        config.devices = devices;
    }
    if let Some(destination) = destination {
        config.destination = destination;
    }
    if watch {
        config.watch = true;
    }

    config::validate(&config)?;

    tracing::info!(
        "Importing from {} source(s) and {} device label(s) into {}",
        config.sources.len(),
        config.devices.len(),
        config.destination.display()
    );

    let reader = Arc::new(ExifReader::new());
    let volumes = Arc::new(SystemVolumes::new());
    let ingestor = Ingestor::start(&config, reader, volumes)?;

    if config.watch {
        tracing::info!("Watching for changes; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down...");
        ingestor.stop().await;
        Ok(())
    } else {
        let summary = tokio::select! {
            summary = ingestor.wait_complete() => summary,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                None
            }
        };
        ingestor.stop().await;

        match summary {
            Some(summary) => {
                tracing::info!(
                    "Import complete: {} transferred, {} failed",
                    summary.transferred,
                    summary.failed
                );
                if summary.failed > 0 {
                    anyhow::bail!("{} file(s) failed to transfer", summary.failed);
                }
                Ok(())
            }
            None => anyhow::bail!("Import did not complete"),
        }
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            config::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Sources: {}", config.sources.len());
            println!("  Device labels: {}", config.devices.len());
            println!("  Destination: {}", config.destination.display());
            println!("  Watch: {}", config.watch);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Duplicates folder: {}", config.queue.duplicates_dir);
            println!("  Debounce: {}s", config.watcher.debounce_secs);
        }
    }

    Ok(())
}
