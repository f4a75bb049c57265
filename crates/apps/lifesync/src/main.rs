//! Lifesync - Incremental lifelog sync
//!
//! Runs one sync pass per configured sink, then exits. Meant to be invoked
//! by an external scheduler.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lifelog::{
    CancelToken, Clock, HttpTransport, SyncConfig, SystemClock, UreqTransport, WatermarkStore,
    run_passes,
};
use log::{error, info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lifesync", version, about = "Sync lifelogs into Notion and Mem")]
struct Cli {
    /// Config file (defaults to ~/.config/lifesync/lifesync.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync pass per sink
    Run {
        /// Only sync these sinks (repeatable)
        #[arg(long = "sink")]
        sinks: Vec<String>,
    },
    /// Show each sink's persisted watermark
    Status,
    /// Forget a sink's watermark so the next pass starts from its lookback
    Reset {
        #[arg(long)]
        sink: String,
    },
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        warn!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();

    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            if let Some(path) = SyncConfig::default_config_path() {
                warn!(
                    "To configure Lifesync, either:\n\
                     1. Write settings to: {}\n\
                     2. Or set LIMITLESS_API_KEY plus NOTION_API_KEY/NOTION_DATABASE_ID and/or MEM_API_KEY",
                    path.display()
                );
            }
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every pass succeeded
fn execute(cli: Cli) -> Result<bool> {
    let config =
        SyncConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let store = config.watermark_store();

    match cli.command {
        Commands::Run { sinks } => {
            let transport: Arc<dyn HttpTransport> = Arc::new(UreqTransport::new(config.timeout));
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let passes = config.build_passes(&sinks, transport, Arc::new(store), clock)?;

            info!("Running {} sync passes", passes.len());
            let statuses = run_passes(&passes, &CancelToken::new());

            for status in &statuses {
                println!("{}", serde_json::to_string(status)?);
            }
            Ok(statuses.iter().all(|s| s.is_success()))
        }
        Commands::Status => {
            for sink in config.select(&[])? {
                let id = &sink.profile.id;
                let line = match store.load(id) {
                    Ok(Some(watermark)) => json!({"sink": id.as_str(), "watermark": watermark}),
                    Ok(None) => json!({"sink": id.as_str(), "watermark": null}),
                    Err(e) => json!({"sink": id.as_str(), "error": e.to_string()}),
                };
                println!("{}", line);
            }
            Ok(true)
        }
        Commands::Reset { sink } => {
            let selected = config.select(std::slice::from_ref(&sink))?;
            for sink in selected {
                store
                    .reset(&sink.profile.id)
                    .with_context(|| format!("Failed to reset {}", sink.profile.id))?;
                info!("Reset watermark for {}", sink.profile.id);
            }
            Ok(true)
        }
    }
}
