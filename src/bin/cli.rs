//! Channel Harvester CLI
//!
//! Local execution entry point, meant to be invoked by cron or another
//! scheduler.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use channel_harvester::{
    error::Result,
    models::{Config, LoggingConfig},
    pipeline::{self, HarvestReport, Orchestrator},
    services::Detector,
};
use clap::{Parser, Subcommand};

/// Incremental channel harvester with object-detection enrichment
#[derive(Parser, Debug)]
#[command(name = "harvester", version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest new records from every configured channel
    Harvest {
        /// Only harvest these channels (name, @name or URL); repeatable
        #[arg(long = "channel")]
        channels: Vec<String>,
    },

    /// Run one bounded detection pass over downloaded images
    Enrich,

    /// Run full pipeline: Harvest → Enrich
    Pipeline,

    /// Validate the configuration file
    Validate,

    /// Show checkpoints and latest partitions per channel
    Info,
}

/// Initialize logging from config; `--verbose` forces debug.
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    if let Some(path) = &logging.file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[cfg(feature = "detect")]
fn load_detector(config: &Config) -> Result<Arc<dyn Detector>> {
    let detector = channel_harvester::services::YoloDetector::load(&config.enrich)?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "detect"))]
fn load_detector(_config: &Config) -> Result<Arc<dyn Detector>> {
    Err(channel_harvester::error::AppError::config(
        "Built without the `detect` feature; enrichment is unavailable",
    ))
}

fn log_report(report: &HarvestReport) {
    for (channel, result) in &report.channels {
        match result {
            Ok(s) => log::info!(
                "  {}: {} new / {} total, {} preprocessed, {} images, checkpoint {:?}",
                channel,
                s.new_records,
                s.total_records,
                s.preprocessed,
                s.images_downloaded,
                s.checkpoint
            ),
            Err(e) => log::error!("  {}: FAILED ({})", channel, e),
        }
    }
}

async fn harvest(orchestrator: &Orchestrator, channels: &[String]) -> Result<HarvestReport> {
    let run_date = chrono::Local::now().date_naive();
    let report = orchestrator.run_harvest_all(run_date, channels).await?;
    log_report(&report);
    Ok(report)
}

async fn enrich(orchestrator: &Orchestrator) -> Result<()> {
    let detector = load_detector(orchestrator.config())?;
    let summary = orchestrator.run_enrich(detector).await?;
    log::info!(
        "Enrichment: {} processed, {} skipped, {} failed, {} untouched, {} detections",
        summary.processed(),
        summary.skipped(),
        summary.failed(),
        summary.untouched,
        summary.detections.len()
    );
    Ok(())
}

/// Validate the config and wire the production collaborators.
fn wire(config: Config) -> Result<Orchestrator> {
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }
    Orchestrator::from_config(config)
}

fn exit_on_failures(report: &HarvestReport) {
    if !report.is_success() {
        log::error!("Harvest failed for: {}", report.failures().join(", "));
        std::process::exit(1);
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings live in the config, so load it first.
    let (config, load_error) = match Config::load(&cli.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    init_logging(&config.logging, cli.verbose)?;

    log::info!("Channel Harvester starting...");
    match &load_error {
        Some(e) => log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        ),
        None => log::info!("Loaded configuration from {}", cli.config.display()),
    }

    match cli.command {
        Command::Harvest { channels } => {
            let orchestrator = wire(config)?;
            let report = harvest(&orchestrator, &channels).await?;
            exit_on_failures(&report);
        }

        Command::Enrich => {
            let orchestrator = wire(config)?;
            enrich(&orchestrator).await?;
        }

        Command::Pipeline => {
            let orchestrator = wire(config)?;
            log::info!("Step 1/2: Harvesting channels...");
            let report = harvest(&orchestrator, &[]).await?;

            log::info!("Step 2/2: Enriching images...");
            enrich(&orchestrator).await?;

            exit_on_failures(&report);
            log::info!("Pipeline complete!");
        }

        Command::Validate => {
            pipeline::run_validate(&cli.config)?;
            log::info!("All validations passed!");
        }

        Command::Info => {
            let orchestrator = wire(config)?;
            let paths = &orchestrator.config().paths;
            log::info!("Config: {}", cli.config.display());
            log::info!("Records: {}", paths.raw_dir.display());
            log::info!("Media: {}", paths.media_dir.display());

            for status in orchestrator.channel_status().await? {
                let checkpoint = status
                    .checkpoint
                    .map_or_else(|| "none".to_string(), |id| id.to_string());
                let partition = status
                    .latest_partition
                    .map_or_else(|| "none".to_string(), |d| d.to_string());
                log::info!(
                    "  {}: checkpoint {}, latest partition {}",
                    status.channel,
                    checkpoint,
                    partition
                );
            }

            log::info!(
                "Detections: {}",
                if paths.detections_file.exists() {
                    "present"
                } else {
                    "not found"
                }
            );
        }
    }

    log::info!("Done!");

    Ok(())
}
