// src/pipeline/validate.rs

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Strictly load and validate the config file, logging what it resolves to.
pub fn run_validate(config_path: &Path) -> Result<Config> {
    log::info!("Validating {}", config_path.display());

    let config = match Config::load(config_path).and_then(|c| c.validate().map(|()| c)) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
    };

    for channel in config.resolve_channels()? {
        log::info!("  channel {} ({})", channel.name, channel.url);
    }
    log::info!(
        "  fetch_limit={} media_download_limit={} max_images={}",
        config.harvest.fetch_limit,
        config.harvest.media_download_limit,
        config.enrich.max_images
    );
    if !config.enrich.model_path.is_file() {
        log::warn!(
            "  detection model not found at {}; enrich will fail",
            config.enrich.model_path.display()
        );
    }
    log::info!("Config OK");
    Ok(config)
}
