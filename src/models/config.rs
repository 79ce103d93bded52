//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Channel;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Channels to harvest (URLs or bare names)
    #[serde(default = "defaults::channels")]
    pub channels: Vec<String>,

    /// Source feed HTTP settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Per-run harvest caps
    #[serde(default)]
    pub harvest: HarvestConfig,

    /// Detection enrichment settings
    #[serde(default)]
    pub enrich: EnrichConfig,

    /// Storage locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Resolve the configured channel entries.
    pub fn resolve_channels(&self) -> Result<Vec<Channel>> {
        self.channels
            .iter()
            .map(|entry| Channel::parse(entry, &self.source.base_url))
            .collect()
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(AppError::validation("No channels defined"));
        }
        let channels = self
            .resolve_channels()
            .map_err(|e| AppError::validation(e.to_string()))?;
        let mut seen = HashSet::new();
        for channel in &channels {
            if !seen.insert(channel.name.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate channel: {}",
                    channel.name
                )));
            }
        }
        if self.source.user_agent.trim().is_empty() {
            return Err(AppError::validation("source.user_agent is empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        if self.harvest.fetch_limit == 0 {
            return Err(AppError::validation("harvest.fetch_limit must be > 0"));
        }
        if self.harvest.media_download_limit == 0 {
            return Err(AppError::validation(
                "harvest.media_download_limit must be > 0",
            ));
        }
        if self.enrich.max_images == 0 {
            return Err(AppError::validation("enrich.max_images must be > 0"));
        }
        if self.enrich.input_size == 0 {
            return Err(AppError::validation("enrich.input_size must be > 0"));
        }
        for (name, value) in [
            ("enrich.confidence_threshold", self.enrich.confidence_threshold),
            ("enrich.iou_threshold", self.enrich.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::validation(format!("{name} must be within [0, 1]")));
            }
        }
        if self.enrich.extensions.is_empty() {
            return Err(AppError::validation("enrich.extensions is empty"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: defaults::channels(),
            source: SourceConfig::default(),
            harvest: HarvestConfig::default(),
            enrich: EnrichConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// HTTP settings for the channel feed and media downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the public channel preview
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Delay between page requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
        }
    }
}

/// Caps applied to a single harvest run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Maximum candidate records fetched per channel per run
    #[serde(default = "defaults::fetch_limit")]
    pub fetch_limit: usize,

    /// Maximum successful image downloads per channel per run
    #[serde(default = "defaults::media_download_limit")]
    pub media_download_limit: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            fetch_limit: defaults::fetch_limit(),
            media_download_limit: defaults::media_download_limit(),
        }
    }
}

/// Detection enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Maximum successfully processed images per pass
    #[serde(default = "defaults::max_images")]
    pub max_images: usize,

    /// YOLOv8 ONNX export
    #[serde(default = "defaults::model_path")]
    pub model_path: PathBuf,

    /// Square model input edge in pixels
    #[serde(default = "defaults::input_size")]
    pub input_size: u32,

    /// Minimum class confidence kept
    #[serde(default = "defaults::confidence_threshold")]
    pub confidence_threshold: f32,

    /// Overlap above which same-class boxes are suppressed
    #[serde(default = "defaults::iou_threshold")]
    pub iou_threshold: f32,

    /// Image file extensions scanned under the media root
    #[serde(default = "defaults::extensions")]
    pub extensions: Vec<String>,
}

impl EnrichConfig {
    /// Whether the path has one of the configured image extensions.
    pub fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            max_images: defaults::max_images(),
            model_path: defaults::model_path(),
            input_size: defaults::input_size(),
            confidence_threshold: defaults::confidence_threshold(),
            iou_threshold: defaults::iou_threshold(),
            extensions: defaults::extensions(),
        }
    }
}

/// On-disk layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Full record sets: `{raw_dir}/{date}/{channel}.json`
    #[serde(default = "defaults::raw_dir")]
    pub raw_dir: PathBuf,

    /// Preprocessed subsets: `{preprocessed_dir}/{date}/{channel}_preprocessed.json`
    #[serde(default = "defaults::preprocessed_dir")]
    pub preprocessed_dir: PathBuf,

    /// Checkpoints: `{checkpoint_dir}/{channel}.json`
    #[serde(default = "defaults::checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Downloaded images: `{media_dir}/{date}/{channel}/{id}.{ext}`
    #[serde(default = "defaults::media_dir")]
    pub media_dir: PathBuf,

    /// Annotated copies
    #[serde(default = "defaults::detected_dir")]
    pub detected_dir: PathBuf,

    /// Detection output of the latest enrichment pass
    #[serde(default = "defaults::detections_file")]
    pub detections_file: PathBuf,
}

impl PathsConfig {
    /// Lay every path out under one root directory.
    pub fn rooted(root: &Path) -> Self {
        let d = Self::default();
        Self {
            raw_dir: root.join(d.raw_dir),
            preprocessed_dir: root.join(d.preprocessed_dir),
            checkpoint_dir: root.join(d.checkpoint_dir),
            media_dir: root.join(d.media_dir),
            detected_dir: root.join(d.detected_dir),
            detections_file: root.join(d.detections_file),
        }
    }

    /// Directory receiving a channel's images for one run date.
    pub fn media_partition(&self, date: NaiveDate, channel: &str) -> PathBuf {
        self.media_dir
            .join(date.format(crate::storage::PARTITION_DATE_FORMAT).to_string())
            .join(channel)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: defaults::raw_dir(),
            preprocessed_dir: defaults::preprocessed_dir(),
            checkpoint_dir: defaults::checkpoint_dir(),
            media_dir: defaults::media_dir(),
            detected_dir: defaults::detected_dir(),
            detections_file: defaults::detections_file(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level (overridden by RUST_LOG)
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Append log output to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            file: None,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Channel defaults
    pub fn channels() -> Vec<String> {
        vec![
            "https://t.me/CheMed123".into(),
            "https://t.me/lobelia4cosmetics".into(),
            "https://t.me/tikvahpharma".into(),
        ]
    }

    // Source defaults
    pub fn base_url() -> String {
        "https://t.me".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; channel-harvester/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn request_delay() -> u64 {
        500
    }

    // Harvest caps
    pub fn fetch_limit() -> usize {
        500
    }
    pub fn media_download_limit() -> usize {
        100
    }

    // Enrichment defaults
    pub fn max_images() -> usize {
        20
    }
    pub fn model_path() -> PathBuf {
        "models/yolov8n.onnx".into()
    }
    pub fn input_size() -> u32 {
        640
    }
    pub fn confidence_threshold() -> f32 {
        0.25
    }
    pub fn iou_threshold() -> f32 {
        0.45
    }
    pub fn extensions() -> Vec<String> {
        vec!["jpg".into(), "jpeg".into(), "png".into()]
    }

    // Path defaults
    pub fn raw_dir() -> PathBuf {
        "data/raw/telegram_messages".into()
    }
    pub fn preprocessed_dir() -> PathBuf {
        "data/preprocessed".into()
    }
    pub fn checkpoint_dir() -> PathBuf {
        "data/last_scraped".into()
    }
    pub fn media_dir() -> PathBuf {
        "media".into()
    }
    pub fn detected_dir() -> PathBuf {
        "media/detected".into()
    }
    pub fn detections_file() -> PathBuf {
        "data/image_detections.json".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
