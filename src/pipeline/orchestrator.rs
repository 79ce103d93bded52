// src/pipeline/orchestrator.rs

//! Run orchestration: harvest every channel, or run one enrichment pass.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{AppError, Result};
use crate::models::{Channel, Config};
use crate::pipeline::enrich::{DetectionEnricher, EnrichSummary};
use crate::pipeline::harvest::{ChannelHarvester, ChannelSummary};
use crate::services::{
    ChannelSource, Detector, HttpMediaDownloader, MediaDownloader, TelegramWebSource,
};
use crate::storage::{CheckpointStore, LocalStorage, RecordStore};
use crate::utils::http::create_async_client;

/// Per-channel results of one harvest run.
#[derive(Debug)]
pub struct HarvestReport {
    pub run_date: NaiveDate,
    pub channels: Vec<(String, std::result::Result<ChannelSummary, String>)>,
}

impl HarvestReport {
    pub fn succeeded(&self) -> usize {
        self.channels.iter().filter(|(_, r)| r.is_ok()).count()
    }

    /// Names of channels whose harvest failed.
    pub fn failures(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failures().is_empty()
    }
}

/// Stored state of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub channel: String,
    pub checkpoint: Option<i64>,
    pub latest_partition: Option<NaiveDate>,
}

/// Sequences harvests across channels and triggers enrichment.
pub struct Orchestrator {
    config: Arc<Config>,
    source: Arc<dyn ChannelSource>,
    records: Arc<dyn RecordStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    downloader: Arc<dyn MediaDownloader>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn ChannelSource>,
        records: Arc<dyn RecordStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        downloader: Arc<dyn MediaDownloader>,
    ) -> Self {
        Self {
            config,
            source,
            records,
            checkpoints,
            downloader,
        }
    }

    /// Wire the web source, on-disk storage and HTTP downloader.
    pub fn from_config(config: Config) -> Result<Self> {
        let client = create_async_client(&config.source)?;
        let source = TelegramWebSource::new(client.clone(), &config.source)?;
        let storage = Arc::new(LocalStorage::new(&config.paths));

        Ok(Self::new(
            Arc::new(config),
            Arc::new(source),
            storage.clone(),
            storage,
            Arc::new(HttpMediaDownloader::new(client)),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Configured channels, restricted to `only` when it is non-empty.
    fn selected_channels(&self, only: &[String]) -> Result<Vec<Channel>> {
        let channels = self.config.resolve_channels()?;
        if only.is_empty() {
            return Ok(channels);
        }

        let mut selected = Vec::with_capacity(only.len());
        for entry in only {
            let wanted = Channel::parse(entry, &self.config.source.base_url)?;
            let channel = channels
                .iter()
                .find(|c| c.name == wanted.name)
                .ok_or_else(|| {
                    AppError::validation(format!("Channel {} is not configured", wanted.name))
                })?;
            selected.push(channel.clone());
        }
        Ok(selected)
    }

    /// Harvest each selected channel in turn.
    ///
    /// A failing channel is logged and reported; it never stops the rest.
    pub async fn run_harvest_all(&self, run_date: NaiveDate, only: &[String]) -> Result<HarvestReport> {
        let channels = self.selected_channels(only)?;
        log::info!("Harvesting {} channels for {}", channels.len(), run_date);

        let harvester = ChannelHarvester::new(
            self.source.as_ref(),
            self.records.as_ref(),
            self.checkpoints.as_ref(),
            self.downloader.as_ref(),
            self.config.harvest,
            self.config.paths.clone(),
        );

        let mut report = HarvestReport {
            run_date,
            channels: Vec::with_capacity(channels.len()),
        };
        for channel in &channels {
            let result = harvester.harvest(channel, run_date).await.map_err(|e| {
                log::error!("Error scraping {}: {}", channel.url, e);
                e.to_string()
            });
            report.channels.push((channel.name.clone(), result));
        }

        log::info!(
            "Harvest finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failures().len()
        );
        Ok(report)
    }

    /// Run one enrichment pass on a blocking thread.
    pub async fn run_enrich(&self, detector: Arc<dyn Detector>) -> Result<EnrichSummary> {
        let enricher = DetectionEnricher::new(
            detector,
            self.config.enrich.clone(),
            self.config.paths.clone(),
        );
        tokio::task::spawn_blocking(move || enricher.run()).await?
    }

    /// Checkpoint and newest partition for every configured channel.
    pub async fn channel_status(&self) -> Result<Vec<ChannelStatus>> {
        let mut statuses = Vec::new();
        for channel in self.config.resolve_channels()? {
            statuses.push(ChannelStatus {
                checkpoint: self.checkpoints.get_checkpoint(&channel.name).await?,
                latest_partition: self.records.latest_partition_date(&channel.name).await?,
                channel: channel.name,
            });
        }
        Ok(statuses)
    }
}
