// src/pipeline/harvest.rs

//! Incremental harvest of a single channel.
//!
//! One run: load the latest snapshot, fetch past the checkpoint, merge,
//! persist both views under the run date, download new photos (capped),
//! then advance the checkpoint. The checkpoint only moves after the merged
//! set is durably written, so a crash in between merely re-fetches records
//! the merge absorbs on the next run.

use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Channel, HarvestConfig, PathsConfig, id_set, max_id, merge_records, preprocess};
use crate::services::{
    ChannelSource, FetchRequest, MediaCandidate, MediaDownloader, MediaFetcher,
};
use crate::storage::{CheckpointStore, RecordStore};

/// Outcome of one successful channel harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub channel: String,
    /// Records returned by the source
    pub fetched: usize,
    /// Fetched records not already stored
    pub new_records: usize,
    /// Size of the merged full set
    pub total_records: usize,
    /// Size of the preprocessed subset
    pub preprocessed: usize,
    pub images_downloaded: usize,
    pub image_failures: usize,
    /// Checkpoint before the run
    pub previous_checkpoint: Option<i64>,
    /// Checkpoint after the run
    pub checkpoint: Option<i64>,
}

/// Harvests one channel at a time against injected stores and source.
pub struct ChannelHarvester<'a> {
    source: &'a dyn ChannelSource,
    records: &'a dyn RecordStore,
    checkpoints: &'a dyn CheckpointStore,
    downloader: &'a dyn MediaDownloader,
    limits: HarvestConfig,
    paths: PathsConfig,
}

impl<'a> ChannelHarvester<'a> {
    pub fn new(
        source: &'a dyn ChannelSource,
        records: &'a dyn RecordStore,
        checkpoints: &'a dyn CheckpointStore,
        downloader: &'a dyn MediaDownloader,
        limits: HarvestConfig,
        paths: PathsConfig,
    ) -> Self {
        Self {
            source,
            records,
            checkpoints,
            downloader,
            limits,
            paths,
        }
    }

    /// Harvest `channel`, writing under the `run_date` partition.
    pub async fn harvest(&self, channel: &Channel, run_date: NaiveDate) -> Result<ChannelSummary> {
        let existing = self.records.load_latest(&channel.name).await?;
        let previous_checkpoint = self.checkpoints.get_checkpoint(&channel.name).await?;

        let request = FetchRequest {
            min_id: previous_checkpoint,
            limit: self.limits.fetch_limit,
        };
        let mut fetched = self.source.fetch(channel, request).await?;
        // never trust the source to honor the cap
        fetched.truncate(self.limits.fetch_limit);
        let fetched_count = fetched.len();

        let known = id_set(&existing);
        fetched.retain(|item| !known.contains(&item.record.id));

        let mut candidates = Vec::new();
        let mut fresh = Vec::with_capacity(fetched.len());
        for item in fetched {
            if let Some(photo) = item.photo {
                candidates.push(MediaCandidate {
                    record_id: item.record.id,
                    attachment: photo,
                });
            }
            fresh.push(item.record);
        }
        let new_records = fresh.len();

        let merged = merge_records(existing, fresh);
        let preprocessed = preprocess(&merged);
        let write = self
            .records
            .write_partition(run_date, &channel.name, &merged, &preprocessed)
            .await?;

        let dest_dir = self.paths.media_partition(run_date, &channel.name);
        let batch = MediaFetcher::new(self.downloader, self.limits.media_download_limit)
            .fetch(&candidates, &dest_dir)
            .await;

        let mut checkpoint = previous_checkpoint;
        if let Some(top) = max_id(&merged) {
            if previous_checkpoint.is_none_or(|prev| top > prev) {
                self.checkpoints.set_checkpoint(&channel.name, top).await?;
                checkpoint = Some(top);
            }
        }

        let summary = ChannelSummary {
            channel: channel.name.clone(),
            fetched: fetched_count,
            new_records,
            total_records: write.record_count,
            preprocessed: write.preprocessed_count,
            images_downloaded: batch.downloaded(),
            image_failures: batch.failed(),
            previous_checkpoint,
            checkpoint,
        };
        log::info!(
            "Scraped {} new messages, {} preprocessed, and {} images from {}",
            summary.new_records,
            summary.preprocessed,
            summary.images_downloaded,
            channel.url
        );
        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::error::AppError;
    use crate::models::{Record, sample_record};
    use crate::services::{FetchedRecord, MediaAttachment};
    use crate::storage::MemoryStorage;

    /// Source returning a fixed list per channel and remembering requests.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        pub records: Mutex<HashMap<String, Vec<FetchedRecord>>>,
        pub failing: HashSet<String>,
        pub requests: Mutex<Vec<(String, FetchRequest)>>,
    }

    impl ScriptedSource {
        pub async fn set(&self, channel: &str, records: Vec<FetchedRecord>) {
            self.records.lock().await.insert(channel.to_string(), records);
        }
    }

    #[async_trait]
    impl ChannelSource for ScriptedSource {
        async fn fetch(&self, channel: &Channel, request: FetchRequest) -> Result<Vec<FetchedRecord>> {
            self.requests
                .lock()
                .await
                .push((channel.name.clone(), request));
            if self.failing.contains(&channel.name) {
                return Err(AppError::fetch(&channel.name, "connection refused"));
            }
            let mut records = self
                .records
                .lock()
                .await
                .get(&channel.name)
                .cloned()
                .unwrap_or_default();
            records.sort_by(|a, b| b.record.id.cmp(&a.record.id));
            Ok(records)
        }
    }

    /// Downloader that succeeds for every candidate and records ids.
    #[derive(Default)]
    pub(crate) struct RecordingDownloader {
        pub downloaded: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl MediaDownloader for RecordingDownloader {
        async fn download(
            &self,
            record_id: i64,
            _attachment: &MediaAttachment,
            dest_dir: &Path,
        ) -> Result<PathBuf> {
            self.downloaded.lock().await.push(record_id);
            Ok(dest_dir.join(format!("{record_id}.jpg")))
        }
    }

    pub(crate) fn fetched(id: i64, text: Option<&str>, photo: bool) -> FetchedRecord {
        FetchedRecord {
            record: sample_record(id, text, photo),
            photo: photo.then(|| MediaAttachment {
                url: format!("https://cdn.example.org/{id}.jpg"),
            }),
        }
    }

    pub(crate) fn channel(name: &str) -> Channel {
        Channel::parse(name, "https://t.me").unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().map(|r| r.id).collect()
    }

    struct Fixture {
        source: ScriptedSource,
        storage: MemoryStorage,
        downloader: RecordingDownloader,
        limits: HarvestConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                source: ScriptedSource::default(),
                storage: MemoryStorage::new(),
                downloader: RecordingDownloader::default(),
                limits: HarvestConfig::default(),
            }
        }

        fn harvester(&self) -> ChannelHarvester<'_> {
            ChannelHarvester::new(
                &self.source,
                &self.storage,
                &self.storage,
                &self.downloader,
                self.limits,
                PathsConfig::default(),
            )
        }
    }

    #[tokio::test]
    async fn test_first_harvest() {
        let fx = Fixture::new();
        fx.source
            .set(
                "X",
                vec![
                    fetched(10, None, false),
                    fetched(11, Some("hello"), false),
                    fetched(12, Some("Amoxicillin now available"), true),
                ],
            )
            .await;

        let summary = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();

        let full = fx.storage.load_partition(day(1), "X").await.unwrap().unwrap();
        let pre = fx.storage.load_preprocessed(day(1), "X").await.unwrap().unwrap();
        assert_eq!(ids(&full), vec![12, 11, 10]);
        assert_eq!(ids(&pre), vec![12]);
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), Some(12));
        assert_eq!(*fx.downloader.downloaded.lock().await, vec![12]);
        assert_eq!(summary.new_records, 3);
        assert_eq!(summary.images_downloaded, 1);
        assert_eq!(summary.checkpoint, Some(12));

        let requests = fx.source.requests.lock().await;
        assert_eq!(requests[0].1, FetchRequest { min_id: None, limit: 500 });
    }

    #[tokio::test]
    async fn test_reharvest_discards_known_ids() {
        let fx = Fixture::new();
        fx.source
            .set("X", vec![fetched(10, None, false), fetched(11, None, false), fetched(12, Some("t"), true)])
            .await;
        fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();

        fx.source
            .set(
                "X",
                vec![
                    fetched(10, None, false),
                    fetched(11, None, false),
                    fetched(12, Some("t"), true),
                    fetched(13, Some("new stock"), true),
                ],
            )
            .await;
        let summary = fx.harvester().harvest(&channel("X"), day(2)).await.unwrap();

        assert_eq!(summary.fetched, 4);
        assert_eq!(summary.new_records, 1);
        let full = fx.storage.load_partition(day(2), "X").await.unwrap().unwrap();
        assert_eq!(ids(&full), vec![13, 12, 11, 10]);
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), Some(13));
        // only the newly fetched photo is downloaded
        assert_eq!(*fx.downloader.downloaded.lock().await, vec![12, 13]);

        let requests = fx.source.requests.lock().await;
        assert_eq!(requests[1].1.min_id, Some(12));
    }

    #[tokio::test]
    async fn test_idempotent_reharvest() {
        let fx = Fixture::new();
        fx.source
            .set("X", vec![fetched(5, Some("a"), true), fetched(6, None, false)])
            .await;

        fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();
        let first = fx.storage.load_latest("X").await.unwrap();
        let first_checkpoint = fx.storage.get_checkpoint("X").await.unwrap();

        let summary = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();
        let second = fx.storage.load_latest("X").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), first_checkpoint);
        assert_eq!(summary.new_records, 0);
        assert_eq!(summary.images_downloaded, 0);
    }

    #[tokio::test]
    async fn test_empty_channel_leaves_checkpoint_untouched() {
        let fx = Fixture::new();
        let summary = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();

        assert_eq!(summary.checkpoint, None);
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), None);
        assert_eq!(fx.storage.partition_count("X").await, 1);
    }

    #[tokio::test]
    async fn test_checkpoint_never_decreases() {
        let fx = Fixture::new();
        fx.storage.set_checkpoint("X", 50).await.unwrap();
        // snapshot lost; source still returns older ids
        fx.source.set("X", vec![fetched(20, None, false)]).await;

        let summary = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();

        assert_eq!(summary.checkpoint, Some(50));
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_checkpoint() {
        let fx = Fixture::new();
        fx.storage.set_checkpoint("X", 12).await.unwrap();
        fx.source.set("X", vec![fetched(13, Some("t"), true)]).await;
        fx.storage.fail_record_writes(true);

        let err = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap_err();

        assert!(matches!(err, AppError::Storage { .. }));
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), Some(12));
        assert!(fx.downloader.downloaded.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_write_failure_then_rerun() {
        let fx = Fixture::new();
        fx.source
            .set("X", vec![fetched(11, None, false), fetched(12, Some("in stock"), true)])
            .await;
        fx.storage.fail_checkpoint_writes(true);

        let err = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap_err();

        // partition landed, cursor did not
        assert!(matches!(err, AppError::Storage { .. }));
        assert_eq!(fx.storage.partition_count("X").await, 1);
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), None);
        let first = fx.storage.load_latest("X").await.unwrap();
        assert_eq!(ids(&first), vec![12, 11]);

        fx.storage.fail_checkpoint_writes(false);
        let summary = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();

        assert_eq!(summary.previous_checkpoint, None);
        assert_eq!(summary.new_records, 0);
        assert_eq!(fx.storage.load_latest("X").await.unwrap(), first);
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), Some(12));
        assert_eq!(summary.checkpoint, Some(12));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_checkpoint() {
        let mut fx = Fixture::new();
        fx.source.failing.insert("X".to_string());
        fx.storage.set_checkpoint("X", 7).await.unwrap();

        let err = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap_err();

        assert!(matches!(err, AppError::Fetch { .. }));
        assert_eq!(fx.storage.get_checkpoint("X").await.unwrap(), Some(7));
        assert_eq!(fx.storage.partition_count("X").await, 0);
    }

    #[tokio::test]
    async fn test_caps_fetch_and_downloads() {
        let mut fx = Fixture::new();
        fx.limits = HarvestConfig {
            fetch_limit: 500,
            media_download_limit: 100,
        };
        fx.source
            .set("X", (1..=600).map(|id| fetched(id, Some("t"), true)).collect())
            .await;

        let summary = fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();

        assert_eq!(summary.fetched, 500);
        assert_eq!(summary.total_records, 500);
        assert_eq!(summary.images_downloaded, 100);
        assert_eq!(fx.downloader.downloaded.lock().await.len(), 100);
        // newest first
        assert_eq!(fx.downloader.downloaded.lock().await[0], 600);
        assert_eq!(summary.checkpoint, Some(600));
    }

    #[tokio::test]
    async fn test_preprocessed_subset_law() {
        let fx = Fixture::new();
        fx.source
            .set(
                "X",
                vec![
                    fetched(1, Some("a"), true),
                    fetched(2, Some(""), true),
                    fetched(3, None, true),
                    fetched(4, Some("b"), false),
                    fetched(5, Some("c"), true),
                ],
            )
            .await;

        fx.harvester().harvest(&channel("X"), day(1)).await.unwrap();

        let full = fx.storage.load_partition(day(1), "X").await.unwrap().unwrap();
        let pre = fx.storage.load_preprocessed(day(1), "X").await.unwrap().unwrap();
        let expected: Vec<Record> = full.iter().filter(|r| r.is_preprocessable()).cloned().collect();
        assert_eq!(pre, expected);
        assert_eq!(ids(&pre), vec![5, 1]);
    }

    #[tokio::test]
    async fn test_no_duplicate_ids_across_runs() {
        let fx = Fixture::new();
        fx.source
            .set("X", (1..=30).map(|id| fetched(id, None, false)).collect())
            .await;
        for d in 1..=3 {
            fx.harvester().harvest(&channel("X"), day(d)).await.unwrap();
        }

        let full = fx.storage.load_latest("X").await.unwrap();
        let unique: HashSet<i64> = full.iter().map(|r| r.id).collect();
        assert_eq!(unique.len(), full.len());
        assert_eq!(full.len(), 30);
    }
}
