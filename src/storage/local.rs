//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {checkpoint_dir}/{channel}.json
//! {raw_dir}/{YYYY-MM-DD}/{channel}.json
//! {preprocessed_dir}/{YYYY-MM-DD}/{channel}_preprocessed.json
//! ```
//!
//! All writes go through [`write_json_atomic`], so a crash mid-write leaves
//! the previous file intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AppError, Result};
use crate::models::{Checkpoint, PathsConfig, Record};
use crate::storage::{CheckpointStore, PARTITION_DATE_FORMAT, PartitionWrite, RecordStore};
use crate::utils::fs::write_json_atomic;

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    raw_dir: PathBuf,
    preprocessed_dir: PathBuf,
    checkpoint_dir: PathBuf,
}

impl LocalStorage {
    /// Create a LocalStorage over the configured directories.
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            raw_dir: paths.raw_dir.clone(),
            preprocessed_dir: paths.preprocessed_dir.clone(),
            checkpoint_dir: paths.checkpoint_dir.clone(),
        }
    }

    fn checkpoint_path(&self, channel: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{channel}.json"))
    }

    fn partition_dir(root: &Path, date: NaiveDate) -> PathBuf {
        root.join(date.format(PARTITION_DATE_FORMAT).to_string())
    }

    fn records_path(&self, date: NaiveDate, channel: &str) -> PathBuf {
        Self::partition_dir(&self.raw_dir, date).join(format!("{channel}.json"))
    }

    fn preprocessed_path(&self, date: NaiveDate, channel: &str) -> PathBuf {
        Self::partition_dir(&self.preprocessed_dir, date)
            .join(format!("{channel}_preprocessed.json"))
    }

    /// Read JSON data, returning None if the file doesn't exist.
    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::storage(path.display(), e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::storage(path.display(), e))
    }

    async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
        write_json_atomic(path, value)
            .await
            .map_err(|e| AppError::storage(path.display(), e))
    }
}

#[async_trait]
impl CheckpointStore for LocalStorage {
    async fn get_checkpoint(&self, channel: &str) -> Result<Option<i64>> {
        let checkpoint: Option<Checkpoint> = Self::read_json(&self.checkpoint_path(channel)).await?;
        Ok(checkpoint.map(|c| c.last_id))
    }

    async fn set_checkpoint(&self, channel: &str, id: i64) -> Result<()> {
        Self::write_json(&self.checkpoint_path(channel), &Checkpoint { last_id: id }).await
    }
}

#[async_trait]
impl RecordStore for LocalStorage {
    async fn latest_partition_date(&self, channel: &str) -> Result<Option<NaiveDate>> {
        let mut entries = match tokio::fs::read_dir(&self.raw_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::storage(self.raw_dir.display(), e)),
        };

        let file_name = format!("{channel}.json");
        let mut latest: Option<NaiveDate> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::storage(self.raw_dir.display(), e))?
        {
            let name = entry.file_name();
            let Some(date) = name
                .to_str()
                .and_then(|s| NaiveDate::parse_from_str(s, PARTITION_DATE_FORMAT).ok())
            else {
                continue;
            };
            if latest.is_some_and(|l| l >= date) {
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(&file_name))
                .await
                .unwrap_or(false)
            {
                latest = Some(date);
            }
        }
        Ok(latest)
    }

    async fn load_partition(&self, date: NaiveDate, channel: &str) -> Result<Option<Vec<Record>>> {
        Self::read_json(&self.records_path(date, channel)).await
    }

    async fn load_preprocessed(
        &self,
        date: NaiveDate,
        channel: &str,
    ) -> Result<Option<Vec<Record>>> {
        Self::read_json(&self.preprocessed_path(date, channel)).await
    }

    async fn write_partition(
        &self,
        date: NaiveDate,
        channel: &str,
        records: &[Record],
        preprocessed: &[Record],
    ) -> Result<PartitionWrite> {
        let records_path = self.records_path(date, channel);
        Self::write_json(&records_path, records).await?;
        Self::write_json(&self.preprocessed_path(date, channel), preprocessed).await?;

        log::debug!(
            "Wrote {} records ({} preprocessed) to {}",
            records.len(),
            preprocessed.len(),
            records_path.display()
        );

        Ok(PartitionWrite {
            record_count: records.len(),
            preprocessed_count: preprocessed.len(),
            location: records_path.display().to_string(),
        })
    }
}
