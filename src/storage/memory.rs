//! In-memory storage.
//!
//! Implements both store traits over hash maps. Backs the pipeline tests;
//! under `cfg(test)` write failures can be switched on to exercise the
//! crash-safety paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::Record;
use crate::storage::{CheckpointStore, PartitionWrite, RecordStore};

#[derive(Debug, Clone, Default)]
struct Partition {
    records: Vec<Record>,
    preprocessed: Vec<Record>,
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    checkpoints: Mutex<HashMap<String, i64>>,
    partitions: Mutex<BTreeMap<(String, NaiveDate), Partition>>,
    fail_record_writes: AtomicBool,
    fail_checkpoint_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write_partition` fail.
    #[cfg(test)]
    pub fn fail_record_writes(&self, fail: bool) {
        self.fail_record_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set_checkpoint` fail.
    #[cfg(test)]
    pub fn fail_checkpoint_writes(&self, fail: bool) {
        self.fail_checkpoint_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of partitions written for a channel.
    pub async fn partition_count(&self, channel: &str) -> usize {
        self.partitions
            .lock()
            .await
            .keys()
            .filter(|(c, _)| c == channel)
            .count()
    }
}

#[async_trait]
impl CheckpointStore for MemoryStorage {
    async fn get_checkpoint(&self, channel: &str) -> Result<Option<i64>> {
        Ok(self.checkpoints.lock().await.get(channel).copied())
    }

    async fn set_checkpoint(&self, channel: &str, id: i64) -> Result<()> {
        if self.fail_checkpoint_writes.load(Ordering::SeqCst) {
            return Err(AppError::storage(
                format!("memory://checkpoints/{channel}"),
                "write disabled",
            ));
        }
        self.checkpoints.lock().await.insert(channel.to_string(), id);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStorage {
    async fn latest_partition_date(&self, channel: &str) -> Result<Option<NaiveDate>> {
        Ok(self
            .partitions
            .lock()
            .await
            .keys()
            .filter(|(c, _)| c == channel)
            .map(|(_, date)| *date)
            .max())
    }

    async fn load_partition(&self, date: NaiveDate, channel: &str) -> Result<Option<Vec<Record>>> {
        Ok(self
            .partitions
            .lock()
            .await
            .get(&(channel.to_string(), date))
            .map(|p| p.records.clone()))
    }

    async fn load_preprocessed(
        &self,
        date: NaiveDate,
        channel: &str,
    ) -> Result<Option<Vec<Record>>> {
        Ok(self
            .partitions
            .lock()
            .await
            .get(&(channel.to_string(), date))
            .map(|p| p.preprocessed.clone()))
    }

    async fn write_partition(
        &self,
        date: NaiveDate,
        channel: &str,
        records: &[Record],
        preprocessed: &[Record],
    ) -> Result<PartitionWrite> {
        let location = format!("memory://{date}/{channel}");
        if self.fail_record_writes.load(Ordering::SeqCst) {
            return Err(AppError::storage(location, "write disabled"));
        }
        self.partitions.lock().await.insert(
            (channel.to_string(), date),
            Partition {
                records: records.to_vec(),
                preprocessed: preprocessed.to_vec(),
            },
        );
        Ok(PartitionWrite {
            record_count: records.len(),
            preprocessed_count: preprocessed.len(),
            location,
        })
    }
}
