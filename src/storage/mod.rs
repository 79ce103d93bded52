//! Storage abstractions for harvested records and checkpoints.
//!
//! ## Directory Structure
//!
//! ```text
//! data/
//! ├── last_scraped/                 # Checkpoint per channel
//! │   └── CheMed123.json            #   {"last_id": 4512}
//! ├── raw/telegram_messages/        # Full merged set per run date
//! │   └── 2025-03-01/
//! │       └── CheMed123.json
//! └── preprocessed/                 # text + media subset per run date
//!     └── 2025-03-01/
//!         └── CheMed123_preprocessed.json
//! ```
//!
//! Partitions are keyed by the date of the harvesting run, not by record
//! timestamps. A run merges against the channel's latest partition and
//! writes the result under its own date.

pub mod local;
pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::Record;

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Date format used for partition directory names.
pub const PARTITION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Per-channel cursor persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Highest id already incorporated for the channel, if any harvest succeeded.
    async fn get_checkpoint(&self, channel: &str) -> Result<Option<i64>>;

    /// Store the cursor. Callers never pass a value below the stored one.
    async fn set_checkpoint(&self, channel: &str, id: i64) -> Result<()>;
}

/// Metadata about a partition write.
#[derive(Debug, Clone)]
pub struct PartitionWrite {
    /// Records in the full set
    pub record_count: usize,
    /// Records in the preprocessed subset
    pub preprocessed_count: usize,
    /// Where the full set was written
    pub location: String,
}

/// Dated partitions of harvested records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Most recent run date holding a full set for the channel.
    async fn latest_partition_date(&self, channel: &str) -> Result<Option<NaiveDate>>;

    /// Full set of one partition, `None` if that partition has no file for the channel.
    async fn load_partition(&self, date: NaiveDate, channel: &str) -> Result<Option<Vec<Record>>>;

    /// Preprocessed subset of one partition.
    async fn load_preprocessed(
        &self,
        date: NaiveDate,
        channel: &str,
    ) -> Result<Option<Vec<Record>>>;

    /// Overwrite both views of a channel's partition for `date`.
    async fn write_partition(
        &self,
        date: NaiveDate,
        channel: &str,
        records: &[Record],
        preprocessed: &[Record],
    ) -> Result<PartitionWrite>;

    /// Latest merged snapshot for the channel, empty when none exists.
    async fn load_latest(&self, channel: &str) -> Result<Vec<Record>> {
        match self.latest_partition_date(channel).await? {
            Some(date) => Ok(self.load_partition(date, channel).await?.unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }
}
