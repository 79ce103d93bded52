//! Channel feed abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Channel, Record};

/// Fetch window for one harvest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRequest {
    /// Only records with an id above this cursor are wanted
    pub min_id: Option<i64>,
    /// Hard cap on returned records
    pub limit: usize,
}

/// A fetchable photo attached to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub url: String,
}

/// A record as returned by the source, with its downloadable photo if any.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    pub record: Record,
    pub photo: Option<MediaAttachment>,
}

/// Pull interface over an external channel feed.
///
/// Implementations yield records newest first and never return more than
/// `request.limit` of them. They may return records at or below the cursor;
/// the harvester discards those.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    async fn fetch(&self, channel: &Channel, request: FetchRequest) -> Result<Vec<FetchedRecord>>;
}
