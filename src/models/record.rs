//! Harvested record and checkpoint structures.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// One message harvested from a channel.
///
/// Serialized field names follow the on-disk format consumed by the batch
/// loaders (`date`, `media`), so the Rust names differ for two fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    /// Source-assigned message id, unique within the channel
    pub id: i64,

    /// Publication timestamp as reported by the source
    #[serde(rename = "date")]
    pub timestamp: String,

    /// Message text; `None` when the message carries no text at all
    pub text: Option<String>,

    /// Whether the message carries any media attachment
    #[serde(rename = "media")]
    pub has_media: bool,

    /// Channel short name
    pub channel_name: String,

    /// Channel URL
    pub channel_url: String,

    /// Sender id when the source exposes one
    #[serde(default)]
    pub sender_id: Option<i64>,

    /// Whether the message replies to another one
    #[serde(default)]
    pub is_reply: bool,
}

impl Record {
    /// Whether this record belongs in the preprocessed subset.
    pub fn is_preprocessable(&self) -> bool {
        self.has_media && self.text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Union two record sets, dropping duplicate ids, sorted descending by id.
///
/// For a repeated id the copy from `existing` is kept.
pub fn merge_records(existing: Vec<Record>, fresh: Vec<Record>) -> Vec<Record> {
    let mut by_id: BTreeMap<i64, Record> = BTreeMap::new();
    for record in existing.into_iter().chain(fresh) {
        by_id.entry(record.id).or_insert(record);
    }
    by_id.into_values().rev().collect()
}

/// Filter the preprocessed subset out of a full record set.
pub fn preprocess(records: &[Record]) -> Vec<Record> {
    records
        .iter()
        .filter(|r| r.is_preprocessable())
        .cloned()
        .collect()
}

/// Highest id in a record set.
pub fn max_id(records: &[Record]) -> Option<i64> {
    records.iter().map(|r| r.id).max()
}

/// Ids present in a record set.
pub fn id_set(records: &[Record]) -> HashSet<i64> {
    records.iter().map(|r| r.id).collect()
}

/// Persisted per-channel cursor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub last_id: i64,
}

#[cfg(test)]
pub(crate) fn sample_record(id: i64, text: Option<&str>, has_media: bool) -> Record {
    Record {
        id,
        timestamp: "2025-03-01 08:00:00+00:00".to_string(),
        text: text.map(str::to_string),
        has_media,
        channel_name: "CheMed123".to_string(),
        channel_url: "https://t.me/CheMed123".to_string(),
        sender_id: None,
        is_reply: false,
    }
}
