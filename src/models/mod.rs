// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod channel;
mod config;
mod detection;
mod record;

// Re-export all public types
pub use channel::Channel;
pub use config::{Config, EnrichConfig, HarvestConfig, LoggingConfig, PathsConfig, SourceConfig};
pub use detection::{BoundingBox, Detection, ObjectDetection, message_id_from_path};
pub use record::{Checkpoint, Record, id_set, max_id, merge_records, preprocess};

#[cfg(test)]
pub(crate) use record::sample_record;
