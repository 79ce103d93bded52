//! Service layer for the harvester.
//!
//! This module contains the external collaborators:
//! - Channel feeds (`ChannelSource`, `TelegramWebSource`)
//! - Media retrieval (`MediaDownloader`, `MediaFetcher`)
//! - Object detection (`Detector`, `YoloDetector`)

pub mod detector;
pub mod media;
pub mod source;
pub mod telegram;

pub use detector::Detector;
#[cfg(feature = "detect")]
pub use detector::YoloDetector;
pub use media::{
    DownloadOutcome, HttpMediaDownloader, MediaBatch, MediaCandidate, MediaDownloader,
    MediaFetcher,
};
pub use source::{ChannelSource, FetchRequest, FetchedRecord, MediaAttachment};
pub use telegram::{PageFetcher, TelegramWebSource};
