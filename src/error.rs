// src/error.rs

//! Unified error handling for the harvester.
//!
//! Variants mirror the failure units of the pipeline: a `Fetch` or `Storage`
//! error aborts one channel, a `MediaDownload` error skips one attachment,
//! and `Detection` / `Precondition` errors skip one image.

use std::fmt;

use thiserror::Error;

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// External source unreachable or returned something unparsable
    #[error("Fetch error for {channel}: {message}")]
    Fetch { channel: String, message: String },

    /// Checkpoint or record store read/write failed
    #[error("Storage error at {location}: {message}")]
    Storage { location: String, message: String },

    /// A single media attachment could not be downloaded
    #[error("Media download failed for record {record_id}: {message}")]
    MediaDownload { record_id: i64, message: String },

    /// Object detection failed for a single image
    #[error("Detection failed for {path}: {message}")]
    Detection { path: String, message: String },

    /// Image missing or empty before inference
    #[error("Precondition failed for {path}: {message}")]
    Precondition { path: String, message: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Blocking worker panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    /// Create a fetch error for a channel.
    pub fn fetch(channel: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            channel: channel.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage error with the location that failed.
    pub fn storage(location: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Storage {
            location: location.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a media download error.
    pub fn media_download(record_id: i64, message: impl fmt::Display) -> Self {
        Self::MediaDownload {
            record_id,
            message: message.to_string(),
        }
    }

    /// Create a detection error for an image.
    pub fn detection(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Detection {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a precondition error for an image.
    pub fn precondition(path: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Precondition {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
