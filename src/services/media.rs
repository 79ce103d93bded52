// src/services/media.rs

//! Bounded media retrieval.
//!
//! [`MediaFetcher`] walks candidates in the given order until `limit`
//! downloads succeeded. A failed download is logged and skipped; it neither
//! aborts the batch nor consumes a slot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::services::source::MediaAttachment;
use crate::utils::{fs::write_atomic, http};

/// Stores one attachment under a destination directory.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download `attachment` for record `record_id` into `dest_dir`, returning the written path.
    async fn download(
        &self,
        record_id: i64,
        attachment: &MediaAttachment,
        dest_dir: &Path,
    ) -> Result<PathBuf>;
}

/// Downloads attachments over HTTP and names them `{record_id}.{ext}`.
pub struct HttpMediaDownloader {
    client: Client,
}

impl HttpMediaDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// File extension for an attachment URL, `jpg` when none is recognizable.
    fn extension(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| {
                Path::new(u.path())
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_ascii_lowercase)
            })
            .filter(|ext| !ext.is_empty() && ext.len() <= 4 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "jpg".to_string())
    }
}

#[async_trait]
impl MediaDownloader for HttpMediaDownloader {
    async fn download(
        &self,
        record_id: i64,
        attachment: &MediaAttachment,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let bytes = http::fetch_bytes(&self.client, &attachment.url)
            .await
            .map_err(|e| AppError::media_download(record_id, e))?;
        if bytes.is_empty() {
            return Err(AppError::media_download(record_id, "empty response body"));
        }

        let path = dest_dir.join(format!("{}.{}", record_id, Self::extension(&attachment.url)));
        write_atomic(&path, &bytes)
            .await
            .map_err(|e| AppError::media_download(record_id, e))?;
        Ok(path)
    }
}

/// A record id paired with the attachment to download.
#[derive(Debug, Clone)]
pub struct MediaCandidate {
    pub record_id: i64,
    pub attachment: MediaAttachment,
}

/// Per-candidate result.
#[derive(Debug)]
pub enum DownloadOutcome {
    Downloaded(PathBuf),
    Failed(AppError),
}

/// Summary of one bounded download batch.
#[derive(Debug, Default)]
pub struct MediaBatch {
    /// Outcome per attempted candidate, in attempt order
    pub outcomes: Vec<(i64, DownloadOutcome)>,
    /// Candidates never attempted because the limit was reached
    pub not_attempted: usize,
}

impl MediaBatch {
    pub fn downloaded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, DownloadOutcome::Downloaded(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.downloaded()
    }
}

/// Applies the per-run download cap on top of a [`MediaDownloader`].
pub struct MediaFetcher<'a> {
    downloader: &'a dyn MediaDownloader,
    limit: usize,
}

impl<'a> MediaFetcher<'a> {
    pub fn new(downloader: &'a dyn MediaDownloader, limit: usize) -> Self {
        Self { downloader, limit }
    }

    /// Download candidates in order until `limit` succeeded or candidates run out.
    pub async fn fetch(&self, candidates: &[MediaCandidate], dest_dir: &Path) -> MediaBatch {
        let mut batch = MediaBatch::default();
        let mut downloaded = 0;

        for (index, candidate) in candidates.iter().enumerate() {
            if downloaded >= self.limit {
                batch.not_attempted = candidates.len() - index;
                break;
            }
            let outcome = match self
                .downloader
                .download(candidate.record_id, &candidate.attachment, dest_dir)
                .await
            {
                Ok(path) => {
                    downloaded += 1;
                    DownloadOutcome::Downloaded(path)
                }
                Err(e) => {
                    log::error!("Failed to download image {}: {}", candidate.record_id, e);
                    DownloadOutcome::Failed(e)
                }
            };
            batch.outcomes.push((candidate.record_id, outcome));
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    /// Records attempts; fails for ids in `failing`.
    #[derive(Default)]
    struct ScriptedDownloader {
        failing: HashSet<i64>,
        attempts: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl MediaDownloader for ScriptedDownloader {
        async fn download(
            &self,
            record_id: i64,
            _attachment: &MediaAttachment,
            dest_dir: &Path,
        ) -> Result<PathBuf> {
            self.attempts.lock().await.push(record_id);
            if self.failing.contains(&record_id) {
                return Err(AppError::media_download(record_id, "boom"));
            }
            Ok(dest_dir.join(format!("{record_id}.jpg")))
        }
    }

    fn candidates(ids: impl IntoIterator<Item = i64>) -> Vec<MediaCandidate> {
        ids.into_iter()
            .map(|record_id| MediaCandidate {
                record_id,
                attachment: MediaAttachment {
                    url: format!("https://cdn.example.org/{record_id}.jpg"),
                },
            })
            .collect()
    }

    #[tokio::test]
    async fn test_stops_at_limit() {
        let downloader = ScriptedDownloader::default();
        let fetcher = MediaFetcher::new(&downloader, 100);

        let batch = fetcher.fetch(&candidates(1..=150), Path::new("media")).await;

        assert_eq!(batch.downloaded(), 100);
        assert_eq!(batch.not_attempted, 50);
        assert_eq!(downloader.attempts.lock().await.len(), 100);
    }

    #[tokio::test]
    async fn test_failures_do_not_consume_slots() {
        let downloader = ScriptedDownloader {
            failing: [2, 3].into_iter().collect(),
            ..Default::default()
        };
        let fetcher = MediaFetcher::new(&downloader, 3);

        let batch = fetcher.fetch(&candidates(1..=6), Path::new("media")).await;

        assert_eq!(batch.downloaded(), 3);
        assert_eq!(batch.failed(), 2);
        assert_eq!(batch.not_attempted, 1);
        assert_eq!(*downloader.attempts.lock().await, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_exhausts_candidates_below_limit() {
        let downloader = ScriptedDownloader {
            failing: [1].into_iter().collect(),
            ..Default::default()
        };
        let fetcher = MediaFetcher::new(&downloader, 100);

        let batch = fetcher.fetch(&candidates([1, 2]), Path::new("media")).await;

        assert_eq!(batch.downloaded(), 1);
        assert_eq!(batch.not_attempted, 0);
    }

    #[test]
    fn test_extension_from_url() {
        assert_eq!(HttpMediaDownloader::extension("https://cdn.example.org/file/a.PNG"), "png");
        assert_eq!(HttpMediaDownloader::extension("https://cdn.example.org/file/a.jpg?x=1"), "jpg");
        assert_eq!(HttpMediaDownloader::extension("https://cdn.example.org/file/abc"), "jpg");
        assert_eq!(HttpMediaDownloader::extension("not a url"), "jpg");
    }
}
