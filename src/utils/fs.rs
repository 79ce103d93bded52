// src/utils/fs.rs

//! Atomic file writes.
//!
//! Every artifact is written to a sibling `*.tmp` file and renamed into
//! place, so readers never observe a partially written file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Temporary sibling used while `path` is being written.
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("out"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write bytes atomically (write to temp, then rename).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = tmp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Write pretty JSON atomically.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes).await
}

/// Blocking variant of [`write_atomic`] for code already on a blocking thread.
pub fn write_atomic_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Blocking variant of [`write_json_atomic`].
pub fn write_json_atomic_sync<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic_sync(path, &bytes)
}
