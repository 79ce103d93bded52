//! Channel identity.

use url::Url;

use crate::error::{AppError, Result};

/// A named external channel being harvested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Short name, used as the storage key (e.g., "CheMed123")
    pub name: String,

    /// Public channel URL (e.g., "https://t.me/CheMed123")
    pub url: String,
}

impl Channel {
    /// Build a channel from a config entry.
    ///
    /// Accepts a full URL (`https://t.me/CheMed123`), or a bare name with an
    /// optional leading `@`, which is resolved against `base_url`.
    pub fn parse(entry: &str, base_url: &str) -> Result<Self> {
        let entry = entry.trim();
        if entry.contains("://") {
            let url = Url::parse(entry)?;
            let name = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .ok_or_else(|| AppError::config(format!("Channel URL has no name: {entry}")))?;
            Self::checked(name, entry.trim_end_matches('/'))
        } else {
            let name = entry.trim_start_matches('@');
            let url = format!("{}/{}", base_url.trim_end_matches('/'), name);
            Self::checked(name, &url)
        }
    }

    fn checked(name: &str, url: &str) -> Result<Self> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(AppError::config(format!("Invalid channel name: '{name}'")));
        }
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
        })
    }
}
