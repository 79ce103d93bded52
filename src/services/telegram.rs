// src/services/telegram.rs

//! Channel feed over the public Telegram web preview.
//!
//! `https://t.me/s/<channel>` renders the newest ~20 posts of a public
//! channel; `?before=<id>` pages further back. Each post is a
//! `div.tgme_widget_message` carrying `data-post="<channel>/<id>"`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{AppError, Result};
use crate::models::{Channel, Record, SourceConfig};
use crate::services::source::{ChannelSource, FetchRequest, FetchedRecord, MediaAttachment};
use crate::utils::http;

const MESSAGE_SELECTOR: &str = "div.tgme_widget_message[data-post]";
const TEXT_SELECTOR: &str = "div.tgme_widget_message_text";
const TIME_SELECTOR: &str = ".tgme_widget_message_date time[datetime]";
const REPLY_SELECTOR: &str = ".tgme_widget_message_reply";
const PHOTO_SELECTOR: &str = "a.tgme_widget_message_photo_wrap";
const MEDIA_SELECTOR: &str = ".tgme_widget_message_photo_wrap, \
     .tgme_widget_message_video_player, \
     .tgme_widget_message_roundvideo_player, \
     .tgme_widget_message_document, \
     .tgme_widget_message_voice, \
     .tgme_widget_message_sticker_wrap";
const CHANNEL_INFO_SELECTOR: &str = ".tgme_channel_info";

/// Timestamp layout written to records.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

struct PageSelectors {
    message: Selector,
    text: Selector,
    time: Selector,
    reply: Selector,
    photo: Selector,
    media: Selector,
    channel_info: Selector,
}

impl PageSelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            message: parse_selector(MESSAGE_SELECTOR)?,
            text: parse_selector(TEXT_SELECTOR)?,
            time: parse_selector(TIME_SELECTOR)?,
            reply: parse_selector(REPLY_SELECTOR)?,
            photo: parse_selector(PHOTO_SELECTOR)?,
            media: parse_selector(MEDIA_SELECTOR)?,
            channel_info: parse_selector(CHANNEL_INFO_SELECTOR)?,
        })
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Channel source backed by the `t.me/s/` web preview.
pub struct TelegramWebSource {
    client: Client,
    base_url: String,
    request_delay: Duration,
    selectors: PageSelectors,
    background_url: Regex,
}

impl TelegramWebSource {
    /// Create a source using the given client and settings.
    pub fn new(client: Client, config: &SourceConfig) -> Result<Self> {
        let background_url = Regex::new(r#"background-image:\s*url\(['"]?([^'")]+)['"]?\)"#)
            .map_err(|e| AppError::config(format!("Invalid photo URL pattern: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_delay: Duration::from_millis(config.request_delay_ms),
            selectors: PageSelectors::new()?,
            background_url,
        })
    }

    fn page_url(&self, channel: &Channel, before: Option<i64>) -> String {
        match before {
            Some(id) => format!("{}/s/{}?before={}", self.base_url, channel.name, id),
            None => format!("{}/s/{}", self.base_url, channel.name),
        }
    }

    /// Parse every post on one preview page, in page order.
    fn parse_page(&self, document: &Html, channel: &Channel) -> Vec<FetchedRecord> {
        document
            .select(&self.selectors.message)
            .filter_map(|post| self.parse_post(&post, channel))
            .collect()
    }

    fn parse_post(&self, post: &ElementRef, channel: &Channel) -> Option<FetchedRecord> {
        let data_post = post.value().attr("data-post")?;
        let id = match data_post.rsplit_once('/').map(|(_, id)| id.parse::<i64>()) {
            Some(Ok(id)) => id,
            _ => {
                log::debug!("Skipping post with unexpected data-post '{data_post}'");
                return None;
            }
        };

        let text = post.select(&self.selectors.text).next().map(element_text);

        let timestamp = post
            .select(&self.selectors.time)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .map(normalize_timestamp)
            .unwrap_or_default();

        let photo = post
            .select(&self.selectors.photo)
            .next()
            .and_then(|a| a.value().attr("style"))
            .and_then(|style| self.background_url.captures(style))
            .and_then(|caps| caps.get(1))
            .map(|url| MediaAttachment {
                url: url.as_str().to_string(),
            });

        let has_media = photo.is_some() || post.select(&self.selectors.media).next().is_some();
        let is_reply = post.select(&self.selectors.reply).next().is_some();

        Some(FetchedRecord {
            record: Record {
                id,
                timestamp,
                text,
                has_media,
                channel_name: channel.name.clone(),
                channel_url: channel.url.clone(),
                sender_id: None,
                is_reply,
            },
            photo,
        })
    }
}

/// Text content of an element with `<br>` turned into newlines.
fn element_text(element: ElementRef) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn normalize_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Append a newest-first page to `out`, honoring the fetch window.
///
/// Returns `false` once the window is exhausted: the limit was reached or a
/// record at or below the cursor was seen.
fn take_window(page: Vec<FetchedRecord>, request: FetchRequest, out: &mut Vec<FetchedRecord>) -> bool {
    for item in page {
        if out.len() >= request.limit {
            return false;
        }
        if request.min_id.is_some_and(|min| item.record.id <= min) {
            return false;
        }
        // overlapping pages
        if out.last().is_some_and(|last| item.record.id >= last.record.id) {
            continue;
        }
        out.push(item);
    }
    out.len() < request.limit
}

/// Retrieves one preview page as HTML.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<String>;
}

#[async_trait]
impl PageFetcher for Client {
    async fn fetch_page(&self, url: &str) -> Result<String> {
        http::fetch_text(self, url).await
    }
}

impl TelegramWebSource {
    /// Page backwards through the preview until the fetch window is exhausted.
    ///
    /// Stops on an empty page, when a page fails to move the cursor back, or
    /// once the oldest id on a page is 1. A first page without posts or
    /// channel info means the channel has no public preview.
    async fn collect_pages(
        &self,
        pages: &dyn PageFetcher,
        channel: &Channel,
        request: FetchRequest,
    ) -> Result<Vec<FetchedRecord>> {
        let mut out = Vec::new();
        let mut before: Option<i64> = None;

        loop {
            let url = self.page_url(channel, before);
            log::debug!("Fetching {url}");
            let html = pages
                .fetch_page(&url)
                .await
                .map_err(|e| AppError::fetch(&channel.name, e))?;

            let mut page = {
                let document = Html::parse_document(&html);
                let page = self.parse_page(&document, channel);
                if page.is_empty()
                    && before.is_none()
                    && document.select(&self.selectors.channel_info).next().is_none()
                {
                    return Err(AppError::fetch(
                        &channel.name,
                        "no public preview available for this channel",
                    ));
                }
                page
            };
            if page.is_empty() {
                break;
            }

            page.sort_by(|a, b| b.record.id.cmp(&a.record.id));
            let oldest = page.last().map(|item| item.record.id);

            if !take_window(page, request, &mut out) {
                break;
            }
            match (oldest, before) {
                (Some(oldest), Some(prev)) if oldest >= prev => break,
                (Some(oldest), _) if oldest <= 1 => break,
                (None, _) => break,
                _ => {}
            }
            before = oldest;

            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        log::debug!("Fetched {} records from {}", out.len(), channel.name);
        Ok(out)
    }
}

#[async_trait]
impl ChannelSource for TelegramWebSource {
    async fn fetch(&self, channel: &Channel, request: FetchRequest) -> Result<Vec<FetchedRecord>> {
        self.collect_pages(&self.client, channel, request).await
    }
}
