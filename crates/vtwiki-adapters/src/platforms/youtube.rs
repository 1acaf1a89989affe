//! YouTube Data API v3 client with a channel-page scrape fallback.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;
use vtwiki_core::{ChannelType, Video};
use vtwiki_storage::{HttpFetcher, HttpRequest};

use super::duration::parse_iso8601;
use super::{collect_recent, path_segments, video_cutoff, ChannelInfo, PlatformClient};
use crate::error::AdapterError;

const SOURCE_ID: &str = "youtube";
const PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct YoutubeConfig {
    pub api_base: String,
    pub web_base: String,
    pub api_key: String,
    pub max_age: TimeDelta,
}

impl YoutubeConfig {
    pub fn new(api_key: impl Into<String>, max_age: TimeDelta) -> Self {
        Self {
            api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            web_base: "https://www.youtube.com".to_string(),
            api_key: api_key.into(),
            max_age,
        }
    }
}

/// How a wiki channel URL names the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChannelRef<'a> {
    Id(&'a str),
    Handle(&'a str),
    Username(&'a str),
    /// `/c/<name>` and bare `/<name>` custom URLs; only the web page resolves these.
    Custom(&'a str),
}

impl<'a> ChannelRef<'a> {
    fn parse(identifier: &'a str) -> Self {
        if let Some(id) = identifier.strip_prefix("channel/") {
            ChannelRef::Id(id)
        } else if identifier.starts_with('@') {
            ChannelRef::Handle(identifier)
        } else if let Some(name) = identifier.strip_prefix("user/") {
            ChannelRef::Username(name)
        } else {
            ChannelRef::Custom(identifier)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    snippet: ChannelSnippet,
    #[serde(default)]
    statistics: Option<ChannelStatistics>,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    #[serde(default)]
    subscriber_count: Option<String>,
    #[serde(default)]
    hidden_subscriber_count: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    high: Option<Thumbnail>,
    #[serde(default)]
    medium: Option<Thumbnail>,
    #[serde(default)]
    default: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(self) -> Option<String> {
        self.high
            .or(self.medium)
            .or(self.default)
            .map(|thumbnail| thumbnail.url)
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistSnippet,
    #[serde(rename = "contentDetails")]
    content_details: PlaylistContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    title: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistContentDetails {
    video_id: String,
    #[serde(default)]
    video_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    content_details: Option<VideoContentDetails>,
    #[serde(default)]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    #[serde(default)]
    actual_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    actual_end_time: Option<DateTime<Utc>>,
}

/// Uploads playlist id for a `UC...` channel id.
pub fn uploads_playlist_id(channel_id: &str) -> Option<String> {
    channel_id
        .strip_prefix("UC")
        .filter(|rest| !rest.is_empty())
        .map(|rest| format!("UU{rest}"))
}

/// Channel id embedded in a public channel page.
pub fn scrape_channel_id(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let meta = Selector::parse(r#"meta[itemprop="channelId"], meta[itemprop="identifier"]"#).ok()?;
    if let Some(id) = document
        .select(&meta)
        .filter_map(|node| node.value().attr("content"))
        .find(|content| content.starts_with("UC"))
    {
        return Some(id.to_string());
    }
    let canonical = Selector::parse(r#"link[rel="canonical"]"#).ok()?;
    document
        .select(&canonical)
        .filter_map(|node| node.value().attr("href"))
        .find_map(|href| href.split("/channel/").nth(1))
        .map(|id| id.trim_end_matches('/').to_string())
        .filter(|id| id.starts_with("UC"))
}

#[derive(Debug, Clone)]
pub struct YoutubeClient {
    config: YoutubeConfig,
    http: Arc<HttpFetcher>,
}

impl YoutubeClient {
    pub fn new(config: YoutubeConfig, http: Arc<HttpFetcher>) -> Self {
        Self { config, http }
    }

    fn api(&self, resource: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{resource}", self.config.api_base))
            .query("key", &self.config.api_key)
    }

    async fn channels_by(&self, key: &str, value: &str) -> Result<Option<ChannelItem>, AdapterError> {
        let request = self
            .api("channels")
            .query("part", "snippet,statistics")
            .query(key, value);
        let response: ListResponse<ChannelItem> = self.http.get_json(SOURCE_ID, &request).await?;
        Ok(response.items.into_iter().next())
    }

    async fn scrape_fallback(&self, identifier: &str) -> Result<String, AdapterError> {
        let page_url = format!("{}/{}", self.config.web_base, identifier);
        debug!(%page_url, "resolving youtube channel from public page");
        let html = self
            .http
            .get_text(SOURCE_ID, &HttpRequest::get(&page_url))
            .await?;
        scrape_channel_id(&html).ok_or(AdapterError::NotFound(page_url))
    }

    async fn video_details(&self, ids: &[String]) -> Result<Vec<VideoItem>, AdapterError> {
        let mut details = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(PAGE_SIZE) {
            let request = self
                .api("videos")
                .query("part", "contentDetails,liveStreamingDetails")
                .query("id", chunk.join(","));
            let response: ListResponse<VideoItem> = self.http.get_json(SOURCE_ID, &request).await?;
            details.extend(response.items);
        }
        Ok(details)
    }
}

fn channel_info(item: ChannelItem) -> ChannelInfo {
    let subscriber_count = item
        .statistics
        .filter(|stats| !stats.hidden_subscriber_count)
        .and_then(|stats| stats.subscriber_count)
        .and_then(|count| count.parse().ok());
    ChannelInfo {
        id: item.id,
        name: item.snippet.title,
        image: item.snippet.thumbnails.best(),
        subscriber_count,
    }
}

#[async_trait]
impl PlatformClient for YoutubeClient {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Youtube
    }

    /// `channel/<id>`, `@handle`, `user/<name>`, `c/<name>` or `<name>`.
    fn identifier_from_url(&self, url: &str) -> Option<String> {
        let segments = path_segments(url);
        match segments.as_slice() {
            [first, second, ..] if matches!(first.as_str(), "channel" | "user" | "c") => {
                Some(format!("{first}/{second}"))
            }
            [first, ..] if !matches!(first.as_str(), "watch" | "playlist" | "shorts") => {
                Some(first.clone())
            }
            _ => None,
        }
    }

    async fn get_channel(&self, identifier: &str) -> Result<ChannelInfo, AdapterError> {
        let direct = match ChannelRef::parse(identifier) {
            ChannelRef::Id(id) => self.channels_by("id", id).await?,
            ChannelRef::Handle(handle) => self.channels_by("forHandle", handle).await?,
            ChannelRef::Username(name) => self.channels_by("forUsername", name).await?,
            ChannelRef::Custom(_) => None,
        };
        if let Some(item) = direct {
            return Ok(channel_info(item));
        }

        let channel_id = self.scrape_fallback(identifier).await?;
        self.channels_by("id", &channel_id)
            .await?
            .map(channel_info)
            .ok_or_else(|| AdapterError::NotFound(format!("youtube channel {channel_id}")))
    }

    async fn get_videos(&self, channel_id: &str) -> Result<Vec<Video>, AdapterError> {
        let playlist_id = uploads_playlist_id(channel_id)
            .ok_or_else(|| AdapterError::NotFound(format!("youtube channel {channel_id}")))?;
        let cutoff = video_cutoff(self.config.max_age);

        let mut recent = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .api("playlistItems")
                .query("part", "snippet,contentDetails")
                .query("playlistId", &playlist_id)
                .query("maxResults", PAGE_SIZE);
            if let Some(token) = &page_token {
                request = request.query("pageToken", token);
            }
            let response: ListResponse<PlaylistItem> =
                match self.http.get_json(SOURCE_ID, &request).await {
                    Ok(response) => response,
                    // playlistNotFound: the channel has never uploaded.
                    Err(err) if err.is_not_found() && page_token.is_none() => break,
                    Err(err) => return Err(err.into()),
                };

            let page = response.items.into_iter().map(|item| {
                let id = item.content_details.video_id;
                Video {
                    url: format!("https://www.youtube.com/watch?v={id}"),
                    id,
                    title: item.snippet.title,
                    image: item.snippet.thumbnails.best(),
                    start_date: item
                        .content_details
                        .video_published_at
                        .unwrap_or(item.snippet.published_at),
                    end_date: None,
                }
            });
            let reached_cutoff = collect_recent(page, cutoff, &mut recent);
            page_token = response.next_page_token;
            if reached_cutoff || page_token.is_none() {
                break;
            }
        }

        let ids = recent.iter().map(|video| video.id.clone()).collect::<Vec<_>>();
        let details = self.video_details(&ids).await?;
        for video in &mut recent {
            let Some(detail) = details.iter().find(|detail| detail.id == video.id) else {
                continue;
            };
            let live = detail.live_streaming_details.as_ref();
            if let Some(started) = live.and_then(|live| live.actual_start_time) {
                video.start_date = started;
            }
            video.end_date = live.and_then(|live| live.actual_end_time).or_else(|| {
                let duration = detail.content_details.as_ref()?.duration.as_deref()?;
                Some(video.start_date + parse_iso8601(duration)?)
            });
        }
        Ok(recent)
    }
}
