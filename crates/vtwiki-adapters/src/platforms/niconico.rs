//! Niconico client: user page scrape for identity, nvapi for videos.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use scraper::{Html, Selector};
use serde::Deserialize;
use vtwiki_core::{ChannelType, Video};
use vtwiki_storage::{HttpFetcher, HttpRequest};

use super::{collect_recent, path_segments, video_cutoff, ChannelInfo, PlatformClient};
use crate::error::AdapterError;

const SOURCE_ID: &str = "niconico";
const PAGE_SIZE: usize = 100;
const FRONTEND_ID: &str = "6";

#[derive(Debug, Clone)]
pub struct NiconicoConfig {
    pub web_base: String,
    pub nvapi_base: String,
    pub max_age: TimeDelta,
}

impl NiconicoConfig {
    pub fn new(max_age: TimeDelta) -> Self {
        Self {
            web_base: "https://www.nicovideo.jp".to_string(),
            nvapi_base: "https://nvapi.nicovideo.jp".to_string(),
            max_age,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InitialData {
    state: UserPageState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPageState {
    user_details: UserDetailsWrapper,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDetailsWrapper {
    user_details: UserDetails,
}

#[derive(Debug, Deserialize)]
struct UserDetails {
    user: NicoUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NicoUser {
    id: serde_json::Value,
    nickname: String,
    #[serde(default)]
    icons: Option<Icons>,
    #[serde(default)]
    follower_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Icons {
    #[serde(default)]
    large: Option<String>,
    #[serde(default)]
    small: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NvapiResponse {
    data: NvapiVideos,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvapiVideos {
    total_count: usize,
    #[serde(default)]
    items: Vec<NvapiItem>,
}

#[derive(Debug, Deserialize)]
struct NvapiItem {
    essential: Essential,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Essential {
    id: String,
    title: String,
    registered_at: DateTime<FixedOffset>,
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    thumbnail: Option<NvapiThumbnail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvapiThumbnail {
    #[serde(default)]
    large_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Parses the `data-initial-data` JSON of `#js-initial-userpage-data`.
/// A page without it belongs to no (public) user.
fn user_from_page(html: &str, user_id: &str) -> Result<ChannelInfo, AdapterError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("#js-initial-userpage-data")
        .map_err(|_| AdapterError::malformed("user page selector"))?;
    let raw = document
        .select(&selector)
        .find_map(|node| node.value().attr("data-initial-data"))
        .ok_or_else(|| AdapterError::NotFound(format!("niconico user {user_id}")))?;

    let data: InitialData = serde_json::from_str(raw)
        .map_err(|err| AdapterError::malformed(format!("niconico user {user_id}: {err}")))?;
    let user = data.state.user_details.user_details.user;
    let id = match user.id {
        serde_json::Value::String(id) => id,
        other => other.to_string(),
    };
    Ok(ChannelInfo {
        id,
        name: user.nickname,
        image: user.icons.and_then(|icons| icons.large.or(icons.small)),
        subscriber_count: user.follower_count,
    })
}

#[derive(Debug, Clone)]
pub struct NiconicoClient {
    config: NiconicoConfig,
    http: Arc<HttpFetcher>,
}

impl NiconicoClient {
    pub fn new(config: NiconicoConfig, http: Arc<HttpFetcher>) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl PlatformClient for NiconicoClient {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Niconico
    }

    /// The numeric id from `nicovideo.jp/user/<id>`.
    fn identifier_from_url(&self, url: &str) -> Option<String> {
        let segments = path_segments(url);
        let position = segments.iter().position(|segment| segment == "user")?;
        segments
            .get(position + 1)
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .cloned()
    }

    async fn get_channel(&self, user_id: &str) -> Result<ChannelInfo, AdapterError> {
        let request = HttpRequest::get(format!("{}/user/{user_id}", self.config.web_base));
        let html = self.http.get_text(SOURCE_ID, &request).await?;
        user_from_page(&html, user_id)
    }

    async fn get_videos(&self, user_id: &str) -> Result<Vec<Video>, AdapterError> {
        let cutoff = video_cutoff(self.config.max_age);
        let mut recent = Vec::new();
        let mut page_number = 1usize;
        loop {
            let request = HttpRequest::get(format!(
                "{}/v3/users/{user_id}/videos",
                self.config.nvapi_base
            ))
            .query("sortKey", "registeredAt")
            .query("sortOrder", "desc")
            .query("pageSize", PAGE_SIZE)
            .query("page", page_number)
            .header("X-Frontend-Id", FRONTEND_ID);
            let response: NvapiResponse = self.http.get_json(SOURCE_ID, &request).await?;
            let total = response.data.total_count;

            let videos = response.data.items.into_iter().map(|item| {
                let essential = item.essential;
                let start_date = essential.registered_at.with_timezone(&Utc);
                Video {
                    url: format!("https://www.nicovideo.jp/watch/{}", essential.id),
                    image: essential
                        .thumbnail
                        .and_then(|thumbnail| thumbnail.large_url.or(thumbnail.url)),
                    end_date: essential
                        .duration
                        .filter(|seconds| *seconds >= 0)
                        .map(|seconds| start_date + TimeDelta::seconds(seconds)),
                    id: essential.id,
                    title: essential.title,
                    start_date,
                }
            });
            let reached_cutoff = collect_recent(videos, cutoff, &mut recent);
            if reached_cutoff || page_number.saturating_mul(PAGE_SIZE) >= total {
                break;
            }
            page_number += 1;
        }
        Ok(recent)
    }
}
