//! Bilibili web API client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use vtwiki_core::{ChannelType, Video};
use vtwiki_storage::{HttpFetcher, HttpRequest};

use super::duration::parse_clock;
use super::{collect_recent, path_segments, video_cutoff, ChannelInfo, PlatformClient};
use crate::error::AdapterError;

const SOURCE_ID: &str = "bilibili";
const PAGE_SIZE: usize = 50;
/// Upstream code for an unknown user.
const CODE_NOT_FOUND: i64 = -404;

#[derive(Debug, Clone)]
pub struct BilibiliConfig {
    pub api_base: String,
    pub max_age: TimeDelta,
}

impl BilibiliConfig {
    pub fn new(max_age: TimeDelta) -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            max_age,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CardData {
    card: Card,
    #[serde(default)]
    follower: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Card {
    mid: String,
    name: String,
    #[serde(default)]
    face: Option<String>,
    #[serde(default)]
    fans: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ArcSearchData {
    list: ArcList,
    page: ArcPage,
}

#[derive(Debug, Deserialize)]
struct ArcList {
    #[serde(default)]
    vlist: Vec<ArcVideo>,
}

#[derive(Debug, Deserialize)]
struct ArcPage {
    pn: usize,
    ps: usize,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ArcVideo {
    bvid: String,
    title: String,
    #[serde(default)]
    pic: Option<String>,
    created: i64,
    #[serde(default)]
    length: String,
}

/// Protocol-relative image URLs (`//i0.hdslb.com/...`) get an explicit scheme.
pub fn absolute_image_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        None
    } else if url.starts_with("//") {
        Some(format!("https:{url}"))
    } else {
        Some(url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct BilibiliClient {
    config: BilibiliConfig,
    http: Arc<HttpFetcher>,
}

impl BilibiliClient {
    pub fn new(config: BilibiliConfig, http: Arc<HttpFetcher>) -> Self {
        Self { config, http }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        subject: &str,
    ) -> Result<T, AdapterError> {
        let envelope: Envelope<T> = self.http.get_json(SOURCE_ID, &request).await?;
        match envelope.code {
            0 => envelope
                .data
                .ok_or_else(|| AdapterError::malformed(format!("bilibili {subject} without data"))),
            CODE_NOT_FOUND => Err(AdapterError::NotFound(format!("bilibili {subject}"))),
            code => Err(AdapterError::Rejected {
                platform: SOURCE_ID,
                code,
                message: envelope.message,
            }),
        }
    }
}

#[async_trait]
impl PlatformClient for BilibiliClient {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Bilibili
    }

    /// The numeric user id (`mid`) from `space.bilibili.com/<mid>`.
    fn identifier_from_url(&self, url: &str) -> Option<String> {
        path_segments(url)
            .into_iter()
            .find(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
    }

    async fn get_channel(&self, mid: &str) -> Result<ChannelInfo, AdapterError> {
        let request = HttpRequest::get(format!("{}/x/web-interface/card", self.config.api_base))
            .query("mid", mid);
        let data: CardData = self.call(request, &format!("user {mid}")).await?;
        Ok(ChannelInfo {
            id: data.card.mid,
            name: data.card.name,
            image: data.card.face.as_deref().and_then(absolute_image_url),
            subscriber_count: data.follower.or(data.card.fans),
        })
    }

    async fn get_videos(&self, mid: &str) -> Result<Vec<Video>, AdapterError> {
        let cutoff = video_cutoff(self.config.max_age);
        let mut recent = Vec::new();
        let mut page_number = 1usize;
        loop {
            let request = HttpRequest::get(format!("{}/x/space/arc/search", self.config.api_base))
                .query("mid", mid)
                .query("ps", PAGE_SIZE)
                .query("pn", page_number)
                .query("order", "pubdate");
            let data: ArcSearchData = self.call(request, &format!("videos of {mid}")).await?;

            let videos = data.list.vlist.into_iter().filter_map(|video| {
                let start_date = DateTime::<Utc>::from_timestamp(video.created, 0)?;
                Some(Video {
                    url: format!("https://www.bilibili.com/video/{}", video.bvid),
                    image: video.pic.as_deref().and_then(absolute_image_url),
                    end_date: parse_clock(&video.length).map(|d| start_date + d),
                    id: video.bvid,
                    title: video.title,
                    start_date,
                })
            });
            let reached_cutoff = collect_recent(videos, cutoff, &mut recent);
            let seen = data.page.pn.saturating_mul(data.page.ps);
            if reached_cutoff || seen >= data.page.count || data.page.ps == 0 {
                break;
            }
            page_number += 1;
        }
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtwiki_storage::{BackoffPolicy, HttpClientConfig};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BilibiliClient {
        let http = HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy::none(),
            ..HttpClientConfig::default()
        })
        .unwrap();
        BilibiliClient::new(
            BilibiliConfig {
                api_base: server.uri(),
                max_age: TimeDelta::days(30),
            },
            Arc::new(http),
        )
    }

    #[test]
    fn protocol_relative_images_become_https() {
        assert_eq!(
            absolute_image_url("//i0.hdslb.com/a.jpg").as_deref(),
            Some("https://i0.hdslb.com/a.jpg")
        );
        assert_eq!(absolute_image_url(""), None);
    }

    #[tokio::test]
    async fn card_maps_to_channel_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/web-interface/card"))
            .and(query_param("mid", "123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0, "message": "0",
                "data": {"card": {"mid": "123", "name": "Sample", "face": "//i0.hdslb.com/f.jpg", "fans": 10},
                         "follower": 12}
            })))
            .mount(&server)
            .await;

        let info = client(&server).get_channel("123").await.unwrap();
        assert_eq!(info.name, "Sample");
        assert_eq!(info.subscriber_count, Some(12));
        assert_eq!(info.image.as_deref(), Some("https://i0.hdslb.com/f.jpg"));
    }

    #[tokio::test]
    async fn negative_404_code_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": -404, "message": "啥都木有"
            })))
            .mount(&server)
            .await;

        assert!(client(&server).get_channel("9").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn videos_follow_pages_until_count() {
        let server = MockServer::start().await;
        let created = (Utc::now() - TimeDelta::days(3)).timestamp();
        Mock::given(method("GET"))
            .and(path("/x/space/arc/search"))
            .and(query_param("pn", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": {"list": {"vlist": [
                    {"bvid": "BV1", "title": "One", "pic": "//i0.hdslb.com/1.jpg", "created": created, "length": "10:00"}
                ]}, "page": {"pn": 1, "ps": 1, "count": 2}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/x/space/arc/search"))
            .and(query_param("pn", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": {"list": {"vlist": [
                    {"bvid": "BV2", "title": "Two", "created": created, "length": "bad"}
                ]}, "page": {"pn": 2, "ps": 1, "count": 2}}
            })))
            .mount(&server)
            .await;

        let videos = client(&server).get_videos("123").await.unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].url, "https://www.bilibili.com/video/BV1");
        assert_eq!(
            videos[0].end_date,
            Some(videos[0].start_date + TimeDelta::minutes(10))
        );
        assert_eq!(videos[1].end_date, None);
    }
}
