//! Twitch Helix client using a cached app access token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::warn;
use vtwiki_core::{ChannelType, Video};
use vtwiki_storage::{AccessToken, FetchError, HttpFetcher, HttpRequest, TokenCache};

use super::duration::parse_unit_suffixed;
use super::{collect_recent, path_segments, video_cutoff, ChannelInfo, PlatformClient};
use crate::error::AdapterError;

const SOURCE_ID: &str = "twitch";
const PAGE_SIZE: usize = 100;
const THUMBNAIL_WIDTH: &str = "320";
const THUMBNAIL_HEIGHT: &str = "180";

#[derive(Debug, Clone)]
pub struct TwitchConfig {
    pub api_base: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub max_age: TimeDelta,
}

impl TwitchConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        max_age: TimeDelta,
    ) -> Self {
        Self {
            api_base: "https://api.twitch.tv/helix".to_string(),
            token_url: "https://id.twitch.tv/oauth2/token".to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            max_age,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    display_name: String,
    #[serde(default)]
    profile_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowersResponse {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct TwitchVideo {
    id: String,
    title: String,
    url: String,
    #[serde(default)]
    thumbnail_url: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    duration: String,
}

/// Fills the `%{width}x%{height}` placeholders of a Helix thumbnail URL.
pub fn sized_thumbnail(template: &str) -> Option<String> {
    if template.is_empty() {
        return None;
    }
    Some(
        template
            .replace("%{width}", THUMBNAIL_WIDTH)
            .replace("%{height}", THUMBNAIL_HEIGHT),
    )
}

#[derive(Debug, Clone)]
pub struct TwitchClient {
    config: TwitchConfig,
    http: Arc<HttpFetcher>,
    tokens: Arc<TokenCache>,
}

impl TwitchClient {
    /// `tokens` is shared by every client using the same credentials.
    pub fn new(config: TwitchConfig, http: Arc<HttpFetcher>, tokens: Arc<TokenCache>) -> Self {
        Self {
            config,
            http,
            tokens,
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken, AdapterError> {
        let request = HttpRequest::post(&self.config.token_url).form(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ]);
        let response: TokenResponse = self
            .http
            .get_json(SOURCE_ID, &request)
            .await
            .map_err(|err| AdapterError::Auth(err.to_string()))?;
        Ok(AccessToken {
            value: response.access_token,
            expires_in: Duration::from_secs(response.expires_in),
        })
    }

    async fn helix<T: serde::de::DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> Result<T, AdapterError> {
        let token = self.tokens.get_or_refresh(|| self.fetch_token()).await?;
        let request = request
            .header("Client-Id", self.config.client_id.as_str())
            .header("Authorization", format!("Bearer {token}"));
        match self.http.get_json(SOURCE_ID, &request).await {
            Ok(body) => Ok(body),
            Err(FetchError::HttpStatus { status: 401, url }) => {
                warn!(%url, "twitch rejected the app token, dropping it");
                self.tokens.invalidate().await;
                Err(AdapterError::Auth(format!("401 from {url}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn endpoint(&self, resource: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/{resource}", self.config.api_base))
    }
}

#[async_trait]
impl PlatformClient for TwitchClient {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Twitch
    }

    /// The login name, lowercased.
    fn identifier_from_url(&self, url: &str) -> Option<String> {
        path_segments(url)
            .into_iter()
            .next()
            .filter(|login| !matches!(login.as_str(), "videos" | "directory"))
            .map(|login| login.to_ascii_lowercase())
    }

    async fn get_channel(&self, login: &str) -> Result<ChannelInfo, AdapterError> {
        let users: DataResponse<User> = self
            .helix(self.endpoint("users").query("login", login))
            .await?;
        let user = users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AdapterError::NotFound(format!("twitch user {login}")))?;
        let subscriber_count = self.get_follower_count(&user.id).await?;
        Ok(ChannelInfo {
            id: user.id,
            name: user.display_name,
            image: user.profile_image_url.filter(|url| !url.is_empty()),
            subscriber_count,
        })
    }

    async fn get_follower_count(&self, user_id: &str) -> Result<Option<u64>, AdapterError> {
        let followers: FollowersResponse = self
            .helix(
                self.endpoint("channels/followers")
                    .query("broadcaster_id", user_id),
            )
            .await?;
        Ok(Some(followers.total))
    }

    async fn get_videos(&self, user_id: &str) -> Result<Vec<Video>, AdapterError> {
        let cutoff = video_cutoff(self.config.max_age);
        let mut recent = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut request = self
                .endpoint("videos")
                .query("user_id", user_id)
                .query("type", "archive")
                .query("first", PAGE_SIZE);
            if let Some(cursor) = &after {
                request = request.query("after", cursor);
            }
            let page: DataResponse<TwitchVideo> = self.helix(request).await?;
            let videos = page.data.into_iter().map(|video| Video {
                end_date: parse_unit_suffixed(&video.duration).map(|d| video.created_at + d),
                image: video.thumbnail_url.as_deref().and_then(sized_thumbnail),
                id: video.id,
                title: video.title,
                url: video.url,
                start_date: video.created_at,
            });
            let reached_cutoff = collect_recent(videos, cutoff, &mut recent);
            after = page.pagination.cursor.filter(|cursor| !cursor.is_empty());
            if reached_cutoff || after.is_none() {
                break;
            }
        }
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtwiki_storage::{BackoffPolicy, HttpClientConfig};
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TwitchClient {
        let http = HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy::none(),
            ..HttpClientConfig::default()
        })
        .unwrap();
        TwitchClient::new(
            TwitchConfig {
                api_base: server.uri(),
                token_url: format!("{}/oauth2/token", server.uri()),
                client_id: "cid".into(),
                client_secret: "secret".into(),
                max_age: TimeDelta::days(30),
            },
            Arc::new(http),
            Arc::new(TokenCache::new()),
        )
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok", "expires_in": 3600, "token_type": "bearer"
            })))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[test]
    fn thumbnails_get_concrete_size() {
        assert_eq!(
            sized_thumbnail("https://img.test/%{width}x%{height}.jpg").as_deref(),
            Some("https://img.test/320x180.jpg")
        );
        assert_eq!(sized_thumbnail(""), None);
    }

    #[tokio::test]
    async fn channel_lookup_reuses_one_token() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("login", "sample"))
            .and(header("Authorization", "Bearer tok"))
            .and(header("Client-Id", "cid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "77", "login": "sample", "display_name": "Sample",
                          "profile_image_url": "https://img.test/p.png"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/followers"))
            .and(query_param("broadcaster_id", "77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "total": 4321, "data": [], "pagination": {}
            })))
            .mount(&server)
            .await;

        let info = client(&server).get_channel("sample").await.unwrap();
        assert_eq!(info.id, "77");
        assert_eq!(info.name, "Sample");
        assert_eq!(info.subscriber_count, Some(4321));
    }

    #[tokio::test]
    async fn unknown_login_is_not_found() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .mount(&server)
            .await;

        assert!(client(&server).get_channel("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn token_failure_is_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server).get_channel("sample").await.unwrap_err();
        assert!(matches!(err, AdapterError::Auth(_)));
    }

    #[tokio::test]
    async fn archive_videos_carry_end_dates() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        let created = (Utc::now() - TimeDelta::days(2)).to_rfc3339();
        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("type", "archive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"id": "v1", "title": "Stream", "url": "https://www.twitch.tv/videos/v1",
                          "thumbnail_url": "https://img.test/%{width}x%{height}.jpg",
                          "created_at": created, "duration": "1h30m"}],
                "pagination": {}
            })))
            .mount(&server)
            .await;

        let videos = client(&server).get_videos("77").await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(
            videos[0].end_date,
            Some(videos[0].start_date + TimeDelta::minutes(90))
        );
        assert_eq!(videos[0].image.as_deref(), Some("https://img.test/320x180.jpg"));
    }
}
