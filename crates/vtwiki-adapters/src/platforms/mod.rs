//! Streaming platform clients used by channel enrichment.

pub mod bilibili;
pub mod duration;
pub mod niconico;
pub mod twitch;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use vtwiki_core::{ChannelType, Video};

use crate::error::AdapterError;

pub use bilibili::{BilibiliClient, BilibiliConfig};
pub use niconico::{NiconicoClient, NiconicoConfig};
pub use twitch::{TwitchClient, TwitchConfig};
pub use youtube::{YoutubeClient, YoutubeConfig};

/// Channel identity as reported by a platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub subscriber_count: Option<u64>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Identifier accepted by [`get_channel`](Self::get_channel), taken from
    /// a channel URL on the wiki. `None` when the URL is not a channel URL.
    fn identifier_from_url(&self, url: &str) -> Option<String>;

    async fn get_channel(&self, identifier: &str) -> Result<ChannelInfo, AdapterError>;

    async fn get_follower_count(&self, channel_id: &str) -> Result<Option<u64>, AdapterError> {
        Ok(self.get_channel(channel_id).await?.subscriber_count)
    }

    /// Videos newer than the client's max-age cutoff, newest first.
    async fn get_videos(&self, channel_id: &str) -> Result<Vec<Video>, AdapterError>;
}

/// Clients keyed by the channel type they serve.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: HashMap<ChannelType, Arc<dyn PlatformClient>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn PlatformClient>) {
        self.clients.insert(client.channel_type(), client);
    }

    pub fn with(mut self, client: Arc<dyn PlatformClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, channel_type: ChannelType) -> Option<&Arc<dyn PlatformClient>> {
        self.clients.get(&channel_type)
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        let mut types = self.clients.keys().copied().collect::<Vec<_>>();
        types.sort();
        types
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("channel_types", &self.channel_types())
            .finish()
    }
}

/// Oldest publish time still of interest.
pub fn video_cutoff(max_age: TimeDelta) -> DateTime<Utc> {
    Utc::now() - max_age
}

/// Moves videos at or after `cutoff` into `out`. Returns `true` once a page
/// reaches past the cutoff, meaning later (older) pages are not needed.
pub fn collect_recent(
    page: impl IntoIterator<Item = Video>,
    cutoff: DateTime<Utc>,
    out: &mut Vec<Video>,
) -> bool {
    let mut reached_cutoff = false;
    for video in page {
        if video.start_date < cutoff {
            reached_cutoff = true;
        } else {
            out.push(video);
        }
    }
    reached_cutoff
}

/// Path segments of `url` with empty segments dropped.
pub(crate) fn path_segments(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    parsed
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
