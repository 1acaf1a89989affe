//! Channel enrichment: platform identity and recent videos per channel.

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use vtwiki_adapters::{AdapterError, PlatformRegistry};
use vtwiki_core::Channel;

/// Dispatches each channel to the client for its type. Channels are
/// independent: a failure leaves that channel as extracted and never
/// affects the others.
#[derive(Debug, Clone)]
pub struct ChannelEnricher {
    registry: PlatformRegistry,
    concurrency: usize,
}

impl ChannelEnricher {
    pub fn new(registry: PlatformRegistry, concurrency: usize) -> Self {
        Self {
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Output order matches input order.
    pub async fn enrich(&self, channels: Vec<Channel>) -> Vec<Channel> {
        stream::iter(channels)
            .map(|channel| self.enrich_one(channel))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn enrich_one(&self, channel: Channel) -> Channel {
        match self.try_enrich(&channel).await {
            Ok(Some(enriched)) => enriched,
            Ok(None) => channel,
            Err(err) => {
                warn!(
                    url = %channel.url,
                    channel_type = channel.channel_type.as_str(),
                    error = %err,
                    "channel enrichment failed"
                );
                channel
            }
        }
    }

    /// `Ok(None)` when the channel type has no client or the URL carries no
    /// usable identifier.
    async fn try_enrich(&self, channel: &Channel) -> Result<Option<Channel>, AdapterError> {
        let Some(client) = self.registry.get(channel.channel_type) else {
            debug!(url = %channel.url, "no client for channel type");
            return Ok(None);
        };
        let Some(identifier) = client.identifier_from_url(&channel.url) else {
            debug!(url = %channel.url, "no identifier in channel url");
            return Ok(None);
        };

        let info = client.get_channel(&identifier).await?;
        let videos = client.get_videos(&info.id).await?;
        Ok(Some(Channel {
            channel_type: channel.channel_type,
            url: channel.url.clone(),
            external_id: Some(info.id),
            name: Some(info.name),
            image: info.image,
            subscriber_count: info.subscriber_count,
            videos,
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use vtwiki_adapters::{ChannelInfo, PlatformClient};
    use vtwiki_core::{ChannelType, Video};

    /// Resolves any `https://<type>.test/<name>` URL to channel `id-<name>`;
    /// the name `broken` fails, `ghost` is not found.
    pub(crate) struct FakePlatform(pub ChannelType);

    #[async_trait]
    impl PlatformClient for FakePlatform {
        fn channel_type(&self) -> ChannelType {
            self.0
        }

        fn identifier_from_url(&self, url: &str) -> Option<String> {
            url.rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string)
        }

        async fn get_channel(&self, identifier: &str) -> Result<ChannelInfo, AdapterError> {
            match identifier {
                "broken" => Err(AdapterError::Auth("token refused".into())),
                "ghost" => Err(AdapterError::NotFound(identifier.into())),
                name => Ok(ChannelInfo {
                    id: format!("id-{name}"),
                    name: name.to_uppercase(),
                    image: Some(format!("https://img.test/{name}.png")),
                    subscriber_count: Some(100),
                }),
            }
        }

        async fn get_videos(&self, channel_id: &str) -> Result<Vec<Video>, AdapterError> {
            Ok(vec![Video {
                id: format!("{channel_id}-v1"),
                title: "Stream".into(),
                url: format!("https://video.test/{channel_id}-v1"),
                image: None,
                start_date: Utc::now() - TimeDelta::hours(3),
                end_date: None,
            }])
        }
    }

    pub(crate) fn fake_registry() -> PlatformRegistry {
        PlatformRegistry::new()
            .with(Arc::new(FakePlatform(ChannelType::Youtube)))
            .with(Arc::new(FakePlatform(ChannelType::Twitch)))
    }

    #[tokio::test]
    async fn resolved_channels_carry_identity_and_videos() {
        let enricher = ChannelEnricher::new(fake_registry(), 2);
        let channels = vec![Channel::unresolved(ChannelType::Youtube, "https://youtube.test/sample")];

        let enriched = enricher.enrich(channels).await;

        assert_eq!(enriched.len(), 1);
        let channel = &enriched[0];
        assert_eq!(channel.external_id.as_deref(), Some("id-sample"));
        assert_eq!(channel.name.as_deref(), Some("SAMPLE"));
        assert_eq!(channel.subscriber_count, Some(100));
        assert_eq!(channel.videos.len(), 1);
        assert_eq!(channel.videos[0].id, "id-sample-v1");
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_affect_siblings() {
        let enricher = ChannelEnricher::new(fake_registry(), 4);
        let channels = vec![
            Channel::unresolved(ChannelType::Twitch, "https://twitch.test/broken"),
            Channel::unresolved(ChannelType::Youtube, "https://youtube.test/ghost"),
            Channel::unresolved(ChannelType::Youtube, "https://youtube.test/ok"),
            Channel::unresolved(ChannelType::Other, "https://example.test/site"),
            Channel::unresolved(ChannelType::Bilibili, "https://bilibili.test/123"),
        ];

        let enriched = enricher.enrich(channels.clone()).await;

        assert_eq!(enriched.len(), 5);
        assert_eq!(enriched[0], channels[0]);
        assert_eq!(enriched[1], channels[1]);
        assert!(enriched[2].is_resolved());
        assert_eq!(enriched[2].url, "https://youtube.test/ok");
        assert_eq!(enriched[3], channels[3]);
        assert_eq!(enriched[4], channels[4]);
    }
}
