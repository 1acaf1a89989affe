//! Profile synthesis pipeline: agency resolution, channel enrichment,
//! synthesis, refresh sweeps with their work queue, and relationship trees.

pub mod agency;
pub mod config;
pub mod enrich;
pub mod queue;
pub mod scheduler;
pub mod sweep;
pub mod synth;
pub mod tree;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vtwiki_adapters::{
    BilibiliClient, BilibiliConfig, MediaWikiClient, NiconicoClient, NiconicoConfig, PageStore,
    PlatformRegistry, TwitchClient, TwitchConfig, YoutubeClient, YoutubeConfig,
};
use vtwiki_core::{Tree, AGENCY_REFRESH_TOPIC, PROFILE_REFRESH_TOPIC};
use vtwiki_storage::{
    AgencyRepository, HttpClientConfig, HttpFetcher, IntervalLimiter, NonVtuberRegistry,
    PageArchive, PgStore, ProfileRepository, TokenCache,
};

pub use agency::{resolve_agencies, AgencyDirectory};
pub use config::{FileConfig, PlatformUrls, SyncConfig};
pub use enrich::ChannelEnricher;
pub use queue::{
    consume, AgencyRefreshHandler, ConsumeSummary, InProcessQueue, ProfileRefreshHandler,
    QueueError, RefreshHandler, WorkQueue,
};
pub use scheduler::maybe_build_scheduler;
pub use sweep::{RefreshScheduler, SweepError};
pub use synth::{SynthesisError, SynthesisOutcome, SynthesisSettings, Synthesizer};
pub use tree::{build_agency_tree, build_family_tree};

pub const CRATE_NAME: &str = "vtwiki-sync";

/// Clients for every platform the configuration can serve. YouTube needs an
/// API key and Twitch app credentials; without them those channels stay
/// unresolved.
pub fn build_platform_registry(config: &SyncConfig, http: Arc<HttpFetcher>) -> PlatformRegistry {
    let urls = &config.platforms;
    let max_age = config.video_max_age;
    let mut registry = PlatformRegistry::new();

    match &config.youtube_api_key {
        Some(key) => {
            let mut youtube = YoutubeConfig::new(key, max_age);
            if let Some(base) = &urls.youtube_api {
                youtube.api_base = base.clone();
            }
            if let Some(base) = &urls.youtube_web {
                youtube.web_base = base.clone();
            }
            registry.register(Arc::new(YoutubeClient::new(youtube, http.clone())));
        }
        None => warn!("YOUTUBE_API_KEY not set; youtube channels will not be enriched"),
    }

    match (&config.twitch_client_id, &config.twitch_client_secret) {
        (Some(id), Some(secret)) => {
            let mut twitch = TwitchConfig::new(id, secret, max_age);
            if let Some(base) = &urls.twitch_api {
                twitch.api_base = base.clone();
            }
            if let Some(url) = &urls.twitch_token {
                twitch.token_url = url.clone();
            }
            registry.register(Arc::new(TwitchClient::new(
                twitch,
                http.clone(),
                Arc::new(TokenCache::new()),
            )));
        }
        _ => warn!("twitch credentials not set; twitch channels will not be enriched"),
    }

    let mut bilibili = BilibiliConfig::new(max_age);
    if let Some(base) = &urls.bilibili_api {
        bilibili.api_base = base.clone();
    }
    registry.register(Arc::new(BilibiliClient::new(bilibili, http.clone())));

    let mut niconico = NiconicoConfig::new(max_age);
    if let Some(base) = &urls.niconico_web {
        niconico.web_base = base.clone();
    }
    if let Some(base) = &urls.niconico_nvapi {
        niconico.nvapi_base = base.clone();
    }
    registry.register(Arc::new(NiconicoClient::new(niconico, http)));

    registry
}

fn settings_for(config: &SyncConfig) -> SynthesisSettings {
    SynthesisSettings {
        profile_stale_age: config.profile_stale_age,
        agency_stale_age: config.agency_stale_age,
        walk_page_size: config.walk_page_size,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    StaleProfiles,
    MissingProfiles,
    StaleAgencies,
    MissingAgencies,
}

/// What one in-process sweep enqueued and how the consumers fared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepRun {
    pub enqueued: usize,
    pub profiles: ConsumeSummary,
    pub agencies: ConsumeSummary,
}

struct Consumers {
    queue: Arc<InProcessQueue>,
    profiles: JoinHandle<ConsumeSummary>,
    agencies: JoinHandle<ConsumeSummary>,
}

/// Wires the stores, wiki client, platform clients and synthesizer
/// together, and runs sweeps or the long-lived worker loop on top.
pub struct Pipeline {
    config: SyncConfig,
    pages: Arc<dyn PageStore>,
    profiles: Arc<dyn ProfileRepository>,
    agencies: Arc<dyn AgencyRepository>,
    non_vtubers: Arc<dyn NonVtuberRegistry>,
    synthesizer: Arc<Synthesizer>,
}

impl Pipeline {
    /// Production wiring: PostgreSQL, the configured wiki and platforms.
    pub async fn connect(config: SyncConfig) -> Result<Self> {
        let store = Arc::new(
            PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?,
        );
        let http = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?);
        let limiter = Arc::new(IntervalLimiter::new(config.wiki_interval));
        let pages = Arc::new(MediaWikiClient::new(&config.wiki_api_url, http.clone(), limiter));
        let registry = build_platform_registry(&config, http);
        info!(platforms = ?registry.channel_types(), wiki = %config.wiki_api_url, "pipeline wired");
        Ok(Self::from_parts(config, pages, store.clone(), store.clone(), store, registry))
    }

    pub fn from_parts(
        config: SyncConfig,
        pages: Arc<dyn PageStore>,
        profiles: Arc<dyn ProfileRepository>,
        agencies: Arc<dyn AgencyRepository>,
        non_vtubers: Arc<dyn NonVtuberRegistry>,
        registry: PlatformRegistry,
    ) -> Self {
        let settings = settings_for(&config);
        let mut synthesizer = Synthesizer::new(
            pages.clone(),
            profiles.clone(),
            agencies.clone(),
            non_vtubers.clone(),
            ChannelEnricher::new(registry, config.workers),
            settings,
        );
        if let Some(dir) = &config.archive_dir {
            synthesizer = synthesizer.with_archive(PageArchive::new(dir));
        }
        Self {
            config,
            pages,
            profiles,
            agencies,
            non_vtubers,
            synthesizer: Arc::new(synthesizer),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synthesizer
    }

    pub fn sweeps(&self, queue: Arc<dyn WorkQueue>) -> RefreshScheduler {
        RefreshScheduler::new(
            self.pages.clone(),
            self.profiles.clone(),
            self.agencies.clone(),
            self.non_vtubers.clone(),
            queue,
            settings_for(&self.config),
        )
    }

    fn start_consumers(&self) -> Consumers {
        let mut queue = InProcessQueue::new(self.config.sweep_limit.max(16));
        let profile_rx = queue.subscribe(PROFILE_REFRESH_TOPIC);
        let agency_rx = queue.subscribe(AGENCY_REFRESH_TOPIC);
        let workers = self.config.workers;
        Consumers {
            queue: Arc::new(queue),
            profiles: tokio::spawn(consume(
                PROFILE_REFRESH_TOPIC,
                profile_rx,
                workers,
                Arc::new(ProfileRefreshHandler(self.synthesizer.clone())),
            )),
            agencies: tokio::spawn(consume(
                AGENCY_REFRESH_TOPIC,
                agency_rx,
                workers,
                Arc::new(AgencyRefreshHandler(self.synthesizer.clone())),
            )),
        }
    }

    /// Runs one sweep and processes everything it enqueued before returning.
    pub async fn run_sweep(&self, kind: SweepKind, limit: usize) -> Result<SweepRun> {
        let consumers = self.start_consumers();
        let sweeps = self.sweeps(consumers.queue.clone());
        let enqueued = match kind {
            SweepKind::StaleProfiles => sweeps.sweep_stale_profiles(limit).await,
            SweepKind::MissingProfiles => sweeps.sweep_missing_profiles(limit).await,
            SweepKind::StaleAgencies => sweeps.sweep_stale_agencies(limit).await,
            SweepKind::MissingAgencies => sweeps.sweep_missing_agencies(limit).await,
        };
        drop(sweeps);
        drop(consumers.queue);
        let profiles = consumers.profiles.await.context("profile consumer")?;
        let agencies = consumers.agencies.await.context("agency consumer")?;
        let enqueued = enqueued.with_context(|| format!("{kind:?} sweep"))?;
        Ok(SweepRun {
            enqueued,
            profiles,
            agencies,
        })
    }

    /// Worker pool plus the cron sweeps, until ctrl-c. Refreshes still in
    /// flight at shutdown are dropped before they persist anything.
    pub async fn run(&self) -> Result<()> {
        let consumers = self.start_consumers();
        let sweeps = Arc::new(self.sweeps(consumers.queue.clone()));
        let scheduler = maybe_build_scheduler(&self.config, sweeps).await?;
        if let Some(sched) = &scheduler {
            sched.start().await.context("starting scheduler")?;
            info!(
                stale_cron = %self.config.stale_cron,
                fill_cron = %self.config.fill_cron,
                "scheduler started"
            );
        } else {
            info!("scheduler disabled; consuming queued refreshes only");
        }

        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        info!("shutting down");
        if let Some(mut sched) = scheduler {
            sched.shutdown().await.context("stopping scheduler")?;
        }
        consumers.profiles.abort();
        consumers.agencies.abort();
        Ok(())
    }

    pub async fn family_tree(&self) -> Result<Tree> {
        tree::family_tree(self.profiles.as_ref())
            .await
            .context("loading profiles for family tree")
    }

    pub async fn agency_tree(&self) -> Result<Tree> {
        tree::agency_tree(self.profiles.as_ref(), self.agencies.as_ref())
            .await
            .context("loading corpus for agency tree")
    }
}
