//! Profile and agency synthesis.
//!
//! A profile refresh moves through fetch, classify, extract, agency
//! resolution, channel enrichment, override merge and persist. A page that
//! is gone or is not a vtuber page demotes the id to the non-vtuber registry
//! instead. Nothing is written unless the whole refresh succeeds.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use vtwiki_adapters::extract::{self, agency_image_name, PageKind};
use vtwiki_adapters::{category_display_name, AdapterError, CategoryWalker, ListKind, PageStore};
use vtwiki_core::{Agency, AgencyRecord, PageId, Vtuber, VtuberRecord, WikiPage};
use vtwiki_storage::repository::stale_cutoff;
use vtwiki_storage::{
    AgencyRepository, NonVtuberRegistry, PageArchive, ProfileRepository, StorageError,
};

use crate::agency::{resolve_agencies, AgencyDirectory};
use crate::enrich::ChannelEnricher;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// Not forced and the stored record was still fresh.
    Skipped,
    /// Page gone or not a vtuber page; recorded as a non-vtuber.
    Demoted,
    /// Agency page gone; nothing written.
    Missing,
    Persisted,
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisSettings {
    pub profile_stale_age: TimeDelta,
    pub agency_stale_age: TimeDelta,
    /// Page size for category listings.
    pub walk_page_size: usize,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            profile_stale_age: TimeDelta::hours(24),
            agency_stale_age: TimeDelta::hours(168),
            walk_page_size: 500,
        }
    }
}

fn is_stale(updated_at: DateTime<Utc>, age_threshold: TimeDelta) -> bool {
    updated_at < stale_cutoff(age_threshold)
}

pub struct Synthesizer {
    pages: Arc<dyn PageStore>,
    profiles: Arc<dyn ProfileRepository>,
    agencies: Arc<dyn AgencyRepository>,
    non_vtubers: Arc<dyn NonVtuberRegistry>,
    enricher: ChannelEnricher,
    archive: Option<PageArchive>,
    settings: SynthesisSettings,
}

impl Synthesizer {
    pub fn new(
        pages: Arc<dyn PageStore>,
        profiles: Arc<dyn ProfileRepository>,
        agencies: Arc<dyn AgencyRepository>,
        non_vtubers: Arc<dyn NonVtuberRegistry>,
        enricher: ChannelEnricher,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            pages,
            profiles,
            agencies,
            non_vtubers,
            enricher,
            archive: None,
            settings,
        }
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub async fn synthesize_profile(
        &self,
        id: PageId,
        forced: bool,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("synthesize_profile", %run_id, id, forced);
        let outcome = self.run_profile(id, forced).instrument(span.clone()).await?;
        span.in_scope(|| info!(?outcome, "profile synthesis finished"));
        Ok(outcome)
    }

    async fn run_profile(&self, id: PageId, forced: bool) -> Result<SynthesisOutcome, SynthesisError> {
        let existing = self.profiles.get_by_id(id).await?;
        if !forced {
            if let Some(record) = &existing {
                if !is_stale(record.updated_at, self.settings.profile_stale_age) {
                    debug!(updated_at = %record.updated_at, "profile still fresh");
                    return Ok(SynthesisOutcome::Skipped);
                }
            }
        }

        let page = match self.pages.get_page_by_id(id).await {
            Ok(page) => page,
            Err(err) if err.is_not_found() => {
                info!("wiki page is gone");
                return self.demote(id).await;
            }
            Err(err) => return Err(err.into()),
        };
        self.archive_page(&page).await;

        let kind = extract::classify(&page);
        if kind != PageKind::Vtuber {
            info!(?kind, title = %page.title, "not a vtuber page");
            return self.demote(id).await;
        }

        let mut vtuber = extract::extract(&page);
        vtuber.image = self.resolve_image(vtuber.image.take()).await?;
        vtuber.agencies = self.resolve_profile_agencies(&vtuber).await?;
        vtuber.channels = self.enricher.enrich(std::mem::take(&mut vtuber.channels)).await;

        let now = Utc::now();
        let (overridden, created_at) = match existing {
            Some(record) => (record.overridden, record.created_at),
            None => (Default::default(), now),
        };
        overridden.apply_to(&mut vtuber);

        let record = VtuberRecord {
            vtuber,
            overridden,
            created_at,
            updated_at: now,
        };
        self.profiles.upsert_by_id(&record).await?;
        Ok(SynthesisOutcome::Persisted)
    }

    async fn demote(&self, id: PageId) -> Result<SynthesisOutcome, SynthesisError> {
        if self.profiles.delete_by_id(id).await? {
            info!("removed profile");
        }
        self.non_vtubers.create(id).await?;
        Ok(SynthesisOutcome::Demoted)
    }

    async fn archive_page(&self, page: &WikiPage) {
        let Some(archive) = &self.archive else {
            return;
        };
        match archive.store(page).await {
            Ok(archived) => debug!(
                revision = %archived.revision,
                first_seen = archived.first_seen,
                "archived page"
            ),
            Err(err) => warn!(error = %err, "could not archive page"),
        }
    }

    /// Image file name to URL. A file the wiki does not know means no image.
    async fn resolve_image(&self, name: Option<String>) -> Result<Option<String>, AdapterError> {
        let Some(name) = name else {
            return Ok(None);
        };
        match self.pages.get_image_info(&name).await {
            Ok(url) => Ok(Some(url)),
            Err(err) if err.is_not_found() => {
                debug!(%name, "image not on the wiki");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn resolve_profile_agencies(&self, vtuber: &Vtuber) -> Result<Vec<Agency>, SynthesisError> {
        let directory = AgencyDirectory::from_records(&self.agencies.get_all().await?);
        if directory.is_empty() {
            return Ok(Vec::new());
        }
        let categories = CategoryWalker::new(
            self.pages.clone(),
            ListKind::PageCategories(vtuber.id),
            self.settings.walk_page_size,
        )
        .collect_all()
        .await?;
        let from_categories = directory.from_categories(&categories);
        Ok(resolve_agencies(&vtuber.affiliations, &from_categories, &directory))
    }

    /// Rebuilds one agency from its category page. Agency records are never
    /// deleted; a missing page is logged and reported as `Missing`.
    pub async fn synthesize_agency(&self, id: PageId) -> Result<SynthesisOutcome, SynthesisError> {
        let run_id = Uuid::new_v4();
        self.run_agency(id)
            .instrument(info_span!("synthesize_agency", %run_id, id))
            .await
    }

    async fn run_agency(&self, id: PageId) -> Result<SynthesisOutcome, SynthesisError> {
        let page = match self.pages.get_page_by_id(id).await {
            Ok(page) => page,
            Err(err) if err.is_not_found() => {
                warn!("agency page is gone");
                return Ok(SynthesisOutcome::Missing);
            }
            Err(err) => return Err(err.into()),
        };
        self.archive_page(&page).await;

        let image = self.resolve_image(agency_image_name(&page)).await?;
        let now = Utc::now();
        let created_at = self
            .agencies
            .get_by_id(id)
            .await?
            .map(|record| record.created_at)
            .unwrap_or(now);
        let record = AgencyRecord {
            agency: Agency {
                id,
                name: category_display_name(&page.title).to_string(),
                image,
            },
            created_at,
            updated_at: now,
        };
        self.agencies.upsert_by_id(&record).await?;
        info!(name = %record.agency.name, "agency synthesized");
        Ok(SynthesisOutcome::Persisted)
    }

    /// Queue entry point for agencies: skips fresh records unless forced.
    pub async fn refresh_agency(
        &self,
        id: PageId,
        forced: bool,
    ) -> Result<SynthesisOutcome, SynthesisError> {
        if !forced {
            if let Some(record) = self.agencies.get_by_id(id).await? {
                if !is_stale(record.updated_at, self.settings.agency_stale_age) {
                    debug!(id, "agency still fresh");
                    return Ok(SynthesisOutcome::Skipped);
                }
            }
        }
        self.synthesize_agency(id).await
    }
}
