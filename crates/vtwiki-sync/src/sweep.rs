//! Staleness and fill sweeps. Each sweep only enqueues refresh requests;
//! the queue consumers do the synthesis.

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;

use futures::TryStreamExt;
use thiserror::Error;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;
use vtwiki_adapters::{AdapterError, CategoryWalker, ListKind, PageStore, AGENCY_CATEGORY};
use vtwiki_core::{PageId, RefreshRequest, AGENCY_REFRESH_TOPIC, PROFILE_REFRESH_TOPIC};
use vtwiki_storage::{AgencyRepository, NonVtuberRegistry, ProfileRepository, StorageError};

use crate::queue::{QueueError, WorkQueue};
use crate::synth::SynthesisSettings;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct RefreshScheduler {
    pages: Arc<dyn PageStore>,
    profiles: Arc<dyn ProfileRepository>,
    agencies: Arc<dyn AgencyRepository>,
    non_vtubers: Arc<dyn NonVtuberRegistry>,
    queue: Arc<dyn WorkQueue>,
    settings: SynthesisSettings,
}

impl RefreshScheduler {
    pub fn new(
        pages: Arc<dyn PageStore>,
        profiles: Arc<dyn ProfileRepository>,
        agencies: Arc<dyn AgencyRepository>,
        non_vtubers: Arc<dyn NonVtuberRegistry>,
        queue: Arc<dyn WorkQueue>,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            pages,
            profiles,
            agencies,
            non_vtubers,
            queue,
            settings,
        }
    }

    async fn enqueue(&self, topic: &str, ids: impl IntoIterator<Item = PageId>) -> Result<usize, SweepError> {
        let mut count = 0;
        for id in ids {
            self.queue
                .publish(topic, RefreshRequest { id, forced: false })
                .await?;
            count += 1;
        }
        Ok(count)
    }

    /// Enqueues up to `limit` profiles past the stale age, oldest first.
    pub async fn sweep_stale_profiles(&self, limit: usize) -> Result<usize, SweepError> {
        let run_id = Uuid::new_v4();
        async {
            let stale = self
                .profiles
                .get_stale_ids(self.settings.profile_stale_age)
                .await?;
            let total = stale.len();
            let count = self
                .enqueue(PROFILE_REFRESH_TOPIC, stale.into_iter().take(limit))
                .await?;
            info!(stale = total, enqueued = count, "stale profile sweep done");
            Ok::<_, SweepError>(count)
        }
        .instrument(info_span!("sweep", %run_id, kind = "stale_profiles", limit))
        .await
    }

    /// Enqueues up to `limit` wiki pages that are neither a profile nor a
    /// known non-vtuber.
    pub async fn sweep_missing_profiles(&self, limit: usize) -> Result<usize, SweepError> {
        let run_id = Uuid::new_v4();
        async {
            let mut known = self
                .profiles
                .get_all_ids()
                .await?
                .into_iter()
                .collect::<HashSet<_>>();
            known.extend(self.non_vtubers.get_all_ids().await?);
            let count = self
                .enqueue_unseen(ListKind::AllPages, known, PROFILE_REFRESH_TOPIC, limit)
                .await?;
            info!(enqueued = count, "missing profile sweep done");
            Ok::<_, SweepError>(count)
        }
        .instrument(info_span!("sweep", %run_id, kind = "missing_profiles", limit))
        .await
    }

    pub async fn sweep_stale_agencies(&self, limit: usize) -> Result<usize, SweepError> {
        let run_id = Uuid::new_v4();
        async {
            let stale = self
                .agencies
                .get_stale_ids(self.settings.agency_stale_age)
                .await?;
            let count = self
                .enqueue(AGENCY_REFRESH_TOPIC, stale.into_iter().take(limit))
                .await?;
            info!(enqueued = count, "stale agency sweep done");
            Ok::<_, SweepError>(count)
        }
        .instrument(info_span!("sweep", %run_id, kind = "stale_agencies", limit))
        .await
    }

    /// Members of the agency category without an agency record.
    pub async fn sweep_missing_agencies(&self, limit: usize) -> Result<usize, SweepError> {
        let run_id = Uuid::new_v4();
        async {
            let known = self
                .agencies
                .get_all_ids()
                .await?
                .into_iter()
                .collect::<HashSet<_>>();
            let count = self
                .enqueue_unseen(
                    ListKind::CategoryMembers(AGENCY_CATEGORY.to_string()),
                    known,
                    AGENCY_REFRESH_TOPIC,
                    limit,
                )
                .await?;
            info!(enqueued = count, "missing agency sweep done");
            Ok::<_, SweepError>(count)
        }
        .instrument(info_span!("sweep", %run_id, kind = "missing_agencies", limit))
        .await
    }

    /// Walks `kind` and publishes ids outside `known`, stopping at `limit`
    /// without reading further pages.
    async fn enqueue_unseen(
        &self,
        kind: ListKind,
        mut known: HashSet<PageId>,
        topic: &str,
        limit: usize,
    ) -> Result<usize, SweepError> {
        if limit == 0 {
            return Ok(0);
        }
        let walker = CategoryWalker::new(self.pages.clone(), kind, self.settings.walk_page_size);
        let mut items = pin!(walker.into_stream());
        let mut count = 0;
        while let Some((item, _cursor)) = items.try_next().await? {
            if !known.insert(item.id) {
                continue;
            }
            self.queue
                .publish(topic, RefreshRequest { id: item.id, forced: false })
                .await?;
            count += 1;
            if count >= limit {
                break;
            }
        }
        Ok(count)
    }
}
