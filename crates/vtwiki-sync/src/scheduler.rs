use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::sweep::RefreshScheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepKind {
    Stale,
    Fill,
}

async fn run_sweeps(sweeps: &RefreshScheduler, kind: SweepKind, limit: usize) {
    let (profiles, agencies) = match kind {
        SweepKind::Stale => (
            sweeps.sweep_stale_profiles(limit).await,
            sweeps.sweep_stale_agencies(limit).await,
        ),
        SweepKind::Fill => (
            sweeps.sweep_missing_profiles(limit).await,
            sweeps.sweep_missing_agencies(limit).await,
        ),
    };
    match (profiles, agencies) {
        (Ok(profiles), Ok(agencies)) => info!(?kind, profiles, agencies, "scheduled sweep enqueued"),
        (profiles, agencies) => {
            if let Err(err) = profiles {
                warn!(?kind, error = %err, "scheduled profile sweep failed");
            }
            if let Err(err) = agencies {
                warn!(?kind, error = %err, "scheduled agency sweep failed");
            }
        }
    }
}

/// Cron jobs for the stale and fill sweeps, or `None` when the scheduler is
/// disabled. The caller starts the returned scheduler.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    sweeps: Arc<RefreshScheduler>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for (cron, kind) in [
        (&config.stale_cron, SweepKind::Stale),
        (&config.fill_cron, SweepKind::Fill),
    ] {
        let sweeps = sweeps.clone();
        let limit = config.sweep_limit;
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let sweeps = sweeps.clone();
            Box::pin(async move {
                run_sweeps(&sweeps, kind, limit).await;
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(Some(sched))
}
