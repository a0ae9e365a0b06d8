//! Recurring-instance cleanup: removes orphaned instances and collapses duplicate calendar UIDs.
//!
//! An instance without a stored master is only removed once the provider confirms the series
//! is gone; a master that still exists upstream is fetched and stored instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::EngineError;
use crate::lifecycle::NotetakerLifecycle;
use crate::models::event;
use crate::repositories::{EventRepository, RecordingRepository};
use crate::sync::{EventSynchronizer, MasterLookup};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DedupReport {
    pub orphans_removed: u64,
    /// Series masters fetched because an instance pointed at them
    pub masters_restored: u64,
    pub duplicates_removed: u64,
    pub errors: u64,
}

pub struct DedupSweeper {
    events: EventRepository,
    recordings: RecordingRepository,
    lifecycle: Arc<NotetakerLifecycle>,
    synchronizer: Arc<EventSynchronizer>,
}

impl DedupSweeper {
    pub fn new(
        events: EventRepository,
        recordings: RecordingRepository,
        lifecycle: Arc<NotetakerLifecycle>,
        synchronizer: Arc<EventSynchronizer>,
    ) -> Self {
        Self {
            events,
            recordings,
            lifecycle,
            synchronizer,
        }
    }

    /// Runs the sweep every `interval` until `shutdown` fires.
    pub async fn run(self, interval: StdDuration, shutdown: CancellationToken) {
        info!(interval_seconds = interval.as_secs(), "Starting dedup sweeper");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Dedup sweeper shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    let started = Instant::now();
                    if let Err(err) = self.sweep(None).await {
                        error!(error = %err, "Dedup sweep failed");
                    }
                    histogram!("dedup_sweep_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }
        info!("Dedup sweeper stopped");
    }

    /// One pass over a single user, or every user when `user_id` is `None`.
    #[instrument(skip(self))]
    pub async fn sweep(&self, user_id: Option<Uuid>) -> Result<DedupReport, EngineError> {
        let mut report = DedupReport::default();

        // (user, master id) -> lookup result, `None` when the lookup failed
        let mut masters: HashMap<(Uuid, String), Option<MasterLookup>> = HashMap::new();

        for orphan in self.events.list_orphan_instances(user_id).await? {
            let Some(master_id) = orphan.master_event_id.clone() else { continue };
            let key = (orphan.user_id, master_id);
            let lookup = match masters.get(&key) {
                Some(lookup) => *lookup,
                None => {
                    let lookup = match self.lookup_master(orphan.user_id, &key.1).await {
                        Ok(lookup) => Some(lookup),
                        Err(err) => {
                            report.errors += 1;
                            warn!(
                                event_id = %orphan.id,
                                master_event_id = %key.1,
                                error = %err,
                                "Could not confirm series master, keeping instance"
                            );
                            None
                        }
                    };
                    if lookup == Some(MasterLookup::Fetched) {
                        report.masters_restored += 1;
                    }
                    masters.insert(key, lookup);
                    lookup
                }
            };
            if lookup != Some(MasterLookup::Deleted) {
                continue;
            }

            match self.remove_event(&orphan).await {
                Ok(()) => report.orphans_removed += 1,
                Err(err) => {
                    report.errors += 1;
                    warn!(event_id = %orphan.id, error = %err, "Failed to remove orphaned instance");
                }
            }
        }

        for (owner, uid) in self.events.duplicate_calendar_uids(user_id).await? {
            let rows = match self.events.list_by_calendar_uid(owner, &uid).await {
                Ok(rows) => rows,
                Err(err) => {
                    report.errors += 1;
                    warn!(calendar_uid = %uid, error = %err, "Failed to load duplicate events");
                    continue;
                }
            };

            // Rows arrive freshest first; the head survives.
            let mut rows = rows.into_iter();
            let Some(survivor) = rows.next() else { continue };
            for loser in rows {
                match self.collapse(&survivor, &loser).await {
                    Ok(()) => report.duplicates_removed += 1,
                    Err(err) => {
                        report.errors += 1;
                        warn!(
                            survivor_id = %survivor.id,
                            duplicate_id = %loser.id,
                            error = %err,
                            "Failed to collapse duplicate event"
                        );
                    }
                }
            }
        }

        counter!("dedup_rows_removed_total").increment(report.orphans_removed + report.duplicates_removed);
        info!(
            orphans_removed = report.orphans_removed,
            masters_restored = report.masters_restored,
            duplicates_removed = report.duplicates_removed,
            errors = report.errors,
            "Dedup sweep finished"
        );
        Ok(report)
    }

    async fn lookup_master(&self, user_id: Uuid, master_id: &str) -> Result<MasterLookup, EngineError> {
        let grant = self.lifecycle.active_grant(user_id).await?;
        self.synchronizer
            .resolve_master(user_id, &grant.grant_id, master_id)
            .await
    }

    async fn remove_event(&self, row: &event::Model) -> Result<(), EngineError> {
        self.lifecycle.cancel_for_event(row.id).await?;
        self.events.delete(row.id).await?;
        Ok(())
    }

    /// Moves the duplicate's recordings onto the survivor, then deletes the duplicate.
    async fn collapse(&self, survivor: &event::Model, loser: &event::Model) -> Result<(), EngineError> {
        let survivor_active = self.recordings.find_active_for_event(survivor.id).await?;
        if survivor_active.is_some() {
            self.lifecycle.cancel_for_event(loser.id).await?;
        }
        self.recordings.reassign_event(loser.id, survivor.id).await?;
        self.events.delete(loser.id).await?;
        Ok(())
    }
}
