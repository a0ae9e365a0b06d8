//! # Event Synchronization
//!
//! Pulls a user's provider events for a window and reconciles them into the local store by
//! watermark. Bulk sync only writes events; it never dispatches agents. The dedup sweeper
//! cleans up recurring-instance leftovers separately.
//!
//! Listings expand recurring series into occurrences and leave the masters out, so masters an
//! occurrence points at are fetched one by one.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::EngineError;
use crate::lifecycle::NotetakerLifecycle;
use crate::providers::CalendarApi;
use crate::repositories::EventRepository;

pub mod dedup;
pub mod normalize;

pub use dedup::{DedupReport, DedupSweeper};
pub use normalize::normalize_event;

/// Time range to synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    /// Today at 00:00 UTC through `days` days later.
    pub fn from_today(now: DateTime<Utc>, days: i64) -> Self {
        Self::starting_at(now.date_naive().and_time(NaiveTime::MIN).and_utc(), days)
    }

    pub fn starting_at(start: DateTime<Utc>, days: i64) -> Self {
        Self {
            start,
            end: start + Duration::days(days),
        }
    }
}

/// Counts for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncReport {
    pub upserted: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Where a recurring instance's series master stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterLookup {
    /// Already stored locally.
    Stored,
    /// Fetched from the provider and stored.
    Fetched,
    /// The provider no longer has a live series under that id.
    Deleted,
}

pub struct EventSynchronizer {
    calendar: Arc<dyn CalendarApi>,
    events: EventRepository,
    lifecycle: Arc<NotetakerLifecycle>,
}

impl EventSynchronizer {
    pub fn new(
        calendar: Arc<dyn CalendarApi>,
        events: EventRepository,
        lifecycle: Arc<NotetakerLifecycle>,
    ) -> Self {
        Self {
            calendar,
            events,
            lifecycle,
        }
    }

    /// Fetches and reconciles every provider event overlapping `window`.
    ///
    /// Bad events are counted and logged; only a failure to reach the provider or an unusable
    /// grant aborts the run.
    #[instrument(skip(self), fields(start = %window.start, end = %window.end))]
    pub async fn sync(&self, user_id: Uuid, window: SyncWindow) -> Result<SyncReport, EngineError> {
        let grant = self.lifecycle.active_grant(user_id).await?;
        let provider_events = self
            .calendar
            .list_events(&grant.grant_id, window.start, window.end)
            .await?;

        let now = Utc::now();
        let mut report = SyncReport::default();

        for provider_event in &provider_events {
            let event = match normalize_event(provider_event, now) {
                Ok(event) => event,
                Err(err) => {
                    report.errors += 1;
                    counter!("sync_events_total", "outcome" => "rejected").increment(1);
                    warn!(
                        provider_event_id = provider_event.id.as_deref().unwrap_or("<none>"),
                        error = %err,
                        "Rejected provider event"
                    );
                    continue;
                }
            };

            match self.events.upsert(user_id, &event).await {
                Ok(outcome) if outcome.is_write() => {
                    report.upserted += 1;
                    counter!("sync_events_total", "outcome" => "upserted").increment(1);
                }
                Ok(_) => {
                    report.skipped += 1;
                    counter!("sync_events_total", "outcome" => "skipped").increment(1);
                }
                Err(err) => {
                    report.errors += 1;
                    counter!("sync_events_total", "outcome" => "error").increment(1);
                    warn!(
                        provider_event_id = %event.provider_event_id,
                        error = %err,
                        "Failed to store provider event"
                    );
                }
            }
        }

        let listed: BTreeSet<&str> = provider_events
            .iter()
            .filter_map(|event| event.id.as_deref())
            .collect();
        let unlisted_masters: BTreeSet<&str> = provider_events
            .iter()
            .filter_map(|event| event.master_event_id.as_deref())
            .filter(|master_id| !listed.contains(master_id))
            .collect();

        for master_id in unlisted_masters {
            match self.resolve_master(user_id, &grant.grant_id, master_id).await {
                Ok(MasterLookup::Fetched) => {
                    report.upserted += 1;
                    counter!("sync_events_total", "outcome" => "upserted").increment(1);
                }
                Ok(MasterLookup::Stored) => {}
                Ok(MasterLookup::Deleted) => {
                    warn!(master_event_id = master_id, "Series master is gone upstream");
                }
                Err(err) => {
                    report.errors += 1;
                    counter!("sync_events_total", "outcome" => "error").increment(1);
                    warn!(master_event_id = master_id, error = %err, "Failed to fetch series master");
                }
            }
        }

        info!(
            fetched = provider_events.len(),
            upserted = report.upserted,
            skipped = report.skipped,
            errors = report.errors,
            "Event sync finished"
        );
        Ok(report)
    }

    /// Makes sure the series master `master_id` is stored, fetching it when it is not.
    ///
    /// A master the provider cannot find, has cancelled, or that no longer recurs counts as
    /// deleted and is not stored.
    #[instrument(skip(self))]
    pub async fn resolve_master(
        &self,
        user_id: Uuid,
        grant_id: &str,
        master_id: &str,
    ) -> Result<MasterLookup, EngineError> {
        if self
            .events
            .find_by_provider_id(user_id, master_id)
            .await?
            .is_some_and(|stored| stored.is_master())
        {
            return Ok(MasterLookup::Stored);
        }

        let Some(provider_event) = self
            .calendar
            .get_event(grant_id, master_id)
            .await?
            .filter(|event| event.status.as_deref() != Some("cancelled"))
        else {
            return Ok(MasterLookup::Deleted);
        };

        let master = normalize_event(&provider_event, Utc::now())?;
        if !master.is_master() {
            return Ok(MasterLookup::Deleted);
        }
        let outcome = self.events.upsert(user_id, &master).await?;
        if !outcome.model().is_master() {
            return Ok(MasterLookup::Deleted);
        }
        info!(master_event_id = master_id, "Stored series master");
        Ok(MasterLookup::Fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_starts_at_midnight_utc() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 15, 42, 7).unwrap();
        let window = SyncWindow::from_today(now, 90);
        assert_eq!(window.start.to_rfc3339(), "2026-10-18T00:00:00+00:00");
        assert_eq!(window.end - window.start, Duration::days(90));
    }
}
