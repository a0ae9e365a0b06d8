//! # Stalled-Recording Monitor
//!
//! Periodically asks the transcoding service about recordings that have sat in `processing`
//! for too long, covering for lost transcoding webhooks.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::config::MonitorConfig;
use crate::error::EngineError;
use crate::lifecycle::{NotetakerLifecycle, TranscodeOutcome};
use crate::providers::TranscodingApi;
use crate::repositories::RecordingRepository;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MonitorReport {
    pub checked: u64,
    pub completed: u64,
    pub failed: u64,
    pub unchanged: u64,
    pub errors: u64,
}

pub struct StalledRecordingMonitor {
    config: MonitorConfig,
    recordings: RecordingRepository,
    transcoding: Arc<dyn TranscodingApi>,
    lifecycle: Arc<NotetakerLifecycle>,
}

impl StalledRecordingMonitor {
    pub fn new(
        config: MonitorConfig,
        recordings: RecordingRepository,
        transcoding: Arc<dyn TranscodingApi>,
        lifecycle: Arc<NotetakerLifecycle>,
    ) -> Self {
        Self {
            config,
            recordings,
            transcoding,
            lifecycle,
        }
    }

    /// Run the monitor loop until the provided shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(config = ?self.config, "Starting stalled-recording monitor");
        let interval = StdDuration::from_secs(self.config.interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stalled-recording monitor shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    let started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Monitor tick failed");
                    }
                    histogram!("monitor_tick_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Stalled-recording monitor stopped");
    }

    pub async fn tick(&self) -> Result<MonitorReport, EngineError> {
        let stale_after = Duration::seconds(self.config.stale_after_seconds as i64);
        let stalled = self
            .recordings
            .list_stalled_processing(stale_after, self.config.batch_size)
            .await?;

        let mut report = MonitorReport::default();
        for rec in stalled {
            let Some(asset_id) = rec.transcoding_asset_id.as_deref() else {
                continue;
            };
            report.checked += 1;

            let asset = match self.transcoding.get_asset(asset_id).await {
                Ok(asset) => asset,
                Err(err) => {
                    report.errors += 1;
                    warn!(recording_id = %rec.id, asset_id, error = %err, "Failed to query transcoding asset");
                    continue;
                }
            };

            match self.lifecycle.settle_transcoding(rec.id, &asset).await {
                Ok(TranscodeOutcome::Completed) => report.completed += 1,
                Ok(TranscodeOutcome::Failed) => report.failed += 1,
                Ok(TranscodeOutcome::Unchanged) => {
                    report.unchanged += 1;
                    debug!(recording_id = %rec.id, asset_status = %asset.status, "Asset still pending");
                }
                Err(err) => {
                    report.errors += 1;
                    warn!(recording_id = %rec.id, error = %err, "Failed to settle stalled recording");
                }
            }
        }

        counter!("monitor_recordings_checked_total").increment(report.checked);
        if report.checked > 0 {
            info!(
                checked = report.checked,
                completed = report.completed,
                failed = report.failed,
                unchanged = report.unchanged,
                errors = report.errors,
                "Monitor tick finished"
            );
        }
        Ok(report)
    }
}
