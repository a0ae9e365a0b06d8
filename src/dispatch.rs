//! # Dispatch Scheduler
//!
//! Delayed dispatch queue backed by the `dispatch_jobs` table, plus the worker that claims due
//! jobs and hands them to the lifecycle manager. Failed attempts are retried with capped
//! exponential backoff and jitter until the job's attempt budget runs out.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DispatchConfig, RetryPolicyConfig};
use crate::error::EngineError;
use crate::lifecycle::NotetakerLifecycle;
use crate::models::{dispatch_job, event};
use crate::repositories::{DispatchJobRepository, EventRepository, RecordingRepository};

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Dispatched,
    /// Preconditions no longer hold; the job was dropped.
    Skipped,
    Retrying,
    Failed,
}

/// Per-tick counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub requeued: u64,
    pub claimed: u64,
    pub dispatched: u64,
    pub skipped: u64,
    pub retrying: u64,
    pub failed: u64,
}

impl TickReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Dispatched => self.dispatched += 1,
            JobOutcome::Skipped => self.skipped += 1,
            JobOutcome::Retrying => self.retrying += 1,
            JobOutcome::Failed => self.failed += 1,
        }
    }
}

/// Backoff after `attempts` completed attempts: `base * 2^(attempts - 1)` capped at `max`,
/// plus up to `jitter_factor` of that on top.
pub fn backoff_seconds(policy: &RetryPolicyConfig, attempts: i32) -> f64 {
    let exponent = attempts.saturating_sub(1).clamp(0, 30);
    let backoff = (policy.base_seconds as f64 * 2_f64.powi(exponent)).min(policy.max_seconds as f64);
    let spread = policy.jitter_factor * backoff;
    if spread > 0.0 {
        backoff + thread_rng().gen_range(0.0..spread)
    } else {
        backoff
    }
}

pub struct DispatchScheduler {
    config: DispatchConfig,
    jobs: DispatchJobRepository,
    events: EventRepository,
    recordings: RecordingRepository,
    lifecycle: Arc<NotetakerLifecycle>,
}

impl DispatchScheduler {
    pub fn new(
        config: DispatchConfig,
        jobs: DispatchJobRepository,
        events: EventRepository,
        recordings: RecordingRepository,
        lifecycle: Arc<NotetakerLifecycle>,
    ) -> Self {
        Self {
            config,
            jobs,
            events,
            recordings,
            lifecycle,
        }
    }

    /// Queues a dispatch for the event at `scheduled_for` (immediately if that is in the past).
    /// Idempotent while a job for the event is pending.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub async fn enqueue(
        &self,
        event: &event::Model,
        scheduled_for: DateTime<Utc>,
    ) -> Result<dispatch_job::Model, EngineError> {
        let grant = self.lifecycle.active_grant(event.user_id).await?;
        let due = scheduled_for.max(Utc::now());
        let job = self
            .jobs
            .enqueue(event.user_id, event.id, &grant.grant_id, due, self.config.max_attempts)
            .await?;
        counter!("dispatch_jobs_enqueued_total").increment(1);
        info!(job_id = %job.id, scheduled_for = %job.scheduled_for, "Dispatch queued");
        Ok(job)
    }

    /// Runs the worker loop until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(config = ?self.config, "Starting dispatch worker");
        let tick = StdDuration::from_millis(self.config.tick_ms);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Dispatch worker shutdown requested");
                    break;
                }
                _ = sleep(tick) => {
                    let started = Instant::now();
                    match self.clone().tick().await {
                        Ok(report) if report.claimed > 0 => debug!(?report, "Dispatch tick finished"),
                        Ok(_) => {}
                        Err(err) => error!(error = %err, "Dispatch tick failed"),
                    }
                    histogram!("dispatch_tick_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Dispatch worker stopped");
    }

    /// Requeues stuck jobs, claims a batch of due ones and runs them with bounded concurrency.
    pub async fn tick(self: Arc<Self>) -> Result<TickReport, EngineError> {
        let mut report = TickReport {
            requeued: self
                .jobs
                .requeue_stuck(Duration::seconds(self.config.max_run_seconds as i64))
                .await?,
            ..TickReport::default()
        };
        if report.requeued > 0 {
            warn!(count = report.requeued, "Requeued stuck dispatch jobs");
        }

        let jobs = self.jobs.claim_due(self.config.claim_batch).await?;
        report.claimed = jobs.len() as u64;
        if jobs.is_empty() {
            return Ok(report);
        }
        counter!("dispatch_jobs_claimed_total").increment(report.claimed);

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let scheduler = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                scheduler.run_job(job).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(outcome) => report.record(outcome),
                Err(err) => error!(error = %err, "Dispatch job task panicked"),
            }
        }
        Ok(report)
    }

    /// Executes one claimed job and settles its row. Never returns an error: anything that goes
    /// wrong is recorded on the job.
    #[instrument(skip_all, fields(job_id = %job.id, event_id = %job.event_id, attempt = job.attempts))]
    pub async fn run_job(&self, job: dispatch_job::Model) -> JobOutcome {
        let timeout = StdDuration::from_secs(self.config.max_run_seconds);
        let result = match tokio::time::timeout(timeout, self.execute(&job)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Remote {
                service: crate::error::RemoteService::Notetaker,
                status: None,
                message: "dispatch attempt timed out".to_string(),
                retryable: true,
            }),
        };

        let settled = match result {
            Ok(outcome) => self.jobs.delete(job.id).await.map(|_| outcome),
            Err(err) => self.handle_failure(&job, &err).await,
        };

        match settled {
            Ok(outcome) => outcome,
            Err(err) => {
                // The row stays running and is picked up again by the stuck-job requeue.
                error!(error = %err, "Failed to settle dispatch job");
                JobOutcome::Retrying
            }
        }
    }

    async fn execute(&self, job: &dispatch_job::Model) -> Result<JobOutcome, EngineError> {
        let Some(event) = self.events.find_by_id(job.event_id).await? else {
            return Ok(JobOutcome::Skipped);
        };
        if event.conference_url.as_deref().is_none_or(|url| url.trim().is_empty()) {
            info!("Event lost its conference url, dropping dispatch");
            return Ok(JobOutcome::Skipped);
        }
        if self.recordings.find_active_for_event(event.id).await?.is_some() {
            info!("Event already has an active recording, dropping dispatch");
            return Ok(JobOutcome::Skipped);
        }

        let outcome = self.lifecycle.dispatch(&event).await?;
        info!(session_id = outcome.session_id().unwrap_or_default(), "Dispatch job succeeded");
        Ok(JobOutcome::Dispatched)
    }

    async fn handle_failure(&self, job: &dispatch_job::Model, err: &EngineError) -> Result<JobOutcome, EngineError> {
        counter!("dispatch_job_failures_total", "code" => err.code()).increment(1);
        let details = json!({
            "code": err.code(),
            "message": err.to_string(),
            "attempts": job.attempts,
            "retryable": err.is_retryable(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        if !err.is_retryable() || job.attempts >= job.max_attempts {
            warn!(error = %err, attempts = job.attempts, "Dispatch job failed permanently");
            self.jobs.mark_failed(job.id, details).await?;
            return Ok(JobOutcome::Failed);
        }

        let delay = backoff_seconds(&self.config.retry_policy, job.attempts);
        let retry_after = Utc::now() + Duration::milliseconds((delay * 1_000.0) as i64);
        warn!(error = %err, attempts = job.attempts, backoff_seconds = delay, "Dispatch attempt failed, retrying");
        self.jobs.schedule_retry(job.id, retry_after, details).await?;
        Ok(JobOutcome::Retrying)
    }
}
