//! Cron-based scheduler for enqueuing analytics jobs

use crate::error::{JobError, QueueError};
use crate::jobs::context::JobContext;
use crate::jobs::types::{AnalysisJob, IdempotencyKey, JobParams, JobPriority};
use crate::models::AnalysisWindow;
use crate::queue::{Enqueued, JobQueue};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Answer to an on-demand submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A new job was queued
    Queued(String),
    /// The same job is already queued or running
    AlreadyQueued(String),
    /// A fresh result is already stored under this key
    Fresh(IdempotencyKey),
}

impl Submission {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Submission::Queued(id) | Submission::AlreadyQueued(id) => Some(id),
            Submission::Fresh(_) => None,
        }
    }
}

/// Counts from one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub enqueued: usize,
    pub duplicates: usize,
    pub fresh: usize,
    pub purged: usize,
    /// The tick was abandoned after a backend failure
    pub skipped: bool,
}

impl TickReport {
    fn record(&mut self, submission: &Submission) {
        match submission {
            Submission::Queued(_) => self.enqueued += 1,
            Submission::AlreadyQueued(_) => self.duplicates += 1,
            Submission::Fresh(_) => self.fresh += 1,
        }
    }
}

/// Scheduler that periodically enqueues trend and valuation jobs
#[derive(Clone)]
pub struct JobScheduler {
    queue: Arc<dyn JobQueue>,
    ctx: Arc<JobContext>,
    handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl JobScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, ctx: Arc<JobContext>) -> Self {
        Self {
            queue,
            ctx,
            handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Queue a job unless a fresh result or an identical pending job exists
    pub async fn submit(
        &self,
        params: JobParams,
        window: AnalysisWindow,
        priority: JobPriority,
    ) -> Result<Submission, JobError> {
        let job = AnalysisJob::new(params, window, self.ctx.clock.now()).with_priority(priority);
        self.ctx.validate_job(&job)?;
        Ok(self.offer(job).await?)
    }

    async fn offer(&self, job: AnalysisJob) -> Result<Submission, QueueError> {
        let key = job.idempotency_key();
        if self.ctx.fresh_entry(key.as_str()).await.is_some() {
            debug!(key = %key, "JobScheduler: fresh result exists, not enqueuing");
            return Ok(Submission::Fresh(key));
        }

        let lane = job.kind();
        match self.queue.enqueue(job).await? {
            Enqueued::New(job_id) => {
                debug!(key = %key, job_id = %job_id, "JobScheduler: enqueued job");
                if let Some(ref metrics) = self.ctx.metrics {
                    metrics.jobs_enqueued_total.with_label_values(&[lane.lane()]).inc();
                }
                Ok(Submission::Queued(job_id))
            }
            Enqueued::Duplicate(job_id) => Ok(Submission::AlreadyQueued(job_id)),
        }
    }

    fn abandon(&self, mut report: TickReport) -> TickReport {
        report.skipped = true;
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.scheduler_ticks_skipped_total.inc();
        }
        report
    }

    /// Enqueue a trend job for every configured (city, property type)
    pub async fn run_trend_tick(&self) -> TickReport {
        let market = &self.ctx.config.market;
        let now = self.ctx.clock.now();
        let mut report = TickReport::default();

        info!(
            cities = market.cities.len(),
            property_types = market.property_types.len(),
            window = %market.trend_window,
            "JobScheduler: trend tick"
        );

        for city in &market.cities {
            for property_type in &market.property_types {
                let job = AnalysisJob::new(
                    JobParams::trend(city.clone(), *property_type),
                    market.trend_window,
                    now,
                );
                match self.offer(job).await {
                    Ok(submission) => report.record(&submission),
                    Err(e) => {
                        error!(
                            city = %city,
                            property_type = %property_type,
                            error = %e,
                            "JobScheduler: enqueue failed, skipping rest of trend tick"
                        );
                        return self.abandon(report);
                    }
                }
            }
        }

        info!(
            enqueued = report.enqueued,
            duplicates = report.duplicates,
            fresh = report.fresh,
            "JobScheduler: trend tick done"
        );
        report
    }

    /// Purge expired results, then re-queue stale valuations of active listings
    pub async fn run_valuation_tick(&self) -> TickReport {
        let market = &self.ctx.config.market;
        let now = self.ctx.clock.now();
        let mut report = TickReport::default();

        match self.ctx.results.purge_expired(now).await {
            Ok(purged) => report.purged = purged,
            Err(e) => warn!(error = %e, "JobScheduler: cache cleanup failed"),
        }

        for city in &market.cities {
            let ids = match self
                .ctx
                .listings
                .active_listing_ids(city, market.batch_size)
                .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    error!(city = %city, error = %e, "JobScheduler: listing source unavailable, skipping valuation tick");
                    return self.abandon(report);
                }
            };

            for listing_id in ids {
                let job = AnalysisJob::new(
                    JobParams::valuation(listing_id),
                    market.valuation_window,
                    now,
                )
                .with_priority(JobPriority::Low);
                match self.offer(job).await {
                    Ok(submission) => report.record(&submission),
                    Err(e) => {
                        error!(
                            listing_id = listing_id,
                            error = %e,
                            "JobScheduler: enqueue failed, skipping rest of valuation tick"
                        );
                        return self.abandon(report);
                    }
                }
            }
        }

        info!(
            enqueued = report.enqueued,
            duplicates = report.duplicates,
            fresh = report.fresh,
            purged = report.purged,
            "JobScheduler: valuation tick done"
        );
        report
    }

    /// Next trend and valuation fire times strictly after `now`
    pub fn next_fire_times(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let schedule = &self.ctx.config.schedule;
        (
            schedule.trend.after(&now).next(),
            schedule.valuation.after(&now).next(),
        )
    }

    async fn ticker(&self) {
        loop {
            let now = self.ctx.clock.now();
            let (next_trend, next_valuation) = self.next_fire_times(now);
            let next = match (next_trend, next_valuation) {
                (Some(t), Some(v)) => t.min(v),
                (Some(t), None) => t,
                (None, Some(v)) => v,
                (None, None) => {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    continue;
                }
            };

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if next_trend == Some(next) {
                self.run_trend_tick().await;
            }
            if next_valuation == Some(next) {
                self.run_valuation_tick().await;
            }
        }
    }

    /// Start the scheduler
    pub async fn start(&self) {
        let mut handle = self.handle.write().await;
        if handle.is_some() {
            return;
        }

        let this = self.clone();
        *handle = Some(tokio::spawn(async move {
            info!("JobScheduler: started, waiting for cron schedule...");
            this.ticker().await;
        }));
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        let mut handle = self.handle.write().await;
        if let Some(h) = handle.take() {
            h.abort();
            info!("JobScheduler: stopped");
        }
    }

    /// Check if the scheduler is running
    pub async fn is_running(&self) -> bool {
        let handle = self.handle.read().await;
        handle.is_some()
    }
}
