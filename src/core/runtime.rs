//! Worker pool draining the analytics lanes

use crate::config::QueueConfig;
use crate::error::{JobError, QueueError};
use crate::jobs::context::JobContext;
use crate::jobs::handlers::{HandlerRegistry, JobHandler, JobOutcome};
use crate::jobs::types::{AnalysisJob, JobKind};
use crate::queue::{JobQueue, Lease};
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What a worker did with one leased job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Success(JobOutcome),
    Retry { error: String, delay: Duration },
    DeadLetter { error: String },
}

impl DispatchStatus {
    pub fn needs_retry(&self) -> bool {
        matches!(self, DispatchStatus::Retry { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            DispatchStatus::Success(JobOutcome::Computed) => "success",
            DispatchStatus::Success(JobOutcome::AlreadyFresh) => "skipped",
            DispatchStatus::Retry { .. } => "retry",
            DispatchStatus::DeadLetter { .. } => "error",
        }
    }
}

/// A single worker bound to one lane
pub struct LaneWorker {
    id: usize,
    lane: JobKind,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    ctx: Arc<JobContext>,
    config: QueueConfig,
}

impl LaneWorker {
    pub fn new(
        id: usize,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        ctx: Arc<JobContext>,
        config: QueueConfig,
    ) -> Self {
        Self {
            id,
            lane: handler.kind(),
            queue,
            handler,
            ctx,
            config,
        }
    }

    pub fn lane(&self) -> JobKind {
        self.lane
    }

    /// Lease, execute and settle at most one job.
    ///
    /// `Ok(None)` when the lane had nothing deliverable.
    pub async fn run_once(&self) -> Result<Option<DispatchStatus>, QueueError> {
        let Some(lease) = self
            .queue
            .lease(self.lane, self.config.visibility_timeout)
            .await?
        else {
            return Ok(None);
        };

        debug!(
            job_id = %lease.job.job_id,
            attempt = lease.job.attempt_count + 1,
            "LaneWorker: leased job"
        );

        // Expired leases count as attempts; a job that keeps killing its
        // worker ends here instead of circulating forever.
        if lease.job.attempt_count >= self.config.retry.max_attempts {
            let status = DispatchStatus::DeadLetter {
                error: format!(
                    "retries exhausted after {} attempts: {}",
                    lease.job.attempt_count,
                    lease.job.last_error.as_deref().unwrap_or("unknown error")
                ),
            };
            self.settle(&lease, &status).await;
            return Ok(Some(status));
        }

        if let Some(ref metrics) = self.ctx.metrics {
            metrics.active_tasks.inc();
        }
        let started = Instant::now();
        let result = self.execute(&lease.job).await;
        let status = self.classify(&lease.job, result);
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.active_tasks.dec();
            metrics.record_task(self.lane.lane(), status.label(), started.elapsed().as_secs_f64());
        }

        self.settle(&lease, &status).await;
        Ok(Some(status))
    }

    /// Poll the lane until the task is aborted
    pub async fn run(self) {
        info!("LaneWorker: started");
        loop {
            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    warn!(error = %e, "LaneWorker: failed to lease job");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Run the handler in its own task under the job timeout
    async fn execute(&self, job: &AnalysisJob) -> Result<JobOutcome, JobError> {
        let handler = self.handler.clone();
        let ctx = self.ctx.clone();
        let owned = job.clone();
        let task = tokio::spawn(async move { handler.handle(&owned, &ctx).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(self.config.job_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => Err(JobError::Computation(format!(
                "handler panicked: {}",
                panic_message(join_error.into_panic())
            ))),
            Ok(Err(join_error)) => Err(JobError::Transient(format!(
                "handler task cancelled: {}",
                join_error
            ))),
            Err(_) => {
                abort.abort();
                Err(JobError::Timeout(self.config.job_timeout))
            }
        }
    }

    fn classify(&self, job: &AnalysisJob, result: Result<JobOutcome, JobError>) -> DispatchStatus {
        match result {
            Ok(outcome) => DispatchStatus::Success(outcome),
            Err(err) if err.is_retryable() => {
                let attempts_made = job.attempt_count + 1;
                if self.config.retry.should_retry(attempts_made) {
                    DispatchStatus::Retry {
                        error: err.to_string(),
                        delay: self.config.retry.delay_for(attempts_made),
                    }
                } else {
                    DispatchStatus::DeadLetter {
                        error: format!("retries exhausted after {} attempts: {}", attempts_made, err),
                    }
                }
            }
            Err(err) => DispatchStatus::DeadLetter {
                error: err.to_string(),
            },
        }
    }

    /// Apply the status to the lease. Failures are only logged: the lease
    /// then expires and the job is delivered again.
    async fn settle(&self, lease: &Lease, status: &DispatchStatus) {
        let job_id = &lease.job.job_id;
        let lane = self.lane.lane();

        let settled = match status {
            DispatchStatus::Success(outcome) => {
                if *outcome == JobOutcome::AlreadyFresh {
                    if let Some(ref metrics) = self.ctx.metrics {
                        metrics.jobs_short_circuited_total.with_label_values(&[lane]).inc();
                    }
                }
                debug!(job_id = %job_id, outcome = ?outcome, "LaneWorker: job completed");
                self.queue.ack(lease).await
            }
            DispatchStatus::Retry { error, delay } => {
                warn!(
                    job_id = %job_id,
                    attempt = lease.job.attempt_count + 1,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "LaneWorker: job failed, scheduling retry"
                );
                if let Some(ref metrics) = self.ctx.metrics {
                    metrics.jobs_retried_total.with_label_values(&[lane]).inc();
                }
                self.queue.nack(lease, *delay, error).await
            }
            DispatchStatus::DeadLetter { error } => {
                error!(
                    job_id = %job_id,
                    key = %lease.job.idempotency_key(),
                    attempt = lease.job.attempt_count + 1,
                    error = %error,
                    "LaneWorker: job dead-lettered"
                );
                if let Some(ref metrics) = self.ctx.metrics {
                    metrics.jobs_dead_lettered_total.with_label_values(&[lane]).inc();
                }
                self.queue.dead_letter(lease, error).await
            }
        };

        if let Err(e) = settled {
            warn!(job_id = %job_id, error = %e, "LaneWorker: could not settle lease, job will be redelivered");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Spawns the configured number of workers for every registered lane
pub struct AnalyticsRuntime {
    queue: Arc<dyn JobQueue>,
    registry: HandlerRegistry,
    ctx: Arc<JobContext>,
    config: QueueConfig,
}

impl AnalyticsRuntime {
    pub fn new(queue: Arc<dyn JobQueue>, registry: HandlerRegistry, ctx: Arc<JobContext>) -> Self {
        let config = ctx.config.queue.clone();
        Self {
            queue,
            registry,
            ctx,
            config,
        }
    }

    pub fn concurrency(&self, lane: JobKind) -> usize {
        let c = &self.config.concurrency;
        match lane {
            JobKind::Trend => c.trend,
            JobKind::Valuation => c.valuation,
            JobKind::Report => c.report,
        }
    }

    /// One worker per configured slot of each lane with a handler
    pub fn workers(&self) -> Vec<LaneWorker> {
        let mut workers = Vec::new();
        for lane in JobKind::ALL {
            let Some(handler) = self.registry.get(lane) else {
                warn!(lane = %lane, "AnalyticsRuntime: no handler registered, lane left idle");
                continue;
            };
            for id in 0..self.concurrency(lane) {
                workers.push(LaneWorker::new(
                    id,
                    self.queue.clone(),
                    handler.clone(),
                    self.ctx.clone(),
                    self.config.clone(),
                ));
            }
        }
        workers
    }

    /// Start all workers and return handles for graceful shutdown
    pub fn start_workers(&self) -> Vec<JoinHandle<()>> {
        let workers = self.workers();
        info!(
            workers = workers.len(),
            trend = self.concurrency(JobKind::Trend),
            valuation = self.concurrency(JobKind::Valuation),
            report = self.concurrency(JobKind::Report),
            "AnalyticsRuntime: starting {} workers",
            workers.len()
        );

        workers
            .into_iter()
            .map(|worker| {
                let span = info_span!("worker", lane = %worker.lane(), id = worker.id);
                tokio::spawn(worker.run().instrument(span))
            })
            .collect()
    }
}
