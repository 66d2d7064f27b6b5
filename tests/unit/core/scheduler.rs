//! Unit tests for the job scheduler

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use estate_analytics::config::EngineConfig;
use estate_analytics::core::clock::ManualClock;
use estate_analytics::core::scheduler::{JobScheduler, Submission};
use estate_analytics::error::{JobError, QueueError};
use estate_analytics::jobs::context::JobContext;
use estate_analytics::jobs::types::{AnalysisJob, JobKind, JobParams, JobPriority};
use estate_analytics::metrics::Metrics;
use estate_analytics::models::{AnalysisWindow, ListingStatus, PropertyType};
use estate_analytics::queue::{DeadLetter, Enqueued, JobQueue, Lease, MemoryQueue};
use estate_analytics::store::{MemoryListingSource, MemoryResultStore, ResultStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::test_utils::{at, date, residential, trend_entry, TestContext};

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

fn scheduler(t: &TestContext) -> (JobScheduler, Arc<MemoryQueue>) {
    let queue = Arc::new(MemoryQueue::new(t.clock.clone()));
    (JobScheduler::new(queue.clone(), t.ctx.clone()), queue)
}

/// Accepts `allowed` jobs, then reports the backend as down
struct FlakyQueue {
    inner: MemoryQueue,
    allowed: usize,
    accepted: AtomicUsize,
}

#[async_trait]
impl JobQueue for FlakyQueue {
    async fn enqueue(&self, job: AnalysisJob) -> Result<Enqueued, QueueError> {
        if self.accepted.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(QueueError::Unavailable("redis connection refused".to_string()));
        }
        self.inner.enqueue(job).await
    }

    async fn lease(&self, lane: JobKind, visibility: Duration) -> Result<Option<Lease>, QueueError> {
        self.inner.lease(lane, visibility).await
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        self.inner.ack(lease).await
    }

    async fn nack(&self, lease: &Lease, delay: Duration, reason: &str) -> Result<(), QueueError> {
        self.inner.nack(lease, delay, reason).await
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<(), QueueError> {
        self.inner.dead_letter(lease, reason).await
    }

    async fn dead_letters(&self, lane: JobKind) -> Result<Vec<DeadLetter>, QueueError> {
        self.inner.dead_letters(lane).await
    }

    async fn depth(&self, lane: JobKind) -> Result<usize, QueueError> {
        self.inner.depth(lane).await
    }
}

#[tokio::test]
async fn trend_tick_enqueues_every_market_dimension() {
    let t = TestContext::new(vec![], at(2024, 6, 30, 2));
    let (scheduler, queue) = scheduler(&t);

    let report = scheduler.run_trend_tick().await;
    assert_eq!(report.enqueued, 10);
    assert!(!report.skipped);
    assert_eq!(queue.depth(JobKind::Trend).await.unwrap(), 10);

    // jobs still pending collapse onto the queued ones
    let again = scheduler.run_trend_tick().await;
    assert_eq!(again.enqueued, 0);
    assert_eq!(again.duplicates, 10);
    assert_eq!(queue.depth(JobKind::Trend).await.unwrap(), 10);
}

#[tokio::test]
async fn trend_tick_skips_fresh_dimensions() {
    let t = TestContext::new(vec![], at(2024, 6, 30, 2));
    t.results
        .upsert(trend_entry("trend:austin:residential:30d", at(2024, 6, 30, 2), WEEK))
        .await
        .unwrap();
    let (scheduler, _queue) = scheduler(&t);

    let report = scheduler.run_trend_tick().await;
    assert_eq!(report.fresh, 1);
    assert_eq!(report.enqueued, 9);
}

#[tokio::test]
async fn queue_failure_abandons_the_tick() {
    let clock = Arc::new(ManualClock::new(at(2024, 6, 30, 2)));
    let metrics = Arc::new(Metrics::new().unwrap());
    let ctx = Arc::new(
        JobContext::new(
            Arc::new(MemoryListingSource::default()),
            Arc::new(MemoryResultStore::new()),
            clock.clone(),
            Arc::new(EngineConfig::default()),
        )
        .with_metrics(metrics.clone()),
    );
    let queue = Arc::new(FlakyQueue {
        inner: MemoryQueue::new(clock),
        allowed: 3,
        accepted: AtomicUsize::new(0),
    });
    let scheduler = JobScheduler::new(queue.clone(), ctx);

    let report = scheduler.run_trend_tick().await;
    assert!(report.skipped);
    assert_eq!(report.enqueued, 3);
    assert_eq!(queue.depth(JobKind::Trend).await.unwrap(), 3);
    assert_eq!(metrics.scheduler_ticks_skipped_total.get(), 1);
    assert_eq!(metrics.jobs_enqueued_total.with_label_values(&["trend"]).get(), 3);
}

#[tokio::test]
async fn valuation_tick_requeues_active_listings_at_low_priority() {
    let t = TestContext::new(
        vec![
            residential(1, 400_000.0, date(2024, 6, 1)),
            residential(2, 410_000.0, date(2024, 6, 2)),
            residential(3, 420_000.0, date(2024, 6, 3)),
            residential(4, 430_000.0, date(2024, 6, 4)).with_status(ListingStatus::Sold),
        ],
        at(2024, 6, 30, 2),
    );
    let (scheduler, queue) = scheduler(&t);

    let report = scheduler.run_valuation_tick().await;
    assert_eq!(report.enqueued, 3);
    assert!(!report.skipped);

    let lease = queue
        .lease(JobKind::Valuation, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lease.job.priority, JobPriority::Low);
    assert_eq!(lease.job.window, AnalysisWindow::days(180));
}

#[tokio::test]
async fn valuation_tick_purges_expired_results() {
    let t = TestContext::new(vec![], at(2024, 6, 30, 2));
    t.results
        .upsert(trend_entry("old", at(2024, 6, 20, 0), WEEK))
        .await
        .unwrap();
    t.results
        .upsert(trend_entry("new", at(2024, 6, 29, 0), WEEK))
        .await
        .unwrap();
    let (scheduler, _queue) = scheduler(&t);

    let report = scheduler.run_valuation_tick().await;
    assert_eq!(report.purged, 1);
    assert_eq!(t.results.len().await, 1);
}

#[tokio::test]
async fn valuation_tick_skipped_when_listings_unreachable() {
    let t = TestContext::new(vec![residential(1, 400_000.0, date(2024, 6, 1))], at(2024, 6, 30, 2));
    t.listings.set_unavailable(true);
    let (scheduler, queue) = scheduler(&t);

    let report = scheduler.run_valuation_tick().await;
    assert!(report.skipped);
    assert_eq!(report.enqueued, 0);
    assert_eq!(queue.depth(JobKind::Valuation).await.unwrap(), 0);
}

#[tokio::test]
async fn submit_deduplicates_and_respects_fresh_results() {
    let t = TestContext::new(vec![], at(2024, 6, 30, 2));
    let (scheduler, _queue) = scheduler(&t);
    let window = AnalysisWindow::days(30);

    let first = scheduler
        .submit(JobParams::report(7), window, JobPriority::High)
        .await
        .unwrap();
    let second = scheduler
        .submit(JobParams::report(7), window, JobPriority::High)
        .await
        .unwrap();
    assert!(matches!(first, Submission::Queued(_)));
    assert_eq!(second, Submission::AlreadyQueued(first.job_id().unwrap().to_string()));

    t.results
        .upsert(trend_entry("trend:dallas:land:30d", at(2024, 6, 30, 2), WEEK))
        .await
        .unwrap();
    let fresh = scheduler
        .submit(JobParams::trend("Dallas", PropertyType::Land), window, JobPriority::Normal)
        .await
        .unwrap();
    assert!(matches!(fresh, Submission::Fresh(ref key) if key.as_str() == "trend:dallas:land:30d"));
    assert_eq!(fresh.job_id(), None);
}

#[tokio::test]
async fn submit_rejects_invalid_jobs() {
    let t = TestContext::new(vec![], at(2024, 6, 30, 2));
    let (scheduler, queue) = scheduler(&t);

    let err = scheduler
        .submit(JobParams::valuation(-1), AnalysisWindow::days(30), JobPriority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    let err = scheduler
        .submit(JobParams::report(1), AnalysisWindow::days(0), JobPriority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
    assert_eq!(queue.depth(JobKind::Report).await.unwrap(), 0);

    let err = scheduler
        .submit(
            JobParams::trend("Atlantis", PropertyType::Residential),
            AnalysisWindow::days(30),
            JobPriority::Normal,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(ref msg) if msg.contains("Atlantis")));
    assert_eq!(queue.depth(JobKind::Trend).await.unwrap(), 0);
}

#[tokio::test]
async fn next_fire_times_follow_cron_schedules() {
    let t = TestContext::new(vec![], at(2024, 6, 30, 1));
    let (scheduler, _queue) = scheduler(&t);

    let before = at(2024, 6, 30, 1) + ChronoDuration::minutes(30);
    let (trend, valuation) = scheduler.next_fire_times(before);
    assert_eq!(trend, Some(at(2024, 6, 30, 2)));
    assert_eq!(valuation, Some(at(2024, 6, 30, 2)));

    let after = at(2024, 6, 30, 2) + ChronoDuration::minutes(30);
    let (trend, valuation) = scheduler.next_fire_times(after);
    assert_eq!(trend, Some(at(2024, 7, 1, 2)));
    assert_eq!(valuation, Some(at(2024, 6, 30, 3)));
}

#[tokio::test]
async fn start_and_stop_toggle_running_state() {
    let t = TestContext::new(vec![], at(2024, 6, 30, 1));
    let (scheduler, _queue) = scheduler(&t);

    assert!(!scheduler.is_running().await);
    scheduler.start().await;
    scheduler.start().await;
    assert!(scheduler.is_running().await);
    scheduler.stop().await;
    assert!(!scheduler.is_running().await);
}
