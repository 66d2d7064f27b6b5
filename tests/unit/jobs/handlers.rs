//! Unit tests for the trend and report handlers

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use estate_analytics::config::EngineConfig;
use estate_analytics::core::clock::ManualClock;
use estate_analytics::error::{JobError, StoreError};
use estate_analytics::jobs::context::JobContext;
use estate_analytics::jobs::handlers::{
    HandlerRegistry, JobHandler, JobOutcome, PropertyReportHandler, TrendHandler,
};
use estate_analytics::jobs::types::{AnalysisJob, JobKind, JobParams};
use estate_analytics::models::{
    AnalysisResult, AnalysisWindow, Confidence, MarketTrendResult, PropertyType,
};
use estate_analytics::store::{
    MemoryListingSource, MemoryResultStore, ResultStore, TrendPublisher,
};
use std::sync::{Arc, Mutex};

use crate::test_utils::{approx_eq, at, date, residential, TestContext};

fn austin_market() -> Vec<estate_analytics::models::Listing> {
    vec![
        residential(1, 480_000.0, date(2024, 6, 10)).with_coordinates(30.2672, -97.7431),
        residential(2, 520_000.0, date(2024, 6, 20)).with_coordinates(30.2680, -97.7440),
        residential(3, 475_000.0, date(2024, 5, 15)).with_coordinates(30.2690, -97.7420),
    ]
}

fn trend_job(city: &str) -> AnalysisJob {
    AnalysisJob::new(
        JobParams::trend(city, PropertyType::Residential),
        AnalysisWindow::days(30),
        at(2024, 6, 30, 2),
    )
}

fn report_job(listing_id: i64) -> AnalysisJob {
    AnalysisJob::new(
        JobParams::report(listing_id),
        AnalysisWindow::days(180),
        at(2024, 6, 30, 2),
    )
}

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<MarketTrendResult>>,
    fail: bool,
}

#[async_trait]
impl TrendPublisher for RecordingPublisher {
    async fn publish(&self, trend: &MarketTrendResult) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("market_trends offline".to_string()));
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(trend.clone());
        Ok(())
    }
}

fn context_with_publisher(
    publisher: Arc<RecordingPublisher>,
) -> (Arc<JobContext>, Arc<MemoryResultStore>) {
    let results = Arc::new(MemoryResultStore::new());
    let ctx = JobContext::new(
        Arc::new(MemoryListingSource::new(austin_market())),
        results.clone(),
        Arc::new(ManualClock::new(at(2024, 6, 30, 2))),
        Arc::new(EngineConfig::default()),
    )
    .with_trends_table(publisher);
    (Arc::new(ctx), results)
}

#[tokio::test]
async fn trend_handler_stores_result_under_idempotency_key() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));
    let job = trend_job("Austin");

    let outcome = TrendHandler.handle(&job, &t.ctx).await.unwrap();
    assert_eq!(outcome, JobOutcome::Computed);

    let entry = t
        .results
        .get("trend:austin:residential:30d")
        .await
        .unwrap()
        .expect("trend stored");
    let AnalysisResult::Trend(trend) = entry.value else {
        panic!("expected a trend result");
    };
    assert_eq!(trend.stats.count, 2);
    assert!(approx_eq(trend.trend_score, 0.263_158, 1e-5));
    assert_eq!(trend.calculated_at, at(2024, 6, 30, 2));
}

#[tokio::test]
async fn fresh_result_short_circuits_without_reading_listings() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));

    TrendHandler.handle(&trend_job("Austin"), &t.ctx).await.unwrap();
    let queries = t.listings.query_count();

    let outcome = TrendHandler.handle(&trend_job("Austin"), &t.ctx).await.unwrap();
    assert_eq!(outcome, JobOutcome::AlreadyFresh);
    assert_eq!(t.listings.query_count(), queries);
}

#[tokio::test]
async fn stale_result_is_recomputed() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));
    TrendHandler.handle(&trend_job("Austin"), &t.ctx).await.unwrap();

    t.clock.advance(ChronoDuration::hours(1));
    let outcome = TrendHandler.handle(&trend_job("Austin"), &t.ctx).await.unwrap();
    assert_eq!(outcome, JobOutcome::Computed);

    let entry = t.results.get("trend:austin:residential:30d").await.unwrap().unwrap();
    assert_eq!(entry.calculated_at, at(2024, 6, 30, 3));
}

#[tokio::test]
async fn configured_city_without_listings_yields_insufficient_data() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));
    TrendHandler.handle(&trend_job("Fort Worth"), &t.ctx).await.unwrap();

    let entry = t.results.get("trend:fort_worth:residential:30d").await.unwrap().unwrap();
    assert!(matches!(entry.value, AnalysisResult::Trend(ref trend) if trend.insufficient_data));
}

#[tokio::test]
async fn unknown_city_is_rejected_before_reading_listings() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));

    let err = TrendHandler.handle(&trend_job("Atlantis"), &t.ctx).await.unwrap_err();
    assert!(matches!(err, JobError::Validation(ref msg) if msg.contains("Atlantis")));
    assert!(!err.is_retryable());
    assert_eq!(t.listings.query_count(), 0);
    assert!(t.results.is_empty().await);

    // matching ignores case and surrounding whitespace
    TrendHandler.handle(&trend_job(" austin "), &t.ctx).await.unwrap();
}

#[tokio::test]
async fn non_finite_price_fails_the_trend_instead_of_zeroing_it() {
    let mut market = austin_market();
    market.push(residential(4, f64::NAN, date(2024, 6, 25)));
    let t = TestContext::new(market, at(2024, 6, 30, 2));

    let err = TrendHandler.handle(&trend_job("Austin"), &t.ctx).await.unwrap_err();
    assert!(matches!(err, JobError::Computation(_)));
    assert!(!err.is_retryable());
    assert!(t.results.is_empty().await);
}

#[tokio::test]
async fn unreachable_listing_source_is_transient() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));
    t.listings.set_unavailable(true);

    let err = TrendHandler.handle(&trend_job("Austin"), &t.ctx).await.unwrap_err();
    assert!(matches!(err, JobError::Transient(_)));
    assert!(t.results.is_empty().await);
}

#[tokio::test]
async fn trend_handler_rejects_other_job_kinds() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));
    let err = TrendHandler.handle(&report_job(1), &t.ctx).await.unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
}

#[tokio::test]
async fn trend_is_published_before_caching() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (ctx, results) = context_with_publisher(publisher.clone());

    TrendHandler.handle(&trend_job("Austin"), &ctx).await.unwrap();

    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].city, "Austin");
    assert!(results.get("trend:austin:residential:30d").await.unwrap().is_some());
}

#[tokio::test]
async fn failed_publish_leaves_key_stale() {
    let publisher = Arc::new(RecordingPublisher {
        fail: true,
        ..Default::default()
    });
    let (ctx, results) = context_with_publisher(publisher);

    let err = TrendHandler.handle(&trend_job("Austin"), &ctx).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(results.is_empty().await);
}

#[tokio::test]
async fn report_handler_builds_comparable_report() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));

    let outcome = PropertyReportHandler::report()
        .handle(&report_job(1), &t.ctx)
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Computed);

    let entry = t.results.get("report:listing:1:180d").await.unwrap().unwrap();
    let AnalysisResult::Report(report) = entry.value else {
        panic!("expected a report result");
    };
    assert_eq!(report.listing_id, 1);
    assert_eq!(report.analysis.comparable_count, 2);
    assert!(report.comparables.iter().all(|c| c.listing.id != 1));
    assert_eq!(report.analysis.confidence, Confidence::Low);
    assert_eq!(report.analysis.avg_comparable_price, Some(497_500.0));
}

#[tokio::test]
async fn comparable_lookback_is_the_narrower_of_config_and_window() {
    let mut config = EngineConfig::default();
    config.comparables.lookback_days = 30;
    let t = TestContext::with_config(austin_market(), at(2024, 6, 30, 2), config);

    // configured 30 days wins over the 180 day job window
    PropertyReportHandler::report()
        .handle(&report_job(1), &t.ctx)
        .await
        .unwrap();
    let entry = t.results.get("report:listing:1:180d").await.unwrap().unwrap();
    let AnalysisResult::Report(report) = entry.value else {
        panic!("expected a report result");
    };
    let ids: Vec<i64> = report.comparables.iter().map(|c| c.listing.id).collect();
    assert_eq!(ids, vec![2]);

    // a 30 day window narrows the default 180 day lookback the same way
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));
    let job = AnalysisJob::new(JobParams::report(1), AnalysisWindow::days(30), at(2024, 6, 30, 2));
    PropertyReportHandler::report().handle(&job, &t.ctx).await.unwrap();
    let entry = t.results.get("report:listing:1:30d").await.unwrap().unwrap();
    let AnalysisResult::Report(report) = entry.value else {
        panic!("expected a report result");
    };
    assert_eq!(report.analysis.comparable_count, 1);
}

#[tokio::test]
async fn missing_listing_is_a_validation_error() {
    let t = TestContext::new(austin_market(), at(2024, 6, 30, 2));
    let err = PropertyReportHandler::valuation()
        .handle(
            &AnalysisJob::new(JobParams::valuation(99), AnalysisWindow::days(180), at(2024, 6, 30, 2)),
            &t.ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(ref msg) if msg.contains("99")));
}

#[tokio::test]
async fn unusable_price_is_a_computation_error() {
    let t = TestContext::new(vec![residential(5, 0.0, date(2024, 6, 1))], at(2024, 6, 30, 2));
    let err = PropertyReportHandler::report()
        .handle(&report_job(5), &t.ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Computation(_)));
}

#[test]
fn standard_registry_serves_every_lane() {
    let registry = HandlerRegistry::standard();
    assert_eq!(
        registry.kinds(),
        vec![JobKind::Trend, JobKind::Valuation, JobKind::Report]
    );
    assert_eq!(registry.get(JobKind::Valuation).map(|h| h.kind()), Some(JobKind::Valuation));
    assert!(HandlerRegistry::new().get(JobKind::Trend).is_none());
}
