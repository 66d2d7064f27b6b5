//! Unit tests for job identity and validation

use estate_analytics::error::JobError;
use estate_analytics::jobs::types::{AnalysisJob, IdempotencyKey, JobKind, JobParams, JobPriority};
use estate_analytics::models::{AnalysisWindow, PropertyType};

use crate::test_utils::at;

#[test]
fn idempotency_keys_are_readable_and_normalized() {
    let key = IdempotencyKey::new(
        &JobParams::trend("Austin", PropertyType::Residential),
        AnalysisWindow::days(30),
    );
    assert_eq!(key.as_str(), "trend:austin:residential:30d");

    let key = IdempotencyKey::new(
        &JobParams::trend("San Antonio", PropertyType::Commercial),
        AnalysisWindow::days(30),
    );
    assert_eq!(key.as_str(), "trend:san_antonio:commercial:30d");

    let key = IdempotencyKey::new(&JobParams::valuation(42), AnalysisWindow::days(180));
    assert_eq!(key.as_str(), "valuation:listing:42:180d");

    let key = IdempotencyKey::new(&JobParams::report(42), AnalysisWindow::days(180));
    assert_eq!(key.to_string(), "report:listing:42:180d");
}

#[test]
fn key_ignores_job_id_and_priority() {
    let params = JobParams::trend("Dallas", PropertyType::Residential);
    let a = AnalysisJob::new(params.clone(), AnalysisWindow::days(30), at(2024, 6, 1, 0));
    let b = AnalysisJob::new(params, AnalysisWindow::days(30), at(2024, 6, 2, 0))
        .with_priority(JobPriority::High);

    assert_ne!(a.job_id, b.job_id);
    assert_eq!(a.idempotency_key(), b.idempotency_key());
}

#[test]
fn key_depends_on_window_and_kind() {
    let thirty = IdempotencyKey::new(&JobParams::valuation(1), AnalysisWindow::days(30));
    let ninety = IdempotencyKey::new(&JobParams::valuation(1), AnalysisWindow::days(90));
    let report = IdempotencyKey::new(&JobParams::report(1), AnalysisWindow::days(30));
    assert_ne!(thirty, ninety);
    assert_ne!(thirty, report);
}

#[test]
fn params_determine_the_lane() {
    assert_eq!(JobParams::trend("Austin", PropertyType::Land).kind(), JobKind::Trend);
    assert_eq!(JobParams::valuation(1).kind(), JobKind::Valuation);
    assert_eq!(JobParams::report(1).kind(), JobKind::Report);
    assert_eq!(JobParams::report(9).listing_id(), Some(9));
    assert_eq!(JobParams::trend("Austin", PropertyType::Land).listing_id(), None);
}

#[test]
fn validation_rejects_malformed_jobs() {
    let job = |params, days| AnalysisJob::new(params, AnalysisWindow::days(days), at(2024, 6, 1, 0));

    assert!(job(JobParams::trend("Austin", PropertyType::Residential), 30).validate().is_ok());
    assert!(matches!(
        job(JobParams::trend("  ", PropertyType::Residential), 30).validate(),
        Err(JobError::Validation(_))
    ));
    assert!(matches!(job(JobParams::valuation(0), 30).validate(), Err(JobError::Validation(_))));
    assert!(matches!(job(JobParams::report(-3), 30).validate(), Err(JobError::Validation(_))));
    assert!(matches!(job(JobParams::valuation(1), 0).validate(), Err(JobError::Validation(_))));
    assert!(matches!(job(JobParams::valuation(1), 400).validate(), Err(JobError::Validation(_))));
}

#[test]
fn validation_errors_are_not_retryable() {
    assert!(!JobError::Validation("bad".into()).is_retryable());
    assert!(!JobError::Computation("nan".into()).is_retryable());
    assert!(JobError::Transient("db down".into()).is_retryable());
    assert!(JobError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
}

#[test]
fn jobs_decode_with_defaults() {
    let raw = r#"{
        "job_id": "abc",
        "params": {"type": "trend", "city": "Austin", "property_type": "residential"},
        "window": 30,
        "created_at": "2024-06-30T02:00:00Z"
    }"#;

    let job: AnalysisJob = serde_json::from_str(raw).unwrap();
    assert_eq!(job.kind(), JobKind::Trend);
    assert_eq!(job.priority, JobPriority::Normal);
    assert_eq!(job.attempt_count, 0);
    assert_eq!(job.last_error, None);
    assert_eq!(job.idempotency_key().as_str(), "trend:austin:residential:30d");
}
