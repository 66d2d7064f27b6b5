//! Job context for dependency injection

use crate::config::EngineConfig;
use crate::core::clock::Clock;
use crate::error::JobError;
use crate::jobs::types::{AnalysisJob, JobParams};
use crate::metrics::Metrics;
use crate::models::CacheEntry;
use crate::store::{ListingSource, ResultStore, TrendPublisher};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::warn;

/// Context shared by every job handler
///
/// Contains:
/// - Listing source (read-only, pooled connections)
/// - Result store (cache of published results)
/// - Optional `market_trends` publisher
/// - Metrics, clock and configuration
pub struct JobContext {
    pub listings: Arc<dyn ListingSource>,
    pub results: Arc<dyn ResultStore>,
    pub trends_table: Option<Arc<dyn TrendPublisher>>,
    pub metrics: Option<Arc<Metrics>>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<EngineConfig>,
}

impl JobContext {
    pub fn new(
        listings: Arc<dyn ListingSource>,
        results: Arc<dyn ResultStore>,
        clock: Arc<dyn Clock>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            listings,
            results,
            trends_table: None,
            metrics: None,
            clock,
            config,
        }
    }

    pub fn with_trends_table(mut self, table: Arc<dyn TrendPublisher>) -> Self {
        self.trends_table = Some(table);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Date the analysis windows end on
    pub fn as_of(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    /// Structural checks plus the cities this engine is configured for.
    ///
    /// A trend job for a city outside `market.cities` can never succeed, so
    /// it fails validation instead of producing an empty trend.
    pub fn validate_job(&self, job: &AnalysisJob) -> Result<(), JobError> {
        job.validate()?;
        if let JobParams::Trend(ref params) = job.params {
            let city = params.city.trim();
            let known = self
                .config
                .market
                .cities
                .iter()
                .any(|c| c.eq_ignore_ascii_case(city));
            if !known {
                return Err(JobError::Validation(format!("unknown city {}", params.city)));
            }
        }
        Ok(())
    }

    /// The cached entry for `key` if it is still fresh.
    ///
    /// A failing read counts as "not fresh" so the caller recomputes.
    pub async fn fresh_entry(&self, key: &str) -> Option<CacheEntry> {
        match self.results.get(key).await {
            Ok(Some(entry)) if entry.is_fresh(self.clock.now(), self.config.cache.staleness_ttl) => {
                Some(entry)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "JobContext: result store read failed, treating as stale");
                None
            }
        }
    }
}
