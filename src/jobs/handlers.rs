//! Job handlers for the analytics lanes

use crate::analytics::geo::BoundingBox;
use crate::analytics::{ComparableEngine, TrendEngine, TrendRequest};
use crate::config::ComparableConfig;
use crate::error::JobError;
use crate::jobs::context::JobContext;
use crate::jobs::types::{AnalysisJob, JobKind, JobParams};
use crate::models::{AnalysisResult, CacheEntry};
use crate::store::CandidateArea;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// A new result was computed and stored
    Computed,
    /// A fresh result already existed; nothing was read or written
    AlreadyFresh,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn handle(&self, job: &AnalysisJob, ctx: &JobContext) -> Result<JobOutcome, JobError>;
}

/// Job kind to handler mapping, built once at startup
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trend, valuation and report handlers
    pub fn standard() -> Self {
        Self::new()
            .register(Arc::new(TrendHandler))
            .register(Arc::new(PropertyReportHandler::valuation()))
            .register(Arc::new(PropertyReportHandler::report()))
    }

    /// Add `handler`, replacing any handler already registered for its kind
    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// Computes the rolling market trend of one (city, property type)
pub struct TrendHandler;

#[async_trait]
impl JobHandler for TrendHandler {
    fn kind(&self) -> JobKind {
        JobKind::Trend
    }

    async fn handle(&self, job: &AnalysisJob, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        let JobParams::Trend(params) = &job.params else {
            return Err(JobError::Validation(format!(
                "trend handler received {} job",
                job.kind()
            )));
        };
        ctx.validate_job(job)?;

        let key = job.idempotency_key();
        if ctx.fresh_entry(key.as_str()).await.is_some() {
            debug!(key = %key, "TrendHandler: fresh result exists, skipping");
            return Ok(JobOutcome::AlreadyFresh);
        }

        let as_of = ctx.as_of();
        let from = job.window.start_from(job.window.start_from(as_of));
        let listings = ctx
            .listings
            .active_listings(&params.city, params.property_type, from, as_of)
            .await?;

        let request = TrendRequest {
            city: &params.city,
            property_type: params.property_type,
            as_of,
            window: job.window,
        };
        let trend = TrendEngine::compute(&request, &listings, ctx.clock.now());

        if !trend.trend_score.is_finite() || !trend.stats.avg_price.is_finite() {
            return Err(JobError::Computation(format!(
                "non-finite trend for {} {}",
                params.city, params.property_type
            )));
        }

        // Must precede the cache upsert, which marks the key fresh.
        if let Some(ref table) = ctx.trends_table {
            table.publish(&trend).await?;
        }

        info!(
            city = %params.city,
            property_type = %params.property_type,
            window = %job.window,
            listings = trend.stats.count,
            trend_score = trend.trend_score,
            direction = ?trend.direction,
            insufficient_data = trend.insufficient_data,
            "TrendHandler: market trend calculated for {} ({})",
            params.city,
            params.property_type
        );

        let entry = CacheEntry::new(
            key.as_str(),
            AnalysisResult::Trend(trend),
            ctx.config.cache.retention_ttl,
        );
        ctx.results.upsert(entry).await?;

        if let Some(ref metrics) = ctx.metrics {
            metrics.market_trends_calculated_total.inc();
        }
        Ok(JobOutcome::Computed)
    }
}

/// Comparable-market report for one listing
///
/// Serves both the scheduled valuation lane and the on-demand report lane;
/// comparables must have been listed within both the job window and the
/// configured lookback.
pub struct PropertyReportHandler {
    kind: JobKind,
}

impl PropertyReportHandler {
    pub fn valuation() -> Self {
        Self {
            kind: JobKind::Valuation,
        }
    }

    pub fn report() -> Self {
        Self {
            kind: JobKind::Report,
        }
    }
}

#[async_trait]
impl JobHandler for PropertyReportHandler {
    fn kind(&self) -> JobKind {
        self.kind
    }

    async fn handle(&self, job: &AnalysisJob, ctx: &JobContext) -> Result<JobOutcome, JobError> {
        let Some(listing_id) = job.params.listing_id() else {
            return Err(JobError::Validation(format!(
                "{} handler received {} job",
                self.kind,
                job.kind()
            )));
        };
        ctx.validate_job(job)?;

        let key = job.idempotency_key();
        if ctx.fresh_entry(key.as_str()).await.is_some() {
            debug!(key = %key, "PropertyReportHandler: fresh result exists, skipping");
            return Ok(JobOutcome::AlreadyFresh);
        }

        let target = ctx
            .listings
            .listing(listing_id)
            .await?
            .ok_or_else(|| JobError::Validation(format!("listing {} not found", listing_id)))?;

        if !target.price.is_finite() || target.price <= 0.0 {
            return Err(JobError::Computation(format!(
                "listing {} has unusable price {}",
                listing_id, target.price
            )));
        }

        // The job window can only narrow the configured lookback.
        let engine = ComparableEngine::new(ComparableConfig {
            lookback_days: ctx.config.comparables.lookback_days.min(job.window.as_days()),
            ..ctx.config.comparables.clone()
        });

        let as_of = ctx.as_of();
        let area = match target.coordinates() {
            Some(center) => CandidateArea::Around {
                city: target.city.clone(),
                bbox: BoundingBox::around(center, engine.config().radius_km),
            },
            None => CandidateArea::City(target.city.clone()),
        };
        let candidates = ctx
            .listings
            .comparable_candidates(
                target.property_type,
                &area,
                engine.lookback_start(as_of),
                as_of,
            )
            .await?;

        let report = engine.build_report(&target, &candidates, as_of, ctx.clock.now());

        info!(
            listing_id = listing_id,
            lane = %self.kind,
            candidates = candidates.len(),
            comparables = report.analysis.comparable_count,
            position = ?report.analysis.price_position,
            confidence = ?report.analysis.confidence,
            "PropertyReportHandler: report generated for listing {}",
            listing_id
        );

        let entry = CacheEntry::new(
            key.as_str(),
            AnalysisResult::Report(report),
            ctx.config.cache.retention_ttl,
        );
        ctx.results.upsert(entry).await?;

        if let Some(ref metrics) = ctx.metrics {
            metrics.listings_processed_total.inc();
        }
        Ok(JobOutcome::Computed)
    }
}
