//! Job types for the analytics pipeline

use crate::error::JobError;
use crate::models::{AnalysisWindow, PropertyType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Job type; each kind is served by its own queue lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Trend,
    Valuation,
    Report,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Trend, JobKind::Valuation, JobKind::Report];

    /// Name of the queue lane carrying this kind
    pub fn lane(&self) -> &'static str {
        match self {
            JobKind::Trend => "trend",
            JobKind::Valuation => "valuation",
            JobKind::Report => "report",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lane())
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl JobPriority {
    /// 0 for the most urgent priority
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Low => 2,
        }
    }
}

/// Market dimension analysed by a trend job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrendParams {
    pub city: String,
    pub property_type: PropertyType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListingParams {
    pub listing_id: i64,
}

/// Job parameters; the variant determines the job kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobParams {
    Trend(TrendParams),
    Valuation(ListingParams),
    Report(ListingParams),
}

impl JobParams {
    pub fn trend(city: impl Into<String>, property_type: PropertyType) -> Self {
        JobParams::Trend(TrendParams {
            city: city.into(),
            property_type,
        })
    }

    pub fn valuation(listing_id: i64) -> Self {
        JobParams::Valuation(ListingParams { listing_id })
    }

    pub fn report(listing_id: i64) -> Self {
        JobParams::Report(ListingParams { listing_id })
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobParams::Trend(_) => JobKind::Trend,
            JobParams::Valuation(_) => JobKind::Valuation,
            JobParams::Report(_) => JobKind::Report,
        }
    }

    pub fn listing_id(&self) -> Option<i64> {
        match self {
            JobParams::Trend(_) => None,
            JobParams::Valuation(p) | JobParams::Report(p) => Some(p.listing_id),
        }
    }

    /// Structural checks that need no data access
    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            JobParams::Trend(p) if p.city.trim().is_empty() => {
                Err(JobError::Validation("city must not be empty".to_string()))
            }
            JobParams::Valuation(p) | JobParams::Report(p) if p.listing_id <= 0 => Err(
                JobError::Validation(format!("invalid listing id {}", p.listing_id)),
            ),
            _ => Ok(()),
        }
    }
}

/// Deterministic identity of a job: (kind, params, window)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(params: &JobParams, window: AnalysisWindow) -> Self {
        let key = match params {
            JobParams::Trend(p) => format!(
                "{}:{}:{}:{}",
                JobKind::Trend,
                p.city.to_lowercase().replace(' ', "_"),
                p.property_type,
                window
            ),
            JobParams::Valuation(p) | JobParams::Report(p) => {
                format!("{}:listing:{}:{}", params.kind(), p.listing_id, window)
            }
        };
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work travelling through a queue lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: String,
    pub params: JobParams,
    pub window: AnalysisWindow,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl AnalysisJob {
    pub fn new(params: JobParams, window: AnalysisWindow, created_at: DateTime<Utc>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            params,
            window,
            priority: JobPriority::default(),
            attempt_count: 0,
            created_at,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> JobKind {
        self.params.kind()
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.params, self.window)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        self.params.validate()?;
        self.window.validate().map_err(JobError::Validation)
    }
}
