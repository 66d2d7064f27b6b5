use super::report::PropertyReport;
use super::trend::MarketTrendResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A published computation, as read by the listings API and metrics exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    Trend(MarketTrendResult),
    Report(PropertyReport),
}

impl AnalysisResult {
    pub fn calculated_at(&self) -> DateTime<Utc> {
        match self {
            AnalysisResult::Trend(t) => t.calculated_at,
            AnalysisResult::Report(r) => r.generated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: AnalysisResult,
    pub calculated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: AnalysisResult, retention: Duration) -> Self {
        let calculated_at = value.calculated_at();
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.into(),
            value,
            calculated_at,
            expires_at: calculated_at
                .checked_add_signed(retention)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Fresh entries short-circuit recomputation
    pub fn is_fresh(&self, now: DateTime<Utc>, staleness_ttl: Duration) -> bool {
        match (now - self.calculated_at).to_std() {
            Ok(age) => age < staleness_ttl,
            // calculated_at in the future (clock skew between writers)
            Err(_) => true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
