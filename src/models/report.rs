use super::listing::Listing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePosition {
    BelowMarket,
    MarketRate,
    AboveMarket,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparable {
    pub listing: Listing,
    /// 1 / (1 + weighted distance), 1.0 for an identical property
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportAnalysis {
    pub comparable_count: usize,
    pub avg_comparable_price: Option<f64>,
    pub price_position: PricePosition,
    pub price_per_sqft: Option<f64>,
    pub estimated_days_on_market: u32,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyReport {
    pub listing_id: i64,
    pub listing: Listing,
    pub comparables: Vec<Comparable>,
    pub analysis: ReportAnalysis,
    pub generated_at: DateTime<Utc>,
}
