use super::listing::PropertyType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

/// Price statistics over the listings of one window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketStats {
    pub count: usize,
    pub avg_price: f64,
    pub median_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub price_stddev: f64,
    pub avg_days_on_market: f64,
    pub avg_price_per_sqft: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyTrend {
    pub week_start: NaiveDate,
    pub listing_count: usize,
    pub avg_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrendResult {
    pub city: String,
    pub property_type: PropertyType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub window_days: u32,
    pub stats: MarketStats,
    pub previous_avg_price: f64,
    pub pct_change: f64,
    /// Bounded momentum indicator in [-1, 1]
    pub trend_score: f64,
    pub direction: TrendDirection,
    pub weekly_trends: Vec<WeeklyTrend>,
    pub insufficient_data: bool,
    pub calculated_at: DateTime<Utc>,
}
