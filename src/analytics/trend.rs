//! Rolling market statistics and trend scoring

use super::stats;
use crate::models::{
    AnalysisWindow, Listing, MarketStats, MarketTrendResult, PropertyType, TrendDirection,
    WeeklyTrend,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Relative change at which the trend score saturates at ±1
pub const TREND_SATURATION: f64 = 0.2;

/// Relative change between the first and last weekly averages below which
/// the market is considered flat
pub const DIRECTION_THRESHOLD: f64 = 0.005;

pub const BUCKET_DAYS: i64 = 7;

/// One (city, property type) dimension evaluated over the window ending at `as_of`
#[derive(Debug, Clone)]
pub struct TrendRequest<'a> {
    pub city: &'a str,
    pub property_type: PropertyType,
    pub as_of: NaiveDate,
    pub window: AnalysisWindow,
}

pub struct TrendEngine;

impl TrendEngine {
    /// Compute the trend result from listings covering `[as_of - 2W, as_of]`.
    ///
    /// Listings of other dimensions, inactive listings and listings outside
    /// both windows are ignored. The output depends only on the inputs, so
    /// recomputing an unchanged dimension differs only in `calculated_at`.
    pub fn compute(
        request: &TrendRequest<'_>,
        listings: &[Listing],
        calculated_at: DateTime<Utc>,
    ) -> MarketTrendResult {
        let period_end = request.as_of;
        let period_start = request.window.start_from(period_end);
        let previous_start = request.window.start_from(period_start);

        let relevant = listings.iter().filter(|l| {
            l.is_active() && l.city == request.city && l.property_type == request.property_type
        });

        let mut current = Vec::new();
        let mut previous = Vec::new();
        for listing in relevant {
            let date = listing.listing_date;
            if date >= period_start && date <= period_end {
                current.push(listing);
            } else if date >= previous_start && date < period_start {
                previous.push(listing);
            }
        }

        let previous_prices: Vec<f64> = previous.iter().map(|l| l.price).collect();
        let previous_avg_price = stats::mean(&previous_prices);
        let weekly_trends = Self::weekly_breakdown(&current, period_start, period_end);

        let (stats, pct_change, trend_score, direction) = if current.is_empty() {
            (MarketStats::default(), 0.0, 0.0, TrendDirection::Flat)
        } else {
            let stats = Self::market_stats(&current, period_end);
            let pct_change = stats::relative_change(stats.avg_price, previous_avg_price);
            (
                stats,
                pct_change,
                Self::score_change(pct_change),
                Self::classify_direction(&weekly_trends),
            )
        };

        MarketTrendResult {
            city: request.city.to_string(),
            property_type: request.property_type,
            period_start,
            period_end,
            window_days: request.window.as_days(),
            insufficient_data: current.is_empty(),
            stats,
            previous_avg_price,
            pct_change,
            trend_score,
            direction,
            weekly_trends,
            calculated_at,
        }
    }

    /// Trend score from the current and previous window averages
    pub fn trend_score(current_avg: f64, previous_avg: f64) -> f64 {
        Self::score_change(stats::relative_change(current_avg, previous_avg))
    }

    fn score_change(pct_change: f64) -> f64 {
        stats::safe_div(pct_change, TREND_SATURATION).clamp(-1.0, 1.0)
    }

    pub fn market_stats(listings: &[&Listing], as_of: NaiveDate) -> MarketStats {
        let prices: Vec<f64> = listings.iter().map(|l| l.price).collect();
        let days: Vec<f64> = listings
            .iter()
            .map(|l| l.days_on_market(as_of) as f64)
            .collect();
        let per_sqft: Vec<f64> = listings.iter().filter_map(|l| l.price_per_sqft()).collect();

        MarketStats {
            count: listings.len(),
            avg_price: stats::mean(&prices),
            median_price: stats::median(&prices),
            min_price: stats::min(&prices),
            max_price: stats::max(&prices),
            price_stddev: stats::sample_stddev(&prices),
            avg_days_on_market: stats::mean(&days),
            avg_price_per_sqft: stats::mean(&per_sqft),
        }
    }

    /// Partition `[period_start, period_end]` into 7-day buckets, the last one
    /// possibly shorter
    pub fn weekly_breakdown(
        listings: &[&Listing],
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Vec<WeeklyTrend> {
        let span = (period_end - period_start).num_days().max(0);
        let bucket_count = (span / BUCKET_DAYS + 1) as usize;
        let mut prices: Vec<Vec<f64>> = vec![Vec::new(); bucket_count];

        for listing in listings {
            let offset = (listing.listing_date - period_start).num_days();
            if offset < 0 || offset > span {
                continue;
            }
            prices[(offset / BUCKET_DAYS) as usize].push(listing.price);
        }

        prices
            .iter()
            .enumerate()
            .map(|(i, bucket)| WeeklyTrend {
                week_start: period_start + Duration::days(i as i64 * BUCKET_DAYS),
                listing_count: bucket.len(),
                avg_price: stats::mean(bucket),
            })
            .collect()
    }

    /// Compare the first and last non-empty buckets
    pub fn classify_direction(weekly: &[WeeklyTrend]) -> TrendDirection {
        let mut populated = weekly.iter().filter(|w| w.listing_count > 0);
        let (first, last) = match (populated.next(), populated.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return TrendDirection::Flat,
        };

        let delta = stats::relative_change(last.avg_price, first.avg_price);
        if delta > DIRECTION_THRESHOLD {
            TrendDirection::Up
        } else if delta < -DIRECTION_THRESHOLD {
            TrendDirection::Down
        } else {
            TrendDirection::Flat
        }
    }
}
