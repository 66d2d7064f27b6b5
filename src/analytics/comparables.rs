//! Comparable selection and market valuation (CMA)

use super::geo;
use super::stats;
use crate::config::ComparableConfig;
use crate::models::{
    Comparable, Confidence, Listing, PricePosition, PropertyReport, PropertyType, ReportAnalysis,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Normalized distance term used when either location is unknown
const UNKNOWN_DISTANCE_PENALTY: f64 = 0.5;

/// Bounds on the price ratio applied to the days-on-market estimate
const DOM_RATIO_MIN: f64 = 0.5;
const DOM_RATIO_MAX: f64 = 2.0;

pub struct ComparableEngine {
    config: ComparableConfig,
}

impl ComparableEngine {
    pub fn new(config: ComparableConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ComparableConfig {
        &self.config
    }

    /// Earliest listing date a candidate may have
    pub fn lookback_start(&self, as_of: NaiveDate) -> NaiveDate {
        as_of - Duration::days(self.config.lookback_days as i64)
    }

    /// Build the full report for `target` from a candidate pool.
    ///
    /// The pool may be a superset; ineligible candidates are dropped here.
    pub fn build_report(
        &self,
        target: &Listing,
        candidates: &[Listing],
        as_of: NaiveDate,
        generated_at: DateTime<Utc>,
    ) -> PropertyReport {
        let comparables = self.select(target, candidates, as_of);

        let prices: Vec<f64> = comparables.iter().map(|c| c.listing.price).collect();
        let avg_comparable_price = if prices.is_empty() {
            None
        } else {
            Some(stats::mean(&prices))
        };

        let price_position = match avg_comparable_price {
            Some(avg) => self.classify_position(target.price, avg),
            None => PricePosition::InsufficientData,
        };

        let estimated_days_on_market = match avg_comparable_price {
            Some(avg) => {
                let days: Vec<f64> = comparables
                    .iter()
                    .map(|c| c.listing.days_on_market(as_of) as f64)
                    .collect();
                Self::adjusted_days_on_market(stats::mean(&days), target.price, avg)
            }
            None => Self::fallback_days_on_market(target),
        };

        PropertyReport {
            listing_id: target.id,
            listing: target.clone(),
            analysis: ReportAnalysis {
                comparable_count: comparables.len(),
                avg_comparable_price,
                price_position,
                price_per_sqft: target.price_per_sqft(),
                estimated_days_on_market,
                confidence: self.confidence(comparables.len()),
            },
            comparables,
            generated_at,
        }
    }

    /// Rank eligible candidates by similarity and keep the top K
    pub fn select(&self, target: &Listing, candidates: &[Listing], as_of: NaiveDate) -> Vec<Comparable> {
        let mut ranked: Vec<Comparable> = candidates
            .iter()
            .filter_map(|candidate| {
                let distance_km = self.eligibility(target, candidate, as_of)?;
                Some(Comparable {
                    similarity: self.similarity(target, candidate, distance_km),
                    listing: candidate.clone(),
                    distance_km,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.listing.id.cmp(&b.listing.id))
        });
        ranked.truncate(self.config.max_comparables);
        ranked
    }

    /// `None` when the candidate is not eligible, otherwise its distance to
    /// the target when both locations are known
    fn eligibility(&self, target: &Listing, candidate: &Listing, as_of: NaiveDate) -> Option<Option<f64>> {
        if candidate.id == target.id
            || !candidate.is_active()
            || !candidate.price.is_finite()
            || candidate.price <= 0.0
            || candidate.property_type != target.property_type
            || candidate.listing_date < self.lookback_start(as_of)
            || candidate.listing_date > as_of
        {
            return None;
        }

        match (target.coordinates(), candidate.coordinates()) {
            (Some(from), Some(to)) => {
                let distance = geo::haversine_km(from, to);
                (distance <= self.config.radius_km).then_some(Some(distance))
            }
            _ => (candidate.city == target.city).then_some(None),
        }
    }

    /// Similarity in (0, 1]; 1 for an identical property at the same location
    pub fn similarity(&self, target: &Listing, candidate: &Listing, distance_km: Option<f64>) -> f64 {
        let w = &self.config.weights;

        let value_diff = match (target.price_per_sqft(), candidate.price_per_sqft()) {
            (Some(t), Some(c)) => stats::safe_div((c - t).abs(), t),
            _ => stats::safe_div((candidate.price - target.price).abs(), target.price),
        };

        let bedroom_diff = match (target.bedrooms, candidate.bedrooms) {
            (Some(t), Some(c)) => (c - t).abs() as f64 / t.max(1) as f64,
            _ => 0.0,
        };

        let bathroom_diff = match (target.bathrooms, candidate.bathrooms) {
            (Some(t), Some(c)) => (c - t).abs() / t.max(1.0),
            _ => 0.0,
        };

        let distance_term = match distance_km {
            Some(d) => stats::safe_div(d, self.config.radius_km).min(1.0),
            None => UNKNOWN_DISTANCE_PENALTY,
        };

        let weighted = w.price_per_sqft * value_diff
            + w.bedrooms * bedroom_diff
            + w.bathrooms * bathroom_diff
            + w.distance * distance_term;

        1.0 / (1.0 + weighted.max(0.0))
    }

    /// Position of `price` relative to the comparable average
    pub fn classify_position(&self, price: f64, avg_comparable_price: f64) -> PricePosition {
        if avg_comparable_price <= 0.0 {
            return PricePosition::InsufficientData;
        }
        let ratio = price / avg_comparable_price;
        if ratio > 1.0 + self.config.upper_threshold {
            PricePosition::AboveMarket
        } else if ratio < 1.0 - self.config.lower_threshold {
            PricePosition::BelowMarket
        } else {
            PricePosition::MarketRate
        }
    }

    pub fn confidence(&self, comparable_count: usize) -> Confidence {
        if comparable_count < self.config.min_comparables {
            Confidence::Low
        } else if comparable_count >= self.config.max_comparables {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }

    /// Comparable average days on market scaled by how far the price sits
    /// from the comparable average
    pub fn adjusted_days_on_market(avg_days: f64, price: f64, avg_comparable_price: f64) -> u32 {
        let ratio = stats::safe_div(price, avg_comparable_price);
        let ratio = if ratio > 0.0 {
            ratio.clamp(DOM_RATIO_MIN, DOM_RATIO_MAX)
        } else {
            1.0
        };
        (avg_days * ratio).round().max(0.0) as u32
    }

    /// Estimate without comparables, from property type and price band
    pub fn fallback_days_on_market(listing: &Listing) -> u32 {
        let base: f64 = match listing.property_type {
            PropertyType::Residential => 45.0,
            PropertyType::Commercial => 90.0,
            PropertyType::Industrial => 120.0,
            PropertyType::Land => 180.0,
        };

        let multiplier = if listing.price > 1_000_000.0 {
            1.5
        } else if listing.price > 500_000.0 {
            1.2
        } else {
            1.0
        };

        (base * multiplier) as u32
    }
}
