//! Storage seams: the read-only listings source and the result store

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{MemoryListingSource, MemoryResultStore};
pub use postgres::{MarketTrendsTable, PgPool, PostgresListingSource};
pub use self::redis::RedisResultStore;

use crate::analytics::geo::BoundingBox;
use crate::error::StoreError;
use crate::models::{CacheEntry, Listing, MarketTrendResult, PropertyType};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Spatial restriction applied when fetching comparable candidates
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateArea {
    /// Listings whose coordinates fall inside the box, or that share the
    /// city when they have no coordinates
    Around { city: String, bbox: BoundingBox },
    /// All listings of the city
    City(String),
}

impl CandidateArea {
    pub fn city(&self) -> &str {
        match self {
            CandidateArea::Around { city, .. } | CandidateArea::City(city) => city,
        }
    }

    pub fn admits(&self, listing: &Listing) -> bool {
        match self {
            CandidateArea::Around { city, bbox } => match listing.coordinates() {
                Some(point) => bbox.contains(point),
                None => &listing.city == city,
            },
            CandidateArea::City(city) => &listing.city == city,
        }
    }
}

/// Read-only access to property listings
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Active listings of one market dimension listed within `[from, to]`
    async fn active_listings(
        &self,
        city: &str,
        property_type: PropertyType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Listing>, StoreError>;

    /// Any listing by id, whatever its status
    async fn listing(&self, id: i64) -> Result<Option<Listing>, StoreError>;

    /// Active listings of `property_type` listed within `[since, until]` in
    /// `area`; may return a superset of the final comparable pool
    async fn comparable_candidates(
        &self,
        property_type: PropertyType,
        area: &CandidateArea,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<Listing>, StoreError>;

    /// Ids of active listings of the city, newest first
    async fn active_listing_ids(&self, city: &str, limit: usize) -> Result<Vec<i64>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Keyed analysis results read by the API and the metrics exporter
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Store `entry` unless a newer one is already present.
    ///
    /// Returns whether the entry was written.
    async fn upsert(&self, entry: CacheEntry) -> Result<bool, StoreError>;

    /// Remove one entry; returns whether it existed
    async fn purge(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove entries past their retention; returns how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Downstream table mirroring the latest trend of each market dimension
#[async_trait]
pub trait TrendPublisher: Send + Sync {
    async fn publish(&self, trend: &MarketTrendResult) -> Result<(), StoreError>;
}
