//! In-process listing source and result store

use super::{CandidateArea, ListingSource, ResultStore};
use crate::error::StoreError;
use crate::models::{CacheEntry, Listing, PropertyType};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Listing source over a fixed set of listings
///
/// Counts every query so callers can assert that short-circuited jobs never
/// touched the source, and can be switched into a failing mode.
#[derive(Default)]
pub struct MemoryListingSource {
    listings: RwLock<Vec<Listing>>,
    queries: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryListingSource {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self {
            listings: RwLock::new(listings),
            queries: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    pub async fn insert(&self, listing: Listing) {
        let mut listings = self.listings.write().await;
        listings.retain(|l| l.id != listing.id);
        listings.push(listing);
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// While unavailable every query fails with a transient error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn begin_query(&self) -> Result<(), StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("listing source offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ListingSource for MemoryListingSource {
    async fn active_listings(
        &self,
        city: &str,
        property_type: PropertyType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Listing>, StoreError> {
        self.begin_query()?;
        let listings = self.listings.read().await;
        Ok(listings
            .iter()
            .filter(|l| {
                l.is_active()
                    && l.city == city
                    && l.property_type == property_type
                    && l.listing_date >= from
                    && l.listing_date <= to
            })
            .cloned()
            .collect())
    }

    async fn listing(&self, id: i64) -> Result<Option<Listing>, StoreError> {
        self.begin_query()?;
        let listings = self.listings.read().await;
        Ok(listings.iter().find(|l| l.id == id).cloned())
    }

    async fn comparable_candidates(
        &self,
        property_type: PropertyType,
        area: &CandidateArea,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<Listing>, StoreError> {
        self.begin_query()?;
        let listings = self.listings.read().await;
        Ok(listings
            .iter()
            .filter(|l| {
                l.is_active()
                    && l.property_type == property_type
                    && l.listing_date >= since
                    && l.listing_date <= until
                    && area.admits(l)
            })
            .cloned()
            .collect())
    }

    async fn active_listing_ids(&self, city: &str, limit: usize) -> Result<Vec<i64>, StoreError> {
        self.begin_query()?;
        let listings = self.listings.read().await;
        let mut active: Vec<&Listing> = listings
            .iter()
            .filter(|l| l.is_active() && l.city == city)
            .collect();
        active.sort_by(|a, b| b.listing_date.cmp(&a.listing_date).then(b.id.cmp(&a.id)));
        Ok(active.into_iter().take(limit).map(|l| l.id).collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("listing source offline".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryResultStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    unavailable: AtomicBool,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("result store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        self.check()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<bool, StoreError> {
        self.check()?;
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(&entry.key) {
            if current.calculated_at > entry.calculated_at {
                return Ok(false);
            }
        }
        entries.insert(entry.key.clone(), entry);
        Ok(true)
    }

    async fn purge(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check()?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
