//! Unit tests for the in-process stores

use chrono::Duration as ChronoDuration;
use estate_analytics::analytics::geo::BoundingBox;
use estate_analytics::error::StoreError;
use estate_analytics::models::{ListingStatus, PropertyType};
use estate_analytics::store::{
    CandidateArea, ListingSource, MemoryListingSource, MemoryResultStore, ResultStore,
};
use std::time::Duration;

use crate::test_utils::{at, date, residential, trend_entry};

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

#[tokio::test]
async fn upsert_keeps_the_newest_entry() {
    let store = MemoryResultStore::new();
    let key = "trend:austin:residential:30d";

    assert!(store.upsert(trend_entry(key, at(2024, 6, 30, 2), WEEK)).await.unwrap());
    assert!(!store.upsert(trend_entry(key, at(2024, 6, 30, 1), WEEK)).await.unwrap());
    assert_eq!(
        store.get(key).await.unwrap().map(|e| e.calculated_at),
        Some(at(2024, 6, 30, 2))
    );

    assert!(store.upsert(trend_entry(key, at(2024, 6, 30, 5), WEEK)).await.unwrap());
    assert_eq!(
        store.get(key).await.unwrap().map(|e| e.calculated_at),
        Some(at(2024, 6, 30, 5))
    );
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn purge_expired_removes_only_expired_entries() {
    let store = MemoryResultStore::new();
    let now = at(2024, 6, 30, 2);
    store
        .upsert(trend_entry("old", now - ChronoDuration::days(8), WEEK))
        .await
        .unwrap();
    store
        .upsert(trend_entry("recent", now - ChronoDuration::days(1), WEEK))
        .await
        .unwrap();

    assert_eq!(store.purge_expired(now).await.unwrap(), 1);
    assert!(store.get("old").await.unwrap().is_none());
    assert!(store.get("recent").await.unwrap().is_some());

    assert!(store.purge("recent").await.unwrap());
    assert!(!store.purge("recent").await.unwrap());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn unavailable_store_fails_every_call() {
    let store = MemoryResultStore::new();
    store.set_unavailable(true);
    assert!(matches!(store.get("k").await, Err(StoreError::Unavailable(_))));
    assert!(store.ping().await.is_err());

    store.set_unavailable(false);
    assert!(store.ping().await.is_ok());
}

#[tokio::test]
async fn listing_source_filters_and_counts_queries() {
    let source = MemoryListingSource::new(vec![
        residential(1, 400_000.0, date(2024, 6, 1)),
        residential(2, 410_000.0, date(2024, 6, 20)),
        residential(3, 420_000.0, date(2024, 6, 10)).with_status(ListingStatus::Pending),
        residential(4, 430_000.0, date(2024, 4, 1)),
    ]);

    let active = source
        .active_listings("Austin", PropertyType::Residential, date(2024, 5, 1), date(2024, 6, 30))
        .await
        .unwrap();
    let mut ids: Vec<i64> = active.iter().map(|l| l.id).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    // newest first, limited
    assert_eq!(source.active_listing_ids("Austin", 2).await.unwrap(), vec![2, 1]);
    // pending listings are still returned by id
    assert!(source.listing(3).await.unwrap().is_some());
    assert_eq!(source.query_count(), 3);

    source.set_unavailable(true);
    assert!(source.listing(1).await.is_err());
    assert_eq!(source.query_count(), 4);
}

#[test]
fn candidate_area_admits_by_box_or_city() {
    let center = (30.2672, -97.7431);
    let area = CandidateArea::Around {
        city: "Austin".to_string(),
        bbox: BoundingBox::around(center, 5.0),
    };

    let inside = residential(1, 1.0, date(2024, 6, 1)).with_coordinates(30.27, -97.74);
    let outside = residential(2, 1.0, date(2024, 6, 1)).with_coordinates(29.76, -95.37);
    let no_coords = residential(3, 1.0, date(2024, 6, 1));

    assert!(area.admits(&inside));
    assert!(!area.admits(&outside));
    assert!(area.admits(&no_coords));
    assert_eq!(area.city(), "Austin");

    let by_city = CandidateArea::City("Dallas".to_string());
    assert!(!by_city.admits(&no_coords));
}
