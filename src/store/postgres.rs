//! Postgres listings source, connection pool and market_trends publisher

use super::{CandidateArea, ListingSource, TrendPublisher};
use crate::error::StoreError;
use crate::models::{Listing, ListingStatus, MarketTrendResult, PropertyType};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDate;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

const CONNECT_ATTEMPTS: usize = 5;

const LISTING_COLUMNS: &str = "id::BIGINT AS id, city, property_type::TEXT AS property_type, \
     price::FLOAT8 AS price, square_feet::INT4 AS square_feet, bedrooms::INT4 AS bedrooms, \
     bathrooms::FLOAT8 AS bathrooms, listing_date::DATE AS listing_date, status::TEXT AS status, \
     latitude::FLOAT8 AS latitude, longitude::FLOAT8 AS longitude";

struct PoolInner {
    url: String,
    idle: Mutex<Vec<Client>>,
    permits: Arc<Semaphore>,
}

/// Fixed-size pool of Postgres clients
///
/// Each acquire hands out a [`PooledClient`] that returns its client when
/// dropped. Closed clients are discarded and replaced on the next acquire.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PoolInner>,
}

impl PgPool {
    /// Open the pool, retrying the first connection with exponential backoff
    pub async fn connect(url: &str, size: usize) -> Result<Self, StoreError> {
        let first = (|| async { open_client(url).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_times(CONNECT_ATTEMPTS),
            )
            .notify(|err: &StoreError, dur: Duration| {
                warn!(error = %err, retry_in_ms = dur.as_millis() as u64, "PgPool: connection failed, retrying");
            })
            .await?;

        info!(size = size, "PgPool: connected");
        Ok(Self {
            inner: Arc::new(PoolInner {
                url: url.to_string(),
                idle: Mutex::new(vec![first]),
                permits: Arc::new(Semaphore::new(size.max(1))),
            }),
        })
    }

    pub async fn acquire(&self) -> Result<PooledClient, StoreError> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::PoolClosed)?;

        let reused = {
            let mut idle = self.inner.idle.lock().unwrap_or_else(|e| e.into_inner());
            let mut found = None;
            while let Some(client) = idle.pop() {
                if !client.is_closed() {
                    found = Some(client);
                    break;
                }
                debug!("PgPool: discarding closed client");
            }
            found
        };

        let client = match reused {
            Some(client) => client,
            None => open_client(&self.inner.url).await?,
        };

        Ok(PooledClient {
            client: Some(client),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Number of clients currently parked in the pool
    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

async fn open_client(url: &str) -> Result<Client, StoreError> {
    let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(error = %e, "Postgres connection error");
        }
    });
    Ok(client)
}

/// A client checked out of [`PgPool`] for the duration of one job
pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledClient {
    fn client(&self) -> Result<&Client, StoreError> {
        self.client.as_ref().ok_or(StoreError::PoolClosed)
    }

    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        Ok(self.client()?.query(sql, params).await?)
    }

    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, StoreError> {
        Ok(self.client()?.query_opt(sql, params).await?)
    }

    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, StoreError> {
        Ok(self.client()?.execute(sql, params).await?)
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_closed() || self.pool.permits.is_closed() {
                return;
            }
            self.pool
                .idle
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(client);
        }
    }
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, StoreError> {
    row.try_get(name)
        .map_err(|e| StoreError::RowShape(format!("column {}: {}", name, e)))
}

fn listing_from_row(row: &Row) -> Result<Listing, StoreError> {
    let property_type: String = column(row, "property_type")?;
    let status: String = column(row, "status")?;

    Ok(Listing {
        id: column(row, "id")?,
        city: column(row, "city")?,
        property_type: property_type
            .parse::<PropertyType>()
            .map_err(StoreError::RowShape)?,
        price: column(row, "price")?,
        square_feet: column(row, "square_feet")?,
        bedrooms: column(row, "bedrooms")?,
        bathrooms: column(row, "bathrooms")?,
        listing_date: column(row, "listing_date")?,
        status: status.parse::<ListingStatus>().map_err(StoreError::RowShape)?,
        latitude: column(row, "latitude")?,
        longitude: column(row, "longitude")?,
    })
}

/// Read-only queries against the `listings` table
pub struct PostgresListingSource {
    pool: PgPool,
}

impl PostgresListingSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListingSource for PostgresListingSource {
    async fn active_listings(
        &self,
        city: &str,
        property_type: PropertyType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Listing>, StoreError> {
        let client = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM listings
             WHERE city = $1 AND property_type::TEXT = $2 AND status::TEXT = 'active'
               AND listing_date::DATE BETWEEN $3 AND $4
             ORDER BY listing_date, id",
            LISTING_COLUMNS
        );
        let rows = client
            .query(&sql, &[&city, &property_type.as_str(), &from, &to])
            .await?;
        rows.iter().map(listing_from_row).collect()
    }

    async fn listing(&self, id: i64) -> Result<Option<Listing>, StoreError> {
        let client = self.pool.acquire().await?;
        let sql = format!("SELECT {} FROM listings WHERE id = $1::BIGINT", LISTING_COLUMNS);
        match client.query_opt(&sql, &[&id]).await? {
            Some(row) => Ok(Some(listing_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn comparable_candidates(
        &self,
        property_type: PropertyType,
        area: &CandidateArea,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<Listing>, StoreError> {
        let client = self.pool.acquire().await?;
        let base = format!(
            "SELECT {} FROM listings
             WHERE property_type::TEXT = $1 AND status::TEXT = 'active'
               AND listing_date::DATE BETWEEN $2 AND $3",
            LISTING_COLUMNS
        );
        let type_name = property_type.as_str();

        let rows = match area {
            CandidateArea::Around { city, bbox } => {
                let sql = format!(
                    "{} AND (
                       (latitude IS NOT NULL AND longitude IS NOT NULL
                        AND latitude::FLOAT8 BETWEEN $4 AND $5
                        AND (($6::FLOAT8 <= $7::FLOAT8 AND longitude::FLOAT8 BETWEEN $6 AND $7)
                             OR ($6::FLOAT8 > $7::FLOAT8
                                 AND (longitude::FLOAT8 >= $6 OR longitude::FLOAT8 <= $7))))
                       OR ((latitude IS NULL OR longitude IS NULL) AND city = $8))",
                    base
                );
                client
                    .query(
                        &sql,
                        &[
                            &type_name,
                            &since,
                            &until,
                            &bbox.min_lat,
                            &bbox.max_lat,
                            &bbox.min_lon,
                            &bbox.max_lon,
                            city,
                        ],
                    )
                    .await?
            }
            CandidateArea::City(city) => {
                let sql = format!("{} AND city = $4", base);
                client
                    .query(&sql, &[&type_name, &since, &until, city])
                    .await?
            }
        };

        debug!(
            property_type = %property_type,
            city = %area.city(),
            candidates = rows.len(),
            "PostgresListingSource: fetched comparable candidates"
        );
        rows.iter().map(listing_from_row).collect()
    }

    async fn active_listing_ids(&self, city: &str, limit: usize) -> Result<Vec<i64>, StoreError> {
        let client = self.pool.acquire().await?;
        let limit = limit as i64;
        let rows = client
            .query(
                "SELECT id::BIGINT AS id FROM listings
                 WHERE city = $1 AND status::TEXT = 'active'
                 ORDER BY listing_date DESC, id DESC
                 LIMIT $2",
                &[&city, &limit],
            )
            .await?;
        rows.iter().map(|row| column(row, "id")).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.acquire().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }
}

/// Upserts the latest trend of each dimension into `market_trends`
pub struct MarketTrendsTable {
    pool: PgPool,
    state: String,
}

impl MarketTrendsTable {
    pub fn new(pool: PgPool, state: impl Into<String>) -> Self {
        Self {
            pool,
            state: state.into(),
        }
    }
}

#[async_trait]
impl TrendPublisher for MarketTrendsTable {
    async fn publish(&self, trend: &MarketTrendResult) -> Result<(), StoreError> {
        let client = self.pool.acquire().await?;
        let count = trend.stats.count as i64;
        client
            .execute(
                "INSERT INTO market_trends (
                    city, state, property_type, period_start, period_end,
                    avg_price, median_price, total_listings, total_sales,
                    days_on_market_avg, price_per_sqft_avg, updated_at
                 ) VALUES (
                    $1, $2, $3, $4, $5, $6::FLOAT8, $7::FLOAT8, $8::BIGINT, $8::BIGINT,
                    $9::FLOAT8, $10::FLOAT8, CURRENT_TIMESTAMP
                 )
                 ON CONFLICT (city, state, property_type, period_start, period_end)
                 DO UPDATE SET
                    avg_price = EXCLUDED.avg_price,
                    median_price = EXCLUDED.median_price,
                    total_listings = EXCLUDED.total_listings,
                    total_sales = EXCLUDED.total_sales,
                    days_on_market_avg = EXCLUDED.days_on_market_avg,
                    price_per_sqft_avg = EXCLUDED.price_per_sqft_avg,
                    updated_at = CURRENT_TIMESTAMP",
                &[
                    &trend.city,
                    &self.state,
                    &trend.property_type.as_str(),
                    &trend.period_start,
                    &trend.period_end,
                    &trend.stats.avg_price,
                    &trend.stats.median_price,
                    &count,
                    &trend.stats.avg_days_on_market,
                    &trend.stats.avg_price_per_sqft,
                ],
            )
            .await?;

        debug!(
            city = %trend.city,
            property_type = %trend.property_type,
            "MarketTrendsTable: upserted trend row"
        );
        Ok(())
    }
}
