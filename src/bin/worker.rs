//! Analytics Worker
//!
//! Schedules and processes market trend and valuation jobs from the Redis
//! lanes, and serves `/health` and `/metrics`.

use dotenvy::dotenv;
use estate_analytics::config::{self, EngineConfig};
use estate_analytics::core::clock::{Clock, SystemClock};
use estate_analytics::core::http::{self, AppState};
use estate_analytics::core::runtime::AnalyticsRuntime;
use estate_analytics::core::scheduler::JobScheduler;
use estate_analytics::jobs::context::JobContext;
use estate_analytics::jobs::handlers::HandlerRegistry;
use estate_analytics::logging;
use estate_analytics::metrics::Metrics;
use estate_analytics::queue::{JobQueue, RedisQueue};
use estate_analytics::store::{
    ListingSource, MarketTrendsTable, PgPool, PostgresListingSource, RedisResultStore,
    ResultStore,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// State column written to `market_trends`
const MARKET_STATE: &str = "TX";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env if present
    dotenv().ok();

    logging::init_logging();

    let env = config::get_environment();
    info!("Starting Analytics Worker");
    info!(environment = %env, "Environment");

    let engine_config = Arc::new(EngineConfig::from_env()?);
    info!(
        cities = ?engine_config.market.cities,
        property_types = ?engine_config.market.property_types,
        trend_window = %engine_config.market.trend_window,
        concurrency = ?engine_config.queue.concurrency,
        "Configuration loaded"
    );

    let metrics = Arc::new(Metrics::new()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    info!("Initializing Postgres connection pool...");
    let pool = match PgPool::connect(&config::get_database_url(), engine_config.db_pool_size).await {
        Ok(pool) => {
            metrics.database_connected.set(1.0);
            pool
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to Postgres");
            warn!("Worker requires the listings database - exiting");
            return Err(format!("Postgres connection required for worker: {}", e).into());
        }
    };

    info!("Initializing Redis connections...");
    let redis_url = config::get_redis_url();
    let results: Arc<dyn ResultStore> =
        match RedisResultStore::connect(&redis_url, engine_config.cache.key_prefix.clone()).await {
            Ok(store) => {
                metrics.cache_connected.set(1.0);
                Arc::new(store)
            }
            Err(e) => {
                warn!(error = %e, "Failed to connect to Redis");
                warn!("Worker requires Redis - exiting");
                return Err(format!("Redis connection required for worker: {}", e).into());
            }
        };
    let queue: Arc<dyn JobQueue> = Arc::new(
        RedisQueue::connect(&redis_url, engine_config.queue.namespace.clone(), clock.clone())
            .await
            .map_err(|e| format!("Failed to open Redis queue: {}", e))?,
    );

    let listings: Arc<dyn ListingSource> = Arc::new(PostgresListingSource::new(pool.clone()));
    let job_context = Arc::new(
        JobContext::new(listings.clone(), results.clone(), clock, engine_config.clone())
            .with_trends_table(Arc::new(MarketTrendsTable::new(pool.clone(), MARKET_STATE)))
            .with_metrics(metrics.clone()),
    );

    info!("Starting workers...");
    let runtime = AnalyticsRuntime::new(queue.clone(), HandlerRegistry::standard(), job_context.clone());
    let worker_handles = runtime.start_workers();

    info!("Starting job scheduler...");
    let scheduler = JobScheduler::new(queue, job_context);
    scheduler.start().await;

    let state = AppState::new(metrics, listings, results);
    let metrics_port = engine_config.metrics_port;
    let server = tokio::spawn(async move {
        if let Err(e) = http::start_server(state, metrics_port).await {
            error!(error = %e, "HTTP server stopped");
        }
    });

    // Graceful shutdown
    info!("Worker started, waiting for shutdown signal...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down worker...");
            scheduler.stop().await;
            for handle in worker_handles {
                handle.abort();
            }
            server.abort();
            pool.close();
            info!("Worker stopped");
        }
    }

    Ok(())
}
