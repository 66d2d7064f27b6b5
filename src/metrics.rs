//! Prometheus metrics for the analytics worker

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

const PREFIX: &str = "analytics";

pub struct Metrics {
    registry: Registry,

    pub tasks_processed_total: IntCounterVec,
    pub task_duration_seconds: HistogramVec,
    pub active_tasks: IntGauge,
    pub listings_processed_total: IntCounter,
    pub market_trends_calculated_total: IntCounter,

    pub jobs_enqueued_total: IntCounterVec,
    pub jobs_retried_total: IntCounterVec,
    pub jobs_dead_lettered_total: IntCounterVec,
    pub jobs_short_circuited_total: IntCounterVec,
    pub scheduler_ticks_skipped_total: IntCounter,

    pub database_connected: Gauge,
    pub cache_connected: Gauge,

    pub http_requests_total: IntCounter,
    pub http_requests_in_flight: IntGauge,
    pub http_request_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tasks_processed_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_tasks_processed_total"), "Total tasks processed"),
            &["task_type", "status"],
        )?;
        let task_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}_task_duration_seconds"),
                "Task execution duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["task_type"],
        )?;
        let active_tasks = IntGauge::new(
            format!("{PREFIX}_active_tasks"),
            "Number of currently executing tasks",
        )?;
        let listings_processed_total = IntCounter::new(
            format!("{PREFIX}_listings_processed_total"),
            "Total listings valued",
        )?;
        let market_trends_calculated_total = IntCounter::new(
            format!("{PREFIX}_market_trends_calculated_total"),
            "Total market trends calculated",
        )?;

        let jobs_enqueued_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_jobs_enqueued_total"), "Jobs accepted by a lane"),
            &["lane"],
        )?;
        let jobs_retried_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_jobs_retried_total"), "Jobs returned to a lane for retry"),
            &["lane"],
        )?;
        let jobs_dead_lettered_total = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}_jobs_dead_lettered_total"),
                "Jobs moved to the dead-letter lane",
            ),
            &["lane"],
        )?;
        let jobs_short_circuited_total = IntCounterVec::new(
            Opts::new(
                format!("{PREFIX}_jobs_short_circuited_total"),
                "Jobs skipped because a fresh result existed",
            ),
            &["lane"],
        )?;
        let scheduler_ticks_skipped_total = IntCounter::new(
            format!("{PREFIX}_scheduler_ticks_skipped_total"),
            "Scheduler ticks abandoned after a backend failure",
        )?;

        let database_connected = Gauge::new(
            format!("{PREFIX}_database_connected"),
            "Listings database connection status (1 = connected)",
        )?;
        let cache_connected = Gauge::new(
            format!("{PREFIX}_cache_connected"),
            "Redis connection status (1 = connected)",
        )?;

        let http_requests_total = IntCounter::new(
            format!("{PREFIX}_http_requests_total"),
            "Total HTTP requests served by the worker",
        )?;
        let http_requests_in_flight = IntGauge::new(
            format!("{PREFIX}_http_requests_in_flight"),
            "HTTP requests currently being served",
        )?;
        let http_request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                format!("{PREFIX}_http_request_duration_seconds"),
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        registry.register(Box::new(tasks_processed_total.clone()))?;
        registry.register(Box::new(task_duration_seconds.clone()))?;
        registry.register(Box::new(active_tasks.clone()))?;
        registry.register(Box::new(listings_processed_total.clone()))?;
        registry.register(Box::new(market_trends_calculated_total.clone()))?;
        registry.register(Box::new(jobs_enqueued_total.clone()))?;
        registry.register(Box::new(jobs_retried_total.clone()))?;
        registry.register(Box::new(jobs_dead_lettered_total.clone()))?;
        registry.register(Box::new(jobs_short_circuited_total.clone()))?;
        registry.register(Box::new(scheduler_ticks_skipped_total.clone()))?;
        registry.register(Box::new(database_connected.clone()))?;
        registry.register(Box::new(cache_connected.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            tasks_processed_total,
            task_duration_seconds,
            active_tasks,
            listings_processed_total,
            market_trends_calculated_total,
            jobs_enqueued_total,
            jobs_retried_total,
            jobs_dead_lettered_total,
            jobs_short_circuited_total,
            scheduler_ticks_skipped_total,
            database_connected,
            cache_connected,
            http_requests_total,
            http_requests_in_flight,
            http_request_duration_seconds,
        })
    }

    pub fn record_task(&self, task_type: &str, status: &str, seconds: f64) {
        self.tasks_processed_total
            .with_label_values(&[task_type, status])
            .inc();
        self.task_duration_seconds
            .with_label_values(&[task_type])
            .observe(seconds);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
