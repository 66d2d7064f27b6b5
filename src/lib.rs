//! Real-estate market analytics engine
//!
//! A scheduled, queue-driven pipeline that computes rolling market trends per
//! (city, property type) and comparable-market valuations per listing.

pub mod analytics;
pub mod config;
pub mod core;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod store;
