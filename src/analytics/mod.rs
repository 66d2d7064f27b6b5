//! Pure market computations. Nothing in here performs I/O.

pub mod comparables;
pub mod geo;
pub mod stats;
pub mod trend;

pub use comparables::ComparableEngine;
pub use trend::{TrendEngine, TrendRequest};
