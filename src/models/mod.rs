//! Shared data models spanning the engine layers.

pub mod listing;
pub mod report;
pub mod result;
pub mod trend;
pub mod window;

pub use listing::{Listing, ListingStatus, PropertyType};
pub use report::{Comparable, Confidence, PricePosition, PropertyReport, ReportAnalysis};
pub use result::{AnalysisResult, CacheEntry};
pub use trend::{MarketStats, MarketTrendResult, TrendDirection, WeeklyTrend};
pub use window::AnalysisWindow;
