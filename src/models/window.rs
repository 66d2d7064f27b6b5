use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_WINDOW_DAYS: u32 = 365;

/// Length of an analysis window in whole days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisWindow(u32);

impl AnalysisWindow {
    pub const fn days(days: u32) -> Self {
        Self(days)
    }

    pub fn as_days(&self) -> u32 {
        self.0
    }

    pub fn duration(&self) -> Duration {
        Duration::days(self.0 as i64)
    }

    /// First day of the window ending on `end`
    pub fn start_from(&self, end: NaiveDate) -> NaiveDate {
        end - self.duration()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.0 == 0 {
            return Err("window must span at least one day".to_string());
        }
        if self.0 > MAX_WINDOW_DAYS {
            return Err(format!("window must not exceed {} days", MAX_WINDOW_DAYS));
        }
        Ok(())
    }
}

impl fmt::Display for AnalysisWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.0)
    }
}
