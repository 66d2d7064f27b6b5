//! Core application primitives (clock, scheduler, worker pool, HTTP)

pub mod clock;
pub mod http;
pub mod runtime;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use http::*;
pub use runtime::*;
pub use scheduler::*;
