// src/lib.rs
// Public library surface for the daemon, the demo bin and integration tests.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod fetch;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod state;
pub mod stock_date;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::coordinator::{CycleState, FetchCoordinator, StartCause, Trigger};
pub use crate::fetch::{FetchRequest, FetchResult, HashPoint, ResultCode, Variant};
pub use crate::matcher::{KnownLocation, KnownLocationMatcher, MatchBatch, MatchRecord};
pub use crate::notify::{AlertSink, NotifierMux};
pub use crate::scheduler::AlarmScheduler;
pub use crate::stock_date::StockDateCalculator;
pub use crate::worker::{Event, Worker};
