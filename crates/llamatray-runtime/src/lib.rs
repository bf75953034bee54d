//! Refresh engine: aggregates daemon status into view models on a timer.
//!
//! [`RefreshScheduler`] drives one fetch-aggregate-publish cycle at a time,
//! reacting to [`llamatray_core::ConfigStore`] changes between cycles.
//! [`render`] turns published updates into panel text.

pub mod aggregator;
pub mod render;
pub mod scheduler;
pub mod types;

pub use aggregator::aggregate;
pub use scheduler::{RefreshScheduler, StatusSink};
pub use types::*;
