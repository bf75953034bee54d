//! llamatray core: model records, size parsing, configuration, errors.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::{ConfigChange, ConfigStore, DisplaySettings, TrayConfig};
pub use error::{Error, FetchError, FetchErrorKind, Result};
pub use types::{ModelRecord, SizeField, SizeValue};
