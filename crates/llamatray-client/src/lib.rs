//! Status client for the local model daemon.
//!
//! Fetches running models (`/api/ps`) and the installed catalog
//! (`/api/tags`), decoding both leniently into [`ModelRecord`]s.

pub mod client;
pub mod mock;
pub mod payload;

use std::time::Duration;

use async_trait::async_trait;
use llamatray_core::{FetchError, ModelRecord};

pub use client::StatusClient;
pub use mock::MockStatusSource;

pub const RUNNING_PATH: &str = "/api/ps";
pub const CATALOG_PATH: &str = "/api/tags";

/// Both collections from one successful fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPayload {
    pub running: Vec<ModelRecord>,
    pub catalog: Vec<ModelRecord>,
}

/// Anything that can produce a [`StatusPayload`] for a base URL.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch running models, then the catalog. Fails as a whole if either
    /// request fails.
    async fn fetch_status(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> Result<StatusPayload, FetchError>;
}
