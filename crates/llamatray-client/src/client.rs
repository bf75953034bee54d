//! reqwest-backed status client.

use std::time::Duration;

use async_trait::async_trait;
use llamatray_core::FetchError;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::payload::decode_models;
use crate::{StatusPayload, StatusSource, CATALOG_PATH, RUNNING_PATH};

/// Issues single-attempt GET requests against the daemon.
#[derive(Debug, Clone, Default)]
pub struct StatusClient {
    client: Client,
}

impl StatusClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Reuse an existing connection pool.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GET `base_url + path` and parse the body as JSON.
    ///
    /// An empty body is `Ok(None)`. No retries; the timeout covers the whole
    /// request including the body.
    pub async fn fetch_endpoint(
        &self,
        base_url: &str,
        path: &str,
        timeout: Duration,
    ) -> Result<Option<Value>, FetchError> {
        let url = endpoint_url(base_url, path);
        debug!("GET {} (timeout {:?})", url, timeout);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Process(format!("{} returned {}", url, status)));
        }

        let body = response.text().await.map_err(|e| classify(&url, e))?;
        let body = body.trim();
        if body.is_empty() {
            debug!("{} returned an empty body", url);
            return Ok(None);
        }

        serde_json::from_str(body)
            .map(Some)
            .map_err(|e| FetchError::Parse(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl StatusSource for StatusClient {
    async fn fetch_status(
        &self,
        base_url: &str,
        timeout: Duration,
    ) -> Result<StatusPayload, FetchError> {
        let running = self.fetch_endpoint(base_url, RUNNING_PATH, timeout).await?;
        let catalog = self.fetch_endpoint(base_url, CATALOG_PATH, timeout).await?;

        Ok(StatusPayload {
            running: decode_models(running.as_ref()),
            catalog: decode_models(catalog.as_ref()),
        })
    }
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim().trim_end_matches('/'), path)
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Network(format!("{}: timed out", url))
    } else if err.is_connect() {
        FetchError::Network(format!("{}: {}", url, err))
    } else {
        FetchError::Process(format!("{}: {}", url, err))
    }
}
