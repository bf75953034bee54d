//! Scripted [`StatusSource`] for exercising the refresh engine without a
//! daemon.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use llamatray_core::FetchError;
use parking_lot::Mutex;

use crate::{StatusPayload, StatusSource};

/// Replays queued responses, then repeats a fallback.
pub struct MockStatusSource {
    script: Mutex<VecDeque<Result<StatusPayload, FetchError>>>,
    fallback: Mutex<Result<StatusPayload, FetchError>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockStatusSource {
    /// Every fetch returns `payload`.
    pub fn new(payload: StatusPayload) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(payload)),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch fails with `err`.
    pub fn failing(err: FetchError) -> Self {
        let source = Self::new(StatusPayload::default());
        *source.fallback.lock() = Err(err);
        source
    }

    /// Queue a one-shot response ahead of the fallback.
    pub fn push(&self, result: Result<StatusPayload, FetchError>) {
        self.script.lock().push_back(result);
    }

    pub fn set_fallback(&self, result: Result<StatusPayload, FetchError>) {
        *self.fallback.lock() = result;
    }

    /// Make each fetch take `delay` (honours tokio's paused clock).
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Base URLs seen, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl StatusSource for MockStatusSource {
    async fn fetch_status(
        &self,
        base_url: &str,
        _timeout: Duration,
    ) -> Result<StatusPayload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(base_url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
