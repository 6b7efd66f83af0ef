use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::types::{Address, AddressActivity, AddressSnapshot};

use super::AddressSource;

/// Settings shared by the HTTP adapter and the pacing wrapper.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the explorer API, e.g. `https://blockchain.info`.
    pub base_url: String,
    /// Hard cap on transactions requested per call.
    pub page_size: usize,
    /// Retries after a throttled attempt. `3` means at most four attempts.
    pub max_retries: u32,
    /// Wait before retrying a throttled call.
    pub retry_delay: Duration,
    /// Mandatory pause after every completed call.
    pub pacing: Duration,
    /// Optional ceiling on outbound requests per second.
    pub requests_per_second: Option<u32>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://blockchain.info".to_owned(),
            page_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_secs(10),
            pacing: Duration::from_secs(10),
            requests_per_second: None,
        }
    }
}

/// Serializes every call to an inner [`AddressSource`], pauses after each
/// one, and retries throttled calls a bounded number of times.
///
/// There is one gate per wrapper: share the wrapper (by reference or
/// `Arc`) rather than building several around the same service, or the
/// pacing guarantee no longer holds.
pub struct RateLimitedSource<S> {
    inner: S,
    page_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    pacing: Duration,
    // Held for the duration of a call plus its pacing pause.
    gate: Mutex<()>,
}

impl<S: AddressSource> RateLimitedSource<S> {
    pub fn new(inner: S, config: &SourceConfig) -> Self {
        Self {
            inner,
            page_size: config.page_size.max(1),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            pacing: config.pacing,
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Run `call` until it succeeds, fails with something other than
    /// throttling, or the retry budget is spent.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, SourceError>> + Send,
        T: Send,
    {
        let mut retries: u32 = 0;
        loop {
            let result = {
                let _gate = self.gate.lock().await;
                let result = call().await;
                debug!(source.call = what, pacing_ms = self.pacing.as_millis() as u64, "pacing");
                tokio::time::sleep(self.pacing).await;
                result
            };

            match result {
                Err(err) if err.is_throttled() => {
                    if retries >= self.max_retries {
                        warn!(
                            source.call = what,
                            attempts = retries + 1,
                            "still throttled; giving up"
                        );
                        return Err(SourceError::RetriesExhausted {
                            attempts: retries + 1,
                        });
                    }
                    retries += 1;
                    warn!(
                        source.call = what,
                        retry = retries,
                        max_retries = self.max_retries,
                        delay_secs = self.retry_delay.as_secs_f64(),
                        "throttled; retrying"
                    );
                    // The pacing pause already elapsed counts toward the retry delay.
                    tokio::time::sleep(self.retry_delay.saturating_sub(self.pacing)).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: AddressSource> AddressSource for RateLimitedSource<S> {
    async fn address_history(
        &self,
        address: &Address,
        limit: usize,
    ) -> Result<AddressSnapshot, SourceError> {
        let limit = limit.min(self.page_size);
        self.with_retry("address_history", || {
            self.inner.address_history(address, limit)
        })
        .await
    }

    async fn address_activity(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<AddressActivity>, SourceError> {
        self.with_retry("address_activity", || self.inner.address_activity(addresses))
            .await
    }
}
