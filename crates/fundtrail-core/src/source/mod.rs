//! Address-history source abstraction.
//!
//! Defines the [`AddressSource`] trait, the blockchain.info-style HTTP
//! implementation ([`HttpAddressSource`]), the [`RateLimitedSource`]
//! wrapper that owns pacing and retry-on-throttle, and a test mock
//! (`mock::MockSource`).

mod http_adapter;
#[cfg(test)]
pub mod mock;
mod paced;

pub use http_adapter::HttpAddressSource;
pub use paced::{RateLimitedSource, SourceConfig};

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{Address, AddressActivity, AddressSnapshot};

/// History page size used when activity is derived from per-address
/// lookups.
const ACTIVITY_PAGE_SIZE: usize = 1;

/// Minimal trait covering the lookups fundtrail needs from a ledger
/// explorer.
///
/// A single call is a single attempt: implementations report throttling
/// as [`SourceError::Throttled`] and leave retrying to
/// [`RateLimitedSource`].
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Fetch up to `limit` of the most recent transactions of `address`,
    /// together with its summary counters.
    async fn address_history(
        &self,
        address: &Address,
        limit: usize,
    ) -> Result<AddressSnapshot, SourceError>;

    /// Fetch the transaction count of many addresses. Implementations may
    /// answer the whole slice with one request.
    ///
    /// The default falls back to one single-transaction history page per
    /// address and reads its summary counters.
    async fn address_activity(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<AddressActivity>, SourceError> {
        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            let snapshot = self.address_history(address, ACTIVITY_PAGE_SIZE).await?;
            results.push(AddressActivity {
                address: address.clone(),
                tx_count: Some(snapshot.tx_count),
            });
        }
        Ok(results)
    }
}
