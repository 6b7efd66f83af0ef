use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{Address, AddressSnapshot};

use super::AddressSource;

/// A mock address source for testing. Returns canned snapshots populated
/// via the builder pattern and records every call it receives.
///
/// Addresses without a canned snapshot answer with an empty (but valid)
/// history.
pub struct MockSource {
    snapshots: HashMap<Address, AddressSnapshot>,
    unavailable: HashSet<Address>,
    throttles: Mutex<HashMap<Address, u32>>,
    calls: Mutex<Vec<(Address, usize)>>,
}

impl MockSource {
    pub fn builder() -> MockSourceBuilder {
        MockSourceBuilder {
            snapshots: HashMap::new(),
            unavailable: HashSet::new(),
            throttles: HashMap::new(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Addresses in the order they were queried.
    pub fn queried(&self) -> Vec<Address> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }

    pub fn requested_limits(&self) -> Vec<usize> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(_, limit)| *limit)
            .collect()
    }
}

pub struct MockSourceBuilder {
    snapshots: HashMap<Address, AddressSnapshot>,
    unavailable: HashSet<Address>,
    throttles: HashMap<Address, u32>,
}

impl MockSourceBuilder {
    pub fn with_snapshot(mut self, snapshot: AddressSnapshot) -> Self {
        self.snapshots.insert(snapshot.address.clone(), snapshot);
        self
    }

    /// Every query for `address` fails with HTTP 500.
    pub fn with_unavailable(mut self, address: &str) -> Self {
        self.unavailable.insert(Address::from(address));
        self
    }

    /// The first `times` queries for `address` are throttled.
    pub fn with_throttles(mut self, address: &str, times: u32) -> Self {
        self.throttles.insert(Address::from(address), times);
        self
    }

    pub fn build(self) -> MockSource {
        MockSource {
            snapshots: self.snapshots,
            unavailable: self.unavailable,
            throttles: Mutex::new(self.throttles),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AddressSource for MockSource {
    async fn address_history(
        &self,
        address: &Address,
        limit: usize,
    ) -> Result<AddressSnapshot, SourceError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((address.clone(), limit));

        if let Some(remaining) = self
            .throttles
            .lock()
            .expect("throttles lock")
            .get_mut(address)
        {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Throttled);
            }
        }

        if self.unavailable.contains(address) {
            return Err(SourceError::Status {
                status: 500,
                body: "mock failure".into(),
            });
        }

        Ok(self
            .snapshots
            .get(address)
            .cloned()
            .unwrap_or_else(|| AddressSnapshot {
                address: address.clone(),
                ..Default::default()
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn unknown_address_is_empty_not_an_error() {
        let source = MockSource::builder().build();
        let snap = source.address_history(&addr("X"), 10).await.expect("empty history");
        assert!(snap.transactions.is_empty());
        assert_eq!(source.queried(), vec![addr("X")]);
    }

    #[tokio::test]
    async fn default_activity_lookup_uses_history_counters() {
        let mut snap = snapshot("A", vec![]);
        snap.tx_count = 7;
        let source = MockSource::builder().with_snapshot(snap).build();

        let activity = source
            .address_activity(&[addr("A"), addr("B")])
            .await
            .expect("activity");
        assert_eq!(activity[0].tx_count, Some(7));
        assert!(activity[0].is_active());
        assert_eq!(activity[1].tx_count, Some(0));
        assert!(!activity[1].is_active());
        assert_eq!(source.requested_limits(), vec![1, 1], "one-transaction page per address");
    }
}
