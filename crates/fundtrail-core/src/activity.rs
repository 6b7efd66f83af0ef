use tracing::{info, warn};

use crate::source::AddressSource;
use crate::types::{Address, AddressActivity};

/// Addresses per `multiaddr` request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Look up the transaction count of every address, `batch_size` at a time.
///
/// A failed batch does not stop the scan: its addresses come back with
/// `tx_count: None`. Results keep the order of `addresses`.
pub async fn scan_activity(
    source: &dyn AddressSource,
    addresses: &[Address],
    batch_size: usize,
) -> Vec<AddressActivity> {
    let mut results = Vec::with_capacity(addresses.len());
    let mut active = 0usize;

    for batch in addresses.chunks(batch_size.max(1)) {
        match source.address_activity(batch).await {
            Ok(activity) => {
                for entry in activity.iter().filter(|a| a.is_active()) {
                    info!(address = %entry.address, n_tx = entry.tx_count, "active address");
                }
                active += activity.iter().filter(|a| a.is_active()).count();
                results.extend(activity);
            }
            Err(err) => {
                warn!(batch = batch.len(), error = %err, "activity batch failed");
                results.extend(batch.iter().map(|address| AddressActivity {
                    address: address.clone(),
                    tx_count: None,
                }));
            }
        }
        info!(
            processed = results.len(),
            total = addresses.len(),
            active,
            "activity scan progress"
        );
    }

    results
}
