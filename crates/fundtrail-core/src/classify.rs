//! Spend classification: which entries of an address's history are genuine
//! outgoing transfers.

use std::collections::BTreeSet;

use bitcoin::Amount;

use crate::types::{Address, AddressSnapshot, FlowEdge};

/// Outgoing transfers of one address, in history order.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub destinations: BTreeSet<Address>,
    pub edges: Vec<FlowEdge>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Extract the outgoing flow edges of `target` from `snapshot`.
///
/// A transaction counts only when one of its inputs is funded by `target`;
/// purely inbound transactions yield nothing. From a spending transaction,
/// every output produces an edge except outputs with no address, outputs
/// back to `target` (change) and zero-value outputs. Each edge carries the
/// whole transaction fee.
#[must_use]
pub fn classify(snapshot: &AddressSnapshot, target: &Address) -> Classification {
    let mut result = Classification::default();

    for tx in &snapshot.transactions {
        if !tx.is_spent_by(target) {
            continue;
        }

        for output in &tx.outputs {
            let Some(destination) = &output.address else {
                continue;
            };
            if destination == target || output.value == Amount::ZERO {
                continue;
            }
            result.destinations.insert(destination.clone());
            result
                .edges
                .push(FlowEdge::new(tx, target, destination, output.value));
        }
    }

    result
}
