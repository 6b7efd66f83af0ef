//! Shared test helpers for `fundtrail-core` unit tests.
//!
//! Builder functions for addresses, transactions and snapshots so that the
//! classifier, tracer and aggregator tests share a single source of truth
//! for dummy ledger data.

use bitcoin::Amount;

use crate::types::{Address, AddressSnapshot, Transaction, TxInput, TxOutput};

pub fn addr(s: &str) -> Address {
    Address::from(s)
}

pub fn sats(n: u64) -> Amount {
    Amount::from_sat(n)
}

/// Build a transaction from `(address, sats)` pairs. An empty address
/// string stands for an address-less input or output.
pub fn tx(hash: &str, inputs: &[(&str, u64)], outputs: &[(&str, u64)]) -> Transaction {
    let to_addr = |s: &str| (!s.is_empty()).then(|| Address::from(s));
    Transaction {
        hash: hash.to_owned(),
        time: 1_700_000_000,
        inputs: inputs
            .iter()
            .map(|(a, v)| TxInput {
                address: to_addr(a),
                value: sats(*v),
            })
            .collect(),
        outputs: outputs
            .iter()
            .map(|(a, v)| TxOutput {
                address: to_addr(a),
                value: sats(*v),
            })
            .collect(),
        fee: None,
    }
}

/// A single-input payment from `from` to each `(to, sats)` pair.
pub fn payment(hash: &str, from: &str, outputs: &[(&str, u64)]) -> Transaction {
    let total: u64 = outputs.iter().map(|(_, v)| v).sum();
    tx(hash, &[(from, total)], outputs)
}

pub fn snapshot(address: &str, transactions: Vec<Transaction>) -> AddressSnapshot {
    AddressSnapshot {
        address: addr(address),
        tx_count: transactions.len() as u64,
        transactions,
        ..Default::default()
    }
}

/// Three inputs from `from` and three outputs to `to`, each worth 9e18 sats:
/// well-formed JSON, but far beyond any real transaction.
pub fn oversized_tx(hash: &str, from: &str, to: &str) -> Transaction {
    const HUGE: u64 = 9_000_000_000_000_000_000;
    tx(
        hash,
        &[(from, HUGE), (from, HUGE), (from, HUGE)],
        &[(to, HUGE), (to, HUGE), (to, HUGE)],
    )
}
