use std::collections::HashMap;

use bitcoin::Amount;
use serde::Deserialize;

use crate::error::SourceError;
use crate::types::{Address, AddressActivity, AddressSnapshot, Transaction, TxInput, TxOutput};

// ==============================================================================
// Wire Schema
// ==============================================================================
//
// Every field the explorer may omit has an explicit default here, so the
// classifier and aggregator only ever see fully-populated domain types.
// Amounts arrive as integer minor units; `null` or negative values decode
// as zero, which the downstream filters already skip.

#[derive(Deserialize)]
struct RawAddressResponse {
    #[serde(default)]
    txs: Vec<RawTx>,
    #[serde(default)]
    final_balance: Option<i64>,
    #[serde(default)]
    total_received: Option<i64>,
    #[serde(default)]
    total_sent: Option<i64>,
    #[serde(default)]
    n_tx: Option<u64>,
}

#[derive(Deserialize)]
struct RawTx {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    inputs: Vec<RawInput>,
    #[serde(default)]
    out: Vec<RawOutput>,
    #[serde(default)]
    fee: Option<i64>,
}

#[derive(Deserialize)]
struct RawInput {
    #[serde(default)]
    prev_out: Option<RawOutput>,
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    addr: Option<String>,
    #[serde(default)]
    value: Option<i64>,
}

#[derive(Deserialize)]
struct RawMultiAddressResponse {
    #[serde(default)]
    addresses: Vec<RawAddressCount>,
}

#[derive(Deserialize)]
struct RawAddressCount {
    address: String,
    #[serde(default)]
    n_tx: Option<u64>,
}

// ==============================================================================
// Conversion
// ==============================================================================

fn amount(value: Option<i64>) -> Amount {
    Amount::from_sat(value.unwrap_or(0).max(0) as u64)
}

fn address(value: Option<String>) -> Option<Address> {
    value.filter(|s| !s.is_empty()).map(Address::from)
}

/// Decode a `rawaddr` response body for `requested`.
///
/// Transactions without a hash cannot be referenced by any edge and are
/// dropped. A transaction moving more than the money supply makes the whole
/// body invalid.
pub(super) fn parse_address_history(
    requested: &Address,
    body: &str,
) -> Result<AddressSnapshot, SourceError> {
    if body.trim().is_empty() {
        return Err(SourceError::InvalidResponse("empty response body".into()));
    }
    let raw: RawAddressResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("decode address history: {e}")))?;

    let transactions = raw
        .txs
        .into_iter()
        .filter_map(|tx| {
            let hash = tx.hash.filter(|h| !h.is_empty())?;
            Some(Transaction {
                hash,
                time: tx.time.unwrap_or(0),
                inputs: tx
                    .inputs
                    .into_iter()
                    .map(|input| match input.prev_out {
                        Some(prev) => TxInput {
                            address: address(prev.addr),
                            value: amount(prev.value),
                        },
                        None => TxInput {
                            address: None,
                            value: Amount::ZERO,
                        },
                    })
                    .collect(),
                outputs: tx
                    .out
                    .into_iter()
                    .map(|out| TxOutput {
                        address: address(out.addr),
                        value: amount(out.value),
                    })
                    .collect(),
                fee: tx.fee.map(|fee| amount(Some(fee))),
            })
        })
        .collect();

    let snapshot = AddressSnapshot {
        address: requested.clone(),
        transactions,
        final_balance: amount(raw.final_balance),
        total_received: amount(raw.total_received),
        total_sent: amount(raw.total_sent),
        tx_count: raw.n_tx.unwrap_or(0),
    };
    snapshot.check_amounts()?;
    Ok(snapshot)
}

/// Decode a `multiaddr` response body, answering in the order of
/// `requested`. Addresses the service left out get `tx_count: None`.
pub(super) fn parse_address_activity(
    requested: &[Address],
    body: &str,
) -> Result<Vec<AddressActivity>, SourceError> {
    let raw: RawMultiAddressResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::InvalidResponse(format!("decode address activity: {e}")))?;

    let counts: HashMap<String, u64> = raw
        .addresses
        .into_iter()
        .map(|entry| (entry.address, entry.n_tx.unwrap_or(0)))
        .collect();

    Ok(requested
        .iter()
        .map(|address| AddressActivity {
            address: address.clone(),
            tx_count: counts.get(address.as_str()).copied(),
        })
        .collect())
}
