//! Domain types for fundtrail's flow model.
//!
//! Contains the decoded address history (`AddressSnapshot`, `Transaction`,
//! `TxInput`, `TxOutput`), the derived `FlowEdge`, the tracer and
//! accumulator results, and the tunable limits both analyses run under.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{Amount, SignedAmount};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// Minor units (satoshis) per major unit (BTC).
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Convert a minor-unit amount into major units.
///
/// Always derived from the integer amount, so repeated conversions of the
/// same value never drift.
#[must_use]
pub fn to_major(amount: Amount) -> f64 {
    amount.to_sat() as f64 / SATS_PER_BTC as f64
}

/// `a + b`, stopping at [`Amount::MAX`] instead of overflowing.
#[must_use]
pub(crate) fn saturating_add(a: Amount, b: Amount) -> Amount {
    a.checked_add(b).unwrap_or(Amount::MAX)
}

#[must_use]
pub(crate) fn saturating_sum(amounts: impl IntoIterator<Item = Amount>) -> Amount {
    amounts.into_iter().fold(Amount::ZERO, saturating_add)
}

/// Sum `amounts`, or `None` once the total passes [`Amount::MAX_MONEY`].
fn supply_bounded_sum(amounts: impl IntoIterator<Item = Amount>) -> Option<Amount> {
    amounts
        .into_iter()
        .try_fold(Amount::ZERO, |acc, value| acc.checked_add(value))
        .filter(|total| *total <= Amount::MAX_MONEY)
}

// ==============================================================================
// Address
// ==============================================================================

/// A ledger address. Treated as an opaque key: only equality and (for
/// deterministic tie-breaks) lexicographic order are meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines: first and last `keep` characters.
    pub fn abbreviated(&self, keep: usize) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= keep * 2 {
            return self.0.clone();
        }
        let head: String = chars[..keep].iter().collect();
        let tail: String = chars[chars.len() - keep..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ==============================================================================
// Address History
// ==============================================================================

/// The recent history of one address as returned by the remote service.
///
/// Created per query and consumed by the classifier or the aggregator.
/// An empty `transactions` list is a valid answer ("nothing happened"),
/// distinct from the source being unavailable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub address: Address,
    pub transactions: Vec<Transaction>,
    pub final_balance: Amount,
    pub total_received: Amount,
    pub total_sent: Amount,
    pub tx_count: u64,
}

impl AddressSnapshot {
    /// Reject the snapshot if any transaction's inputs, outputs or fee add
    /// up to more than the money supply. Per-transaction sums over a
    /// checked snapshot cannot overflow.
    pub fn check_amounts(&self) -> Result<(), SourceError> {
        for tx in &self.transactions {
            let inputs = supply_bounded_sum(tx.inputs.iter().map(|input| input.value));
            let outputs = supply_bounded_sum(tx.outputs.iter().map(|output| output.value));
            let fee = tx.fee.unwrap_or(Amount::ZERO);
            if inputs.is_none() || outputs.is_none() || fee > Amount::MAX_MONEY {
                return Err(SourceError::InvalidResponse(format!(
                    "transaction {} moves more than the money supply",
                    tx.hash
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    /// Unix timestamp in seconds.
    pub time: i64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: Option<Amount>,
}

impl Transaction {
    /// `true` if any input is funded by `address`.
    pub fn is_spent_by(&self, address: &Address) -> bool {
        self.inputs
            .iter()
            .any(|input| input.address.as_ref() == Some(address))
    }

    /// Sum of the input values funded by `address`.
    pub fn spent_by(&self, address: &Address) -> Amount {
        self.inputs
            .iter()
            .filter(|input| input.address.as_ref() == Some(address))
            .fold(Amount::ZERO, |acc, input| saturating_add(acc, input.value))
    }

    /// Sum of the output values paid to `address`.
    pub fn received_by(&self, address: &Address) -> Amount {
        self.outputs
            .iter()
            .filter(|output| output.address.as_ref() == Some(address))
            .fold(Amount::ZERO, |acc, output| saturating_add(acc, output.value))
    }
}

/// A transaction input. `address` is `None` for coinbase inputs and for
/// scripts the service could not map to an address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInput {
    pub address: Option<Address>,
    pub value: Amount,
}

/// A transaction output. `address` is `None` for OP_RETURN and other
/// non-standard outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Option<Address>,
    pub value: Amount,
}

/// Transaction count of one address from a batch lookup. `None` when the
/// lookup for its batch failed or the service omitted the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressActivity {
    pub address: Address,
    pub tx_count: Option<u64>,
}

impl AddressActivity {
    pub fn is_active(&self) -> bool {
        self.tx_count.is_some_and(|n| n > 0)
    }
}

// ==============================================================================
// Flow Edges
// ==============================================================================

/// One genuine outgoing transfer: `value` moved from `from_address` to
/// `to_address` in transaction `tx_hash`.
///
/// `from_address` and `to_address` always differ; self-transfers (change)
/// are filtered before an edge is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub tx_hash: String,
    pub timestamp: i64,
    pub from_address: Address,
    pub to_address: Address,
    pub value: Amount,
    /// Total fee of the transaction, repeated on every edge it produced.
    pub fee: Amount,
}

impl FlowEdge {
    pub(crate) fn new(
        tx: &Transaction,
        from_address: &Address,
        to_address: &Address,
        value: Amount,
    ) -> Self {
        debug_assert_ne!(from_address, to_address, "flow edge must not be a self-transfer");
        Self {
            tx_hash: tx.hash.clone(),
            timestamp: tx.time,
            from_address: from_address.clone(),
            to_address: to_address.clone(),
            value,
            fee: tx.fee.unwrap_or(Amount::ZERO),
        }
    }

    pub fn value_major(&self) -> f64 {
        to_major(self.value)
    }

    pub fn fee_major(&self) -> f64 {
        to_major(self.fee)
    }
}

// ==============================================================================
// Tracer Results
// ==============================================================================

/// Limits for the recursive tracer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceLimits {
    /// Number of levels queried, counting the seed as level one.
    pub max_depth: usize,
    /// Destinations followed from each expanded address.
    pub fan_out: usize,
    /// Transactions requested per address.
    pub page_size: usize,
}

impl Default for TraceLimits {
    fn default() -> Self {
        Self {
            max_depth: 2,
            fan_out: 3,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStats {
    pub addresses_queried: usize,
    pub unavailable: usize,
    pub cycle_skips: usize,
    pub max_depth_reached: usize,
}

/// Edges found by a trace, in traversal (pre-)order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTrace {
    pub seed: Address,
    pub edges: Vec<FlowEdge>,
    pub stats: TraceStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub unique_addresses: usize,
    pub total_value: Amount,
    pub total_fees: Amount,
    pub edge_count: usize,
}

impl FlowTrace {
    /// Aggregate figures over every edge. Fees are summed per edge, so a
    /// transaction with several outputs counts its fee several times.
    /// Totals saturate at [`Amount::MAX`].
    pub fn summary(&self) -> TraceSummary {
        let mut addresses: BTreeSet<&Address> = BTreeSet::new();
        let mut total_value = Amount::ZERO;
        let mut total_fees = Amount::ZERO;
        for edge in &self.edges {
            addresses.insert(&edge.from_address);
            addresses.insert(&edge.to_address);
            total_value = saturating_add(total_value, edge.value);
            total_fees = saturating_add(total_fees, edge.fee);
        }
        TraceSummary {
            unique_addresses: addresses.len(),
            total_value,
            total_fees,
            edge_count: self.edges.len(),
        }
    }
}

// ==============================================================================
// Accumulator Model
// ==============================================================================

/// Heuristic attribution settings for the accumulator model.
///
/// These approximate where value went; they are not exact UTXO accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionConfig {
    /// When one output carries at least this share of what the address
    /// spent, the whole spend is attributed to it and the remaining outputs
    /// are treated as change or dust.
    pub dominance_threshold: f64,
    /// Transactions requested per address.
    pub page_size: usize,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            dominance_threshold: 0.9,
            page_size: 100,
        }
    }
}

/// Two hops around the accumulator wallet of a seed address:
/// `seed -> accumulator <- other sources` and `accumulator -> destinations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowGraphModel {
    pub seed: Address,
    pub accumulator: Address,
    pub seed_to_accumulator: Amount,
    pub other_sources: BTreeMap<Address, Amount>,
    pub destinations: BTreeMap<Address, Amount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowKind {
    InitialToAccumulator,
    SourceToAccumulator,
    AccumulatorToDestination,
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitialToAccumulator => write!(f, "INITIAL_TO_ACCUMULATOR"),
            Self::SourceToAccumulator => write!(f, "SOURCE_TO_ACCUMULATOR"),
            Self::AccumulatorToDestination => write!(f, "ACCUMULATOR_TO_DESTINATION"),
        }
    }
}

/// One row of the accumulator model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorFlow {
    pub from_address: Address,
    pub to_address: Address,
    pub amount: Amount,
    pub kind: FlowKind,
}

impl FlowGraphModel {
    pub fn total_from_others(&self) -> Amount {
        saturating_sum(self.other_sources.values().copied())
    }

    /// Everything the accumulator received: the seed's share plus all
    /// other sources.
    pub fn total_accumulated(&self) -> Amount {
        saturating_add(self.seed_to_accumulator, self.total_from_others())
    }

    pub fn total_redistributed(&self) -> Amount {
        saturating_sum(self.destinations.values().copied())
    }

    /// Accumulated minus redistributed: fees, retained balance, or
    /// history beyond the page limit. Negative when the page window saw
    /// more spending than funding.
    pub fn retained(&self) -> SignedAmount {
        let accumulated = i64::try_from(self.total_accumulated().to_sat()).unwrap_or(i64::MAX);
        let redistributed = i64::try_from(self.total_redistributed().to_sat()).unwrap_or(i64::MAX);
        SignedAmount::from_sat(accumulated.saturating_sub(redistributed))
    }

    /// Other sources sorted by amount, largest first, ties by address.
    pub fn ranked_sources(&self) -> Vec<(&Address, Amount)> {
        rank(&self.other_sources)
    }

    /// Destinations sorted by amount, largest first, ties by address.
    pub fn ranked_destinations(&self) -> Vec<(&Address, Amount)> {
        rank(&self.destinations)
    }

    /// Flatten the model into rows: the seed hop first, then other
    /// sources, then destinations (each group in address order).
    pub fn flows(&self) -> Vec<AccumulatorFlow> {
        let mut rows = Vec::with_capacity(1 + self.other_sources.len() + self.destinations.len());
        rows.push(AccumulatorFlow {
            from_address: self.seed.clone(),
            to_address: self.accumulator.clone(),
            amount: self.seed_to_accumulator,
            kind: FlowKind::InitialToAccumulator,
        });
        rows.extend(self.other_sources.iter().map(|(source, amount)| AccumulatorFlow {
            from_address: source.clone(),
            to_address: self.accumulator.clone(),
            amount: *amount,
            kind: FlowKind::SourceToAccumulator,
        }));
        rows.extend(self.destinations.iter().map(|(dest, amount)| AccumulatorFlow {
            from_address: self.accumulator.clone(),
            to_address: dest.clone(),
            amount: *amount,
            kind: FlowKind::AccumulatorToDestination,
        }));
        rows
    }
}

fn rank(amounts: &BTreeMap<Address, Amount>) -> Vec<(&Address, Amount)> {
    let mut ranked: Vec<(&Address, Amount)> = amounts.iter().map(|(a, v)| (a, *v)).collect();
    ranked.sort_by(|(a_addr, a_val), (b_addr, b_val)| b_val.cmp(a_val).then(a_addr.cmp(b_addr)));
    ranked
}
