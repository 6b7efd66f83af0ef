//! Single-hop accumulator model.
//!
//! Instead of following individual outputs, this model attributes what an
//! address *spent* to the addresses it paid, and what an address *received*
//! to the addresses that funded it. Both directions are heuristics over a
//! page of recent history, not UTXO accounting:
//!
//! - outgoing: if one output carries at least the dominance threshold of the
//!   spend, it takes the whole spend (the rest is change or dust); otherwise
//!   the spend is split in proportion to the output values;
//! - incoming: the received amount is split equally between the distinct
//!   funding addresses, whatever they contributed.
//!
//! Splits are done in whole minor units and round down.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::Amount;
use tracing::{debug, info};

use crate::error::CoreError;
use crate::source::AddressSource;
use crate::types::{
    saturating_add, saturating_sum, to_major, Address, AddressSnapshot, AttributionConfig,
    FlowGraphModel, TxOutput,
};

/// How many ranked sources and destinations are logged.
const LOG_TOP: usize = 10;

// ==============================================================================
// Attribution Over One Snapshot
// ==============================================================================

/// Attribute what `address` spent in `snapshot` to its destinations.
#[must_use]
pub fn outgoing_from_snapshot(
    snapshot: &AddressSnapshot,
    address: &Address,
    config: &AttributionConfig,
) -> BTreeMap<Address, Amount> {
    let mut outgoing: BTreeMap<Address, Amount> = BTreeMap::new();

    for tx in &snapshot.transactions {
        let spending = tx.spent_by(address);
        if spending == Amount::ZERO {
            continue;
        }

        let candidates: Vec<(&Address, Amount)> = tx
            .outputs
            .iter()
            .filter_map(|TxOutput { address: dest, value }| match dest {
                Some(dest) if dest != address && *value > Amount::ZERO => Some((dest, *value)),
                _ => None,
            })
            .collect();
        let Some((main_dest, main_value)) = largest(&candidates) else {
            debug!(tx = %tx.hash, %address, "spend went entirely to change");
            continue;
        };

        if main_value.to_sat() as f64 >= spending.to_sat() as f64 * config.dominance_threshold {
            debug!(
                tx = %tx.hash,
                to = %main_dest,
                amount_btc = to_major(spending),
                "dominant output takes the whole spend"
            );
            credit(&mut outgoing, main_dest, spending);
            continue;
        }

        let candidate_total: u128 = candidates.iter().map(|(_, v)| v.to_sat() as u128).sum();
        for (dest, value) in &candidates {
            let share = spending.to_sat() as u128 * value.to_sat() as u128 / candidate_total;
            let share = Amount::from_sat(share as u64);
            debug!(
                tx = %tx.hash,
                to = %dest,
                amount_btc = to_major(share),
                "proportional share of spend"
            );
            credit(&mut outgoing, dest, share);
        }
    }

    outgoing
}

/// Attribute what `address` received in `snapshot` to the addresses that
/// funded it, split equally per transaction.
#[must_use]
pub fn incoming_from_snapshot(
    snapshot: &AddressSnapshot,
    address: &Address,
) -> BTreeMap<Address, Amount> {
    let mut incoming: BTreeMap<Address, Amount> = BTreeMap::new();

    for tx in &snapshot.transactions {
        let received = tx.received_by(address);
        if received == Amount::ZERO {
            continue;
        }

        let sources: BTreeSet<&Address> = tx
            .inputs
            .iter()
            .filter_map(|input| input.address.as_ref())
            .filter(|source| *source != address)
            .collect();
        if sources.is_empty() {
            continue;
        }

        let per_source = Amount::from_sat(received.to_sat() / sources.len() as u64);
        for source in sources {
            credit(&mut incoming, source, per_source);
        }
    }

    incoming
}

/// The destination with the largest amount; equal amounts go to the
/// smaller address.
#[must_use]
pub fn select_accumulator(outgoing: &BTreeMap<Address, Amount>) -> Option<(Address, Amount)> {
    // BTreeMap iterates in address order, so keeping the first maximum
    // settles ties by address.
    outgoing
        .iter()
        .fold(None, |best: Option<(&Address, Amount)>, (address, amount)| match best {
            Some((_, best_amount)) if best_amount >= *amount => best,
            _ => Some((address, *amount)),
        })
        .map(|(address, amount)| (address.clone(), amount))
}

fn credit(totals: &mut BTreeMap<Address, Amount>, address: &Address, amount: Amount) {
    let total = totals.entry(address.clone()).or_insert(Amount::ZERO);
    *total = saturating_add(*total, amount);
}

fn largest<'a>(candidates: &[(&'a Address, Amount)]) -> Option<(&'a Address, Amount)> {
    candidates.iter().copied().fold(None, |best, (dest, value)| match best {
        Some((best_dest, best_value))
            if best_value > value || (best_value == value && best_dest <= dest) =>
        {
            best
        }
        _ => Some((dest, value)),
    })
}

// ==============================================================================
// Queries
// ==============================================================================

async fn fetch(
    source: &dyn AddressSource,
    address: &Address,
    config: &AttributionConfig,
) -> Result<AddressSnapshot, CoreError> {
    source
        .address_history(address, config.page_size)
        .await
        .and_then(|snapshot| snapshot.check_amounts().map(|()| snapshot))
        .map_err(|err| CoreError::unavailable(address, err))
}

/// Query `address` and attribute its spends to destinations.
pub async fn aggregate_outgoing(
    source: &dyn AddressSource,
    address: &Address,
    config: &AttributionConfig,
) -> Result<BTreeMap<Address, Amount>, CoreError> {
    let snapshot = fetch(source, address, config).await?;
    Ok(outgoing_from_snapshot(&snapshot, address, config))
}

/// Query `address` and attribute what it received to its funders.
pub async fn aggregate_incoming(
    source: &dyn AddressSource,
    address: &Address,
    config: &AttributionConfig,
) -> Result<BTreeMap<Address, Amount>, CoreError> {
    let snapshot = fetch(source, address, config).await?;
    Ok(incoming_from_snapshot(&snapshot, address))
}

/// Name the accumulator wallet of `seed` and describe the two hops around
/// it.
///
/// The accumulator is the destination that received the most from `seed`.
/// Its other funders (everyone but `seed`) and its own destinations are
/// then attributed from a single query of the accumulator. Any failed query
/// aborts the analysis, and a seed with no outgoing flow is an error.
pub async fn analyze_accumulator(
    source: &dyn AddressSource,
    seed: &Address,
    config: &AttributionConfig,
) -> Result<FlowGraphModel, CoreError> {
    info!(%seed, "level 0: analyzing seed outputs");
    let from_seed = aggregate_outgoing(source, seed, config).await?;
    info!(
        %seed,
        destinations = from_seed.len(),
        total_btc = to_major(saturating_sum(from_seed.values().copied())),
        "seed spending attributed"
    );

    let (accumulator, seed_to_accumulator) =
        select_accumulator(&from_seed).ok_or_else(|| CoreError::NoOutgoingFlow(seed.clone()))?;
    info!(
        %accumulator,
        amount_btc = to_major(seed_to_accumulator),
        "accumulator identified"
    );

    info!(%accumulator, "levels 1-2: analyzing accumulator");
    let acc_snapshot = fetch(source, &accumulator, config).await?;

    let mut other_sources = incoming_from_snapshot(&acc_snapshot, &accumulator);
    other_sources.remove(seed);
    let destinations = outgoing_from_snapshot(&acc_snapshot, &accumulator, config);

    let model = FlowGraphModel {
        seed: seed.clone(),
        accumulator,
        seed_to_accumulator,
        other_sources,
        destinations,
    };
    log_model(&model);
    Ok(model)
}

fn log_model(model: &FlowGraphModel) {
    let accumulated = model.total_accumulated();
    let share = |amount: Amount| {
        if accumulated == Amount::ZERO {
            0.0
        } else {
            amount.to_sat() as f64 / accumulated.to_sat() as f64 * 100.0
        }
    };

    info!(
        seed_btc = to_major(model.seed_to_accumulator),
        seed_pct = share(model.seed_to_accumulator),
        other_sources = model.other_sources.len(),
        others_btc = to_major(model.total_from_others()),
        others_pct = share(model.total_from_others()),
        accumulated_btc = to_major(accumulated),
        "accumulator funding"
    );
    for (rank, (source, amount)) in model.ranked_sources().into_iter().take(LOG_TOP).enumerate() {
        info!(
            rank = rank + 1,
            source = %source.abbreviated(10),
            amount_btc = to_major(amount),
            pct = share(amount),
            "top source"
        );
    }

    let redistributed = model.total_redistributed();
    info!(
        destinations = model.destinations.len(),
        redistributed_btc = to_major(redistributed),
        retained_btc = model.retained().to_btc(),
        "accumulator spending"
    );
    for (rank, (dest, amount)) in model
        .ranked_destinations()
        .into_iter()
        .take(LOG_TOP)
        .enumerate()
    {
        let pct = if redistributed == Amount::ZERO {
            0.0
        } else {
            amount.to_sat() as f64 / redistributed.to_sat() as f64 * 100.0
        };
        info!(
            rank = rank + 1,
            destination = %dest.abbreviated(10),
            amount_btc = to_major(amount),
            pct,
            "top destination"
        );
    }
}

// ==============================================================================
// Tests
// ==============================================================================
