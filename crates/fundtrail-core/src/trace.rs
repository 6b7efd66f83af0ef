use std::collections::BTreeMap;

use bitcoin::Amount;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::source::AddressSource;
use crate::types::{
    saturating_add, to_major, Address, FlowEdge, FlowTrace, TraceLimits, TraceStats,
};

// ==============================================================================
// Flow Tracer
// ==============================================================================

/// Follow outgoing value from `seed`, depth-first, up to `limits.max_depth`
/// levels (the seed is level one).
///
/// At every expanded address the outgoing edges are grouped by destination
/// and only the `limits.fan_out` destinations that received the most value
/// are followed (ties go to the smaller address). An address already on the
/// current branch is not queried again, but sibling branches may each visit
/// the same address. An unavailable address ends its own branch only.
///
/// Edges come back in pre-order: an address's own edges, then each followed
/// child's edges in ranking order. Lookups are awaited one at a time.
pub async fn trace_flows(
    source: &dyn AddressSource,
    seed: &Address,
    limits: &TraceLimits,
) -> FlowTrace {
    let mut branch: Vec<Address> = Vec::with_capacity(limits.max_depth);
    let mut stats = TraceStats::default();

    let edges = expand(source, seed.clone(), 0, limits, &mut branch, &mut stats).await;

    info!(
        seed = %seed,
        edges = edges.len(),
        queried = stats.addresses_queried,
        unavailable = stats.unavailable,
        cycle_skips = stats.cycle_skips,
        "trace finished"
    );

    FlowTrace {
        seed: seed.clone(),
        edges,
        stats,
    }
}

/// Expand one address and return the edges of its whole subtree.
///
/// `branch` holds the addresses between the seed and this call; it is
/// pushed before descending and popped on the way back, so each branch sees
/// exactly its own ancestors.
fn expand<'a>(
    source: &'a dyn AddressSource,
    address: Address,
    depth: usize,
    limits: &'a TraceLimits,
    branch: &'a mut Vec<Address>,
    stats: &'a mut TraceStats,
) -> BoxFuture<'a, Vec<FlowEdge>> {
    async move {
        if branch.contains(&address) {
            debug!(%address, depth, "address already on this branch; skipping");
            stats.cycle_skips += 1;
            return Vec::new();
        }
        if depth >= limits.max_depth {
            return Vec::new();
        }

        info!(level = depth + 1, %address, "tracing address");
        stats.addresses_queried += 1;
        stats.max_depth_reached = stats.max_depth_reached.max(depth);

        let fetched = source
            .address_history(&address, limits.page_size)
            .await
            .and_then(|snapshot| snapshot.check_amounts().map(|()| snapshot));
        let snapshot = match fetched {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%address, error = %err, "address unavailable; ending branch");
                stats.unavailable += 1;
                return Vec::new();
            }
        };

        info!(
            %address,
            balance_btc = to_major(snapshot.final_balance),
            received_btc = to_major(snapshot.total_received),
            sent_btc = to_major(snapshot.total_sent),
            n_tx = snapshot.tx_count,
            "address summary"
        );

        let classification = classify(&snapshot, &address);
        if classification.is_empty() {
            info!(%address, "no outgoing transfers");
            return Vec::new();
        }
        info!(
            %address,
            edges = classification.edges.len(),
            destinations = classification.destinations.len(),
            "outgoing transfers found"
        );
        for edge in classification.edges.iter().take(3) {
            debug!(
                tx = %edge.tx_hash,
                to = %edge.to_address.abbreviated(15),
                value_btc = edge.value_major(),
                "outgoing transfer"
            );
        }

        let mut edges = classification.edges;
        if depth + 1 < limits.max_depth {
            let next = rank_destinations(&edges, limits.fan_out);
            branch.push(address);
            for (destination, total) in next {
                info!(
                    to = %destination,
                    volume_btc = to_major(total),
                    "following destination"
                );
                let child = expand(source, destination, depth + 1, limits, branch, stats).await;
                edges.extend(child);
            }
            branch.pop();
        }
        edges
    }
    .boxed()
}

/// Sum edge values per destination and keep the `fan_out` largest, largest
/// first. Equal totals are ordered by address.
fn rank_destinations(edges: &[FlowEdge], fan_out: usize) -> Vec<(Address, Amount)> {
    let mut totals: BTreeMap<&Address, Amount> = BTreeMap::new();
    for edge in edges {
        let total = totals.entry(&edge.to_address).or_insert(Amount::ZERO);
        *total = saturating_add(*total, edge.value);
    }

    let mut ranked: Vec<(Address, Amount)> = totals
        .into_iter()
        .map(|(address, total)| (address.clone(), total))
        .collect();
    ranked.sort_by(|(a_addr, a_total), (b_addr, b_total)| {
        b_total.cmp(a_total).then_with(|| a_addr.cmp(b_addr))
    });
    ranked.truncate(fan_out);
    ranked
}

// ==============================================================================
// Tests
// ==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;
    use crate::test_util::*;

    fn limits(max_depth: usize) -> TraceLimits {
        TraceLimits {
            max_depth,
            ..Default::default()
        }
    }

    fn queried(source: &MockSource) -> Vec<String> {
        source
            .queried()
            .iter()
            .map(|a| a.as_str().to_owned())
            .collect()
    }

    #[tokio::test]
    async fn follows_top_three_with_address_tie_break() {
        let source = MockSource::builder()
            .with_snapshot(snapshot(
                "A",
                vec![payment(
                    "t1",
                    "A",
                    &[("B", 500), ("E", 300), ("D", 300), ("C", 300), ("F", 100)],
                )],
            ))
            .build();

        let trace = trace_flows(&source, &addr("A"), &limits(2)).await;

        assert_eq!(queried(&source), vec!["A", "B", "C", "D"]);
        assert_eq!(trace.edges.len(), 5, "all of A's edges are kept, not just followed ones");
        assert_eq!(trace.stats.addresses_queried, 4);
        assert_eq!(trace.stats.max_depth_reached, 1);
    }

    #[tokio::test]
    async fn ranks_by_summed_value_per_destination() {
        let source = MockSource::builder()
            .with_snapshot(snapshot(
                "A",
                vec![
                    payment("t1", "A", &[("B", 100)]),
                    payment("t2", "A", &[("C", 150)]),
                    payment("t3", "A", &[("B", 100)]),
                ],
            ))
            .build();

        let trace_limits = TraceLimits {
            max_depth: 2,
            fan_out: 1,
            ..Default::default()
        };
        trace_flows(&source, &addr("A"), &trace_limits).await;

        assert_eq!(queried(&source), vec!["A", "B"], "B totals 200 and beats C's 150");
    }

    #[tokio::test]
    async fn query_count_bounded_by_fan_out_and_depth() {
        // Every address pays five fresh addresses, so the tree is as wide as
        // the fan-out allows.
        let mut builder = MockSource::builder();
        let mut frontier = vec!["R".to_owned()];
        for _level in 0..3 {
            let mut next = Vec::new();
            for parent in &frontier {
                let children: Vec<String> = (0..5).map(|i| format!("{parent}{i}")).collect();
                let outputs: Vec<(&str, u64)> = children
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.as_str(), 1_000 - i as u64))
                    .collect();
                builder = builder.with_snapshot(snapshot(parent, vec![payment(parent, parent, &outputs)]));
                next.extend(children);
            }
            frontier = next;
        }
        let source = builder.build();

        let trace = trace_flows(&source, &addr("R"), &limits(3)).await;

        let bound: usize = (0..3).map(|i| 3usize.pow(i)).sum();
        assert_eq!(source.call_count(), bound);
        assert_eq!(trace.stats.addresses_queried, bound);
        assert_eq!(trace.stats.max_depth_reached, 2);
    }

    #[tokio::test]
    async fn two_address_cycle_terminates() {
        let source = MockSource::builder()
            .with_snapshot(snapshot("A", vec![payment("ab", "A", &[("B", 700)])]))
            .with_snapshot(snapshot("B", vec![payment("ba", "B", &[("A", 600)])]))
            .build();

        let trace = trace_flows(&source, &addr("A"), &limits(5)).await;

        assert_eq!(queried(&source), vec!["A", "B"], "A is not queried twice on one branch");
        assert_eq!(trace.stats.cycle_skips, 1);
        let hashes: Vec<&str> = trace.edges.iter().map(|e| e.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["ab", "ba"]);
    }

    #[tokio::test]
    async fn sibling_branches_may_share_an_address() {
        let source = MockSource::builder()
            .with_snapshot(snapshot("A", vec![payment("a", "A", &[("B", 500), ("C", 400)])]))
            .with_snapshot(snapshot("B", vec![payment("b", "B", &[("D", 450)])]))
            .with_snapshot(snapshot("C", vec![payment("c", "C", &[("D", 350)])]))
            .build();

        let trace = trace_flows(&source, &addr("A"), &limits(3)).await;

        assert_eq!(queried(&source), vec!["A", "B", "D", "C", "D"]);
        assert_eq!(trace.stats.cycle_skips, 0);
    }

    #[tokio::test]
    async fn unavailable_address_ends_only_its_branch() {
        let source = MockSource::builder()
            .with_snapshot(snapshot("A", vec![payment("a", "A", &[("B", 500), ("C", 400)])]))
            .with_unavailable("B")
            .with_snapshot(snapshot("C", vec![payment("c", "C", &[("D", 350)])]))
            .build();

        let trace = trace_flows(&source, &addr("A"), &limits(3)).await;

        assert_eq!(queried(&source), vec!["A", "B", "C", "D"]);
        assert_eq!(trace.stats.unavailable, 1);
        let hashes: Vec<&str> = trace.edges.iter().map(|e| e.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "a", "c"]);
    }

    #[tokio::test]
    async fn edges_are_in_pre_order() {
        let source = MockSource::builder()
            .with_snapshot(snapshot("A", vec![payment("a", "A", &[("B", 500), ("C", 400)])]))
            .with_snapshot(snapshot("B", vec![payment("b", "B", &[("X", 10)])]))
            .with_snapshot(snapshot("C", vec![payment("c", "C", &[("Y", 10)])]))
            .build();

        let trace = trace_flows(&source, &addr("A"), &limits(2)).await;

        let pairs: Vec<(&str, &str)> = trace
            .edges
            .iter()
            .map(|e| (e.from_address.as_str(), e.to_address.as_str()))
            .collect();
        assert_eq!(pairs, vec![("A", "B"), ("A", "C"), ("B", "X"), ("C", "Y")]);
    }

    #[tokio::test]
    async fn unavailable_seed_yields_empty_trace() {
        let source = MockSource::builder().with_unavailable("A").build();
        let trace = trace_flows(&source, &addr("A"), &limits(2)).await;
        assert!(trace.edges.is_empty());
        assert_eq!(trace.stats.unavailable, 1);
    }

    #[tokio::test]
    async fn depth_limits_queries() {
        let source = MockSource::builder()
            .with_snapshot(snapshot("A", vec![payment("a", "A", &[("B", 500)])]))
            .build();

        let trace = trace_flows(&source, &addr("A"), &limits(1)).await;
        assert_eq!(queried(&source), vec!["A"]);
        assert_eq!(trace.edges.len(), 1);

        let none = MockSource::builder().build();
        let trace = trace_flows(&none, &addr("A"), &limits(0)).await;
        assert_eq!(none.call_count(), 0);
        assert!(trace.edges.is_empty());
    }

    #[tokio::test]
    async fn requests_configured_page_size() {
        let source = MockSource::builder().build();
        trace_flows(&source, &addr("A"), &limits(2)).await;
        assert_eq!(source.requested_limits(), vec![50]);
    }

    #[test]
    fn summary_counts_addresses_value_and_fees() {
        let mut spend = payment("t", "A", &[("B", 300), ("C", 200)]);
        spend.fee = Some(sats(10));
        let classification = classify(&snapshot("A", vec![spend]), &addr("A"));
        let trace = FlowTrace {
            seed: addr("A"),
            edges: classification.edges,
            stats: TraceStats::default(),
        };

        let summary = trace.summary();
        assert_eq!(summary.unique_addresses, 3);
        assert_eq!(summary.total_value, sats(500));
        assert_eq!(summary.total_fees, sats(20));
        assert_eq!(summary.edge_count, 2);
    }

    #[tokio::test]
    async fn oversized_snapshot_ends_only_its_branch() {
        let source = MockSource::builder()
            .with_snapshot(snapshot("A", vec![payment("a", "A", &[("B", 500), ("C", 400)])]))
            .with_snapshot(snapshot("B", vec![oversized_tx("huge", "B", "X")]))
            .with_snapshot(snapshot("C", vec![payment("c", "C", &[("D", 350)])]))
            .build();

        let trace = trace_flows(&source, &addr("A"), &limits(3)).await;

        assert_eq!(queried(&source), vec!["A", "B", "C", "D"]);
        assert_eq!(trace.stats.unavailable, 1);
        let hashes: Vec<&str> = trace.edges.iter().map(|e| e.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "a", "c"]);
    }

    #[test]
    fn ranking_saturates_instead_of_overflowing() {
        let tx = oversized_tx("huge", "A", "B");
        let edges: Vec<FlowEdge> = tx
            .outputs
            .iter()
            .map(|out| FlowEdge::new(&tx, &addr("A"), &addr("B"), out.value))
            .collect();

        let ranked = rank_destinations(&edges, 3);
        assert_eq!(ranked, vec![(addr("B"), Amount::MAX)]);
    }
}
