//! CSV files written and read by the command line tool.

use std::collections::HashMap;
use std::path::Path;

use eyre::{eyre, WrapErr};
use fundtrail_core::types::{to_major, AddressActivity, FlowGraphModel};
use fundtrail_core::{Address, FlowEdge};
use serde::Serialize;
use time::macros::format_description;
use time::OffsetDateTime;

/// Column holding the addresses of a scan input file.
pub const IDENTIFIER_COLUMN: &str = "identifiers";

/// Render a unix timestamp as `YYYY-MM-DD HH:MM:SS` in UTC. Values outside
/// the representable range are written as the raw number.
pub fn format_timestamp(secs: i64) -> String {
    OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .and_then(|at| {
            at.format(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .ok()
        })
        .unwrap_or_else(|| secs.to_string())
}

fn major(amount: bitcoin::Amount) -> String {
    format!("{:.8}", to_major(amount))
}

// ==============================================================================
// Flow Edges
// ==============================================================================

#[derive(Serialize)]
struct EdgeRow<'a> {
    tx_hash: &'a str,
    timestamp: String,
    from_address: &'a str,
    to_address: &'a str,
    value_major: String,
    value_minor: u64,
    tx_fee_major: String,
}

impl<'a> From<&'a FlowEdge> for EdgeRow<'a> {
    fn from(edge: &'a FlowEdge) -> Self {
        Self {
            tx_hash: &edge.tx_hash,
            timestamp: format_timestamp(edge.timestamp),
            from_address: edge.from_address.as_str(),
            to_address: edge.to_address.as_str(),
            value_major: major(edge.value),
            value_minor: edge.value.to_sat(),
            tx_fee_major: major(edge.fee),
        }
    }
}

/// Write one row per edge, in the given order. Returns `false` without
/// touching `path` when there is nothing to write.
pub fn write_flow_edges(path: &Path, edges: &[FlowEdge]) -> eyre::Result<bool> {
    if edges.is_empty() {
        tracing::warn!(path = %path.display(), "no flow edges to export");
        return Ok(false);
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("create flow edge file {}", path.display()))?;
    for edge in edges {
        writer
            .serialize(EdgeRow::from(edge))
            .context("write flow edge row")?;
    }
    writer.flush().context("flush flow edge file")?;

    tracing::info!(path = %path.display(), rows = edges.len(), "exported flow edges");
    Ok(true)
}

// ==============================================================================
// Accumulator Flows
// ==============================================================================

#[derive(Serialize)]
struct AccumulatorRow<'a> {
    from_address: &'a str,
    to_address: &'a str,
    amount_major: String,
    flow_type: String,
}

/// Write the seed hop, other sources and destinations of `model`.
pub fn write_accumulator_flows(path: &Path, model: &FlowGraphModel) -> eyre::Result<()> {
    let flows = model.flows();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("create accumulator file {}", path.display()))?;
    for flow in &flows {
        writer
            .serialize(AccumulatorRow {
                from_address: flow.from_address.as_str(),
                to_address: flow.to_address.as_str(),
                amount_major: major(flow.amount),
                flow_type: flow.kind.to_string(),
            })
            .context("write accumulator row")?;
    }
    writer.flush().context("flush accumulator file")?;

    tracing::info!(path = %path.display(), rows = flows.len(), "exported accumulator flows");
    Ok(())
}

// ==============================================================================
// Activity Scan
// ==============================================================================

/// Rows of a scan input file, kept whole so active rows can be written back
/// unchanged.
#[derive(Debug)]
pub struct ScanInput {
    headers: csv::StringRecord,
    rows: Vec<csv::StringRecord>,
    column: usize,
}

impl ScanInput {
    pub fn read(path: &Path) -> eyre::Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("open scan input {}", path.display()))?;
        let headers = reader.headers().context("read scan input header")?.clone();
        let column = headers
            .iter()
            .position(|h| h.trim() == IDENTIFIER_COLUMN)
            .ok_or_else(|| {
                eyre!(
                    "{} has no `{IDENTIFIER_COLUMN}` column",
                    path.display()
                )
            })?;
        let rows = reader
            .records()
            .collect::<Result<Vec<_>, _>>()
            .context("read scan input rows")?;
        Ok(Self {
            headers,
            rows,
            column,
        })
    }

    /// Distinct non-empty addresses, in first-seen order.
    pub fn addresses(&self) -> Vec<Address> {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.get(self.column))
            .map(str::trim)
            .filter(|a| !a.is_empty() && seen.insert(*a))
            .map(Address::from)
            .collect()
    }

    /// Write the rows whose address is active, with an extra `n_tx` column.
    /// Returns the number of rows written.
    pub fn write_active(&self, path: &Path, activity: &[AddressActivity]) -> eyre::Result<usize> {
        let counts: HashMap<&str, u64> = activity
            .iter()
            .filter(|a| a.is_active())
            .filter_map(|a| a.tx_count.map(|n| (a.address.as_str(), n)))
            .collect();

        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("create scan output {}", path.display()))?;
        let mut header = self.headers.clone();
        header.push_field("n_tx");
        writer.write_record(&header).context("write scan header")?;

        let mut written = 0;
        for row in &self.rows {
            let Some(n_tx) = row.get(self.column).and_then(|a| counts.get(a.trim())) else {
                continue;
            };
            let mut out = row.clone();
            out.push_field(&n_tx.to_string());
            writer.write_record(&out).context("write scan row")?;
            written += 1;
        }
        writer.flush().context("flush scan output")?;

        tracing::info!(path = %path.display(), rows = written, "exported active addresses");
        Ok(written)
    }
}
