use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// fundtrail: follow where the funds of a Bitcoin address went.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Base URL of the block explorer API.
    #[arg(
        long,
        global = true,
        default_value = "https://blockchain.info",
        env = "FUNDTRAIL_API_URL"
    )]
    pub api_url: String,

    /// Retries after a throttled (HTTP 429) request.
    #[arg(long, global = true, default_value = "3", env = "FUNDTRAIL_MAX_RETRIES")]
    pub max_retries: u32,

    /// Seconds to wait before retrying a throttled request.
    #[arg(long, global = true, default_value = "10", env = "FUNDTRAIL_RETRY_DELAY")]
    pub retry_delay_secs: u64,

    /// Seconds to pause after every request.
    #[arg(long, global = true, default_value = "10", env = "FUNDTRAIL_PACING")]
    pub pacing_secs: u64,

    /// Optional ceiling on outbound requests per second.
    #[arg(long, global = true, env = "FUNDTRAIL_REQUESTS_PER_SECOND")]
    pub requests_per_second: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recursively trace outgoing transfers from a wallet.
    Trace {
        /// Seed address to start from.
        #[arg(short, long)]
        wallet: String,

        /// Number of address levels to query, counting the seed.
        #[arg(short, long, default_value = "2")]
        depth: usize,

        /// CSV file for the traced flow edges.
        #[arg(short, long, default_value = "bitcoin_trace_results.csv")]
        output: PathBuf,
    },

    /// Find the accumulator wallet one hop from a seed and map its flows.
    Accumulator {
        /// Seed address to start from.
        #[arg(short, long)]
        wallet: String,

        /// CSV file for the accumulator flows.
        #[arg(short, long, default_value = "accumulator_flows.csv")]
        output: PathBuf,
    },

    /// Check which addresses of a CSV list have any transactions.
    Scan {
        /// Input CSV with an `identifiers` column.
        #[arg(short, long, default_value = "targets.simple.csv")]
        input: PathBuf,

        /// CSV file receiving the rows of active addresses.
        #[arg(short, long, default_value = "active_addresses.csv")]
        output: PathBuf,

        /// Addresses per lookup request.
        #[arg(long, default_value = "100")]
        batch_size: usize,
    },
}
