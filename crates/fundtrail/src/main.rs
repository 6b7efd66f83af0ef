mod cli;
mod export;

use std::path::Path;
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;

use fundtrail_core::activity::scan_activity;
use fundtrail_core::aggregate::analyze_accumulator;
use fundtrail_core::source::{AddressSource, HttpAddressSource, RateLimitedSource, SourceConfig};
use fundtrail_core::trace::trace_flows;
use fundtrail_core::types::to_major;
use fundtrail_core::{Address, AttributionConfig, TraceLimits};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let config = SourceConfig {
        base_url: args.api_url.clone(),
        max_retries: args.max_retries,
        retry_delay: Duration::from_secs(args.retry_delay_secs),
        pacing: Duration::from_secs(args.pacing_secs),
        requests_per_second: args.requests_per_second,
        ..Default::default()
    };
    let http = HttpAddressSource::new(&config.base_url, config.requests_per_second)
        .context("configure explorer client")?;
    let source = RateLimitedSource::new(http, &config);

    tracing::info!(
        api = %config.base_url,
        max_retries = config.max_retries,
        pacing_secs = args.pacing_secs,
        "explorer source ready"
    );

    match args.command {
        Command::Trace {
            wallet,
            depth,
            output,
        } => run_trace(&source, Address::new(wallet), depth, &output).await,
        Command::Accumulator { wallet, output } => {
            run_accumulator(&source, Address::new(wallet), &output).await
        }
        Command::Scan {
            input,
            output,
            batch_size,
        } => run_scan(&source, &input, &output, batch_size).await,
    }
}

async fn run_trace(
    source: &dyn AddressSource,
    seed: Address,
    depth: usize,
    output: &Path,
) -> eyre::Result<()> {
    let limits = TraceLimits {
        max_depth: depth,
        ..Default::default()
    };
    tracing::info!(%seed, max_depth = limits.max_depth, fan_out = limits.fan_out, "starting trace");

    let trace = trace_flows(source, &seed, &limits).await;
    let written = export::write_flow_edges(output, &trace.edges).context("export flow edges")?;

    let summary = trace.summary();
    println!();
    println!("  Trace of {seed}:");
    println!("    Unique addresses: {}", summary.unique_addresses);
    println!("    Total value:      {:.8} BTC", to_major(summary.total_value));
    println!("    Total fees:       {:.8} BTC", to_major(summary.total_fees));
    println!("    Transactions:     {}", summary.edge_count);
    println!(
        "    Queried:          {} ({} unavailable, {} cycles skipped)",
        trace.stats.addresses_queried, trace.stats.unavailable, trace.stats.cycle_skips
    );
    if written {
        println!("    Results:          {}", output.display());
    }
    println!();
    Ok(())
}

async fn run_accumulator(source: &dyn AddressSource, seed: Address, output: &Path) -> eyre::Result<()> {
    let model = analyze_accumulator(source, &seed, &AttributionConfig::default())
        .await
        .context("accumulator analysis")?;
    export::write_accumulator_flows(output, &model).context("export accumulator flows")?;

    println!();
    println!("  Accumulator of {seed}: {}", model.accumulator);
    println!("    Total accumulated:   {:.8} BTC", to_major(model.total_accumulated()));
    println!("    Total redistributed: {:.8} BTC", to_major(model.total_redistributed()));
    println!("    Difference:          {:.8} BTC", model.retained().to_btc());
    println!("    Results:             {}", output.display());
    println!();
    Ok(())
}

async fn run_scan(
    source: &dyn AddressSource,
    input: &Path,
    output: &Path,
    batch_size: usize,
) -> eyre::Result<()> {
    let targets = export::ScanInput::read(input)?;
    let addresses = targets.addresses();
    tracing::info!(path = %input.display(), addresses = addresses.len(), "loaded scan input");

    let activity = scan_activity(source, &addresses, batch_size).await;
    let unknown = activity.iter().filter(|a| a.tx_count.is_none()).count();
    let written = targets
        .write_active(output, &activity)
        .context("export active addresses")?;

    println!();
    println!("  Scanned {} addresses:", addresses.len());
    println!("    Active rows: {written}");
    println!("    Unknown:     {unknown}");
    println!("    Results:     {}", output.display());
    println!();
    Ok(())
}
