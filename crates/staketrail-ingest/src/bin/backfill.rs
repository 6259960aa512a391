//! Re-scan a block height range for missed delegation events.
//!
//! # Usage
//!
//! ```bash
//! backfill --network mainnet --start 120000 --end 120500
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use staketrail_core::Network;
use staketrail_ingest::Components;
use staketrail_ingest::config::IngestConfig;

#[derive(Parser, Debug)]
#[command(name = "backfill")]
#[command(about = "Re-process a block height range")]
struct Args {
    /// Network to backfill (mainnet or testnet)
    #[arg(long)]
    network: Network,

    /// First height (inclusive)
    #[arg(long)]
    start: u64,

    /// Last height (inclusive)
    #[arg(long)]
    end: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    if config.endpoints(args.network).is_none() {
        bail!("network {} has no REST URL configured", args.network);
    }
    let components = Components::build(&config).context("Failed to initialise components")?;

    let summary = components
        .backfill
        .process_missed_blocks(args.network, args.start, args.end)
        .await
        .context("Backfill failed")?;
    components.shutdown();

    let Some(summary) = summary else {
        bail!("a backfill of {} is already running", args.network);
    };

    println!(
        "network={} heights={}..={} processed={} events={} created={} updated={} skipped={} dropped={}",
        summary.network,
        summary.start_height,
        summary.end_height,
        summary.processed,
        summary.events,
        summary.dispatch.created,
        summary.dispatch.updated,
        summary.dispatch.skipped,
        summary.dispatch.dropped,
    );
    if !summary.failed_heights.is_empty() {
        bail!("failed heights: {:?}", summary.failed_heights);
    }
    Ok(())
}
