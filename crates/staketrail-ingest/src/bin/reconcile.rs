//! One reconciliation pass per enabled network.

use anyhow::{Context, Result};
use clap::Parser;
use staketrail_ingest::Components;
use staketrail_ingest::config::IngestConfig;

#[derive(Parser, Debug)]
#[command(name = "reconcile")]
#[command(about = "Resync stored delegations against chain listings")]
struct Args {
    /// Print per-status counts
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    let components = Components::build(&config).context("Failed to initialise components")?;

    for network in components.reconciler.networks() {
        let Some(summary) = components
            .reconciler
            .reconcile(network)
            .await
            .with_context(|| format!("Reconciliation of {} failed", network))?
        else {
            continue;
        };
        println!(
            "{}: created={} updated={} unchanged={} errored={} discarded={}",
            summary.network,
            summary.created,
            summary.updated,
            summary.unchanged,
            summary.errored,
            summary.discarded
        );
        if args.verbose {
            for (status, counts) in &summary.statuses {
                println!(
                    "  {}: fetched={} created={} updated={} unchanged={} errored={} discarded={} fetch_failed={}",
                    status,
                    counts.fetched,
                    counts.created,
                    counts.updated,
                    counts.unchanged,
                    counts.errored,
                    counts.discarded,
                    counts.fetch_failed
                );
            }
        }
    }

    components.shutdown();
    Ok(())
}
