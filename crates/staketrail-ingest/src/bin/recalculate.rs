//! Rebuild staker aggregates from the delegation set.
//!
//! # Usage
//!
//! ```bash
//! # Every staker
//! recalculate
//!
//! # One staker, printing the rebuilt document
//! recalculate --staker bbn1...
//! ```

use anyhow::{Context, Result, bail};
use clap::Parser;
use staketrail_ingest::Components;
use staketrail_ingest::config::IngestConfig;
use staketrail_ingest::stakers::RECALC_BATCH_SIZE;

#[derive(Parser, Debug)]
#[command(name = "recalculate")]
#[command(about = "Rebuild staker aggregates from stored delegations")]
struct Args {
    /// Only rebuild this staker address
    #[arg(long)]
    staker: Option<String>,

    /// Staker addresses loaded per page
    #[arg(long, default_value_t = RECALC_BATCH_SIZE)]
    batch_size: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();
    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    let components = Components::build(&config).context("Failed to initialise components")?;

    match args.staker {
        Some(address) => {
            let staker = components
                .stakers
                .recalculate_staker(&address)
                .await
                .with_context(|| format!("Failed to recalculate {}", address))?;
            println!("{}", serde_json::to_string_pretty(&staker)?);
        }
        None => {
            let Some(summary) = components.stakers.recalculate_all(args.batch_size).await? else {
                bail!("a recalculation is already running");
            };
            println!(
                "recalculated={} failed={}",
                summary.recalculated, summary.failed
            );
            if summary.failed > 0 {
                bail!("{} stakers failed to recalculate", summary.failed);
            }
        }
    }

    components.shutdown();
    Ok(())
}
