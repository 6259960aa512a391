//! Staketrail ingestion daemon.
//!
//! Runs the live height follower for every enabled network alongside the
//! periodic reconciliation, crawler, and staker recalculation passes.
//!
//! # Usage
//!
//! ```bash
//! # Mainnet only, default intervals
//! MAINNET_REST_URL=http://lcd:1317 MAINNET_RPC_URL=http://rpc:26657 staketrail-ingest
//!
//! # A single follower/reconcile/crawl pass, then exit
//! staketrail-ingest --once
//! ```
//!
//! # Graceful Shutdown
//!
//! On SIGINT (Ctrl+C) the periodic loops stop scheduling new passes, any
//! in-flight pass runs to completion, and the audit log is flushed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics::gauge;
use staketrail_core::metrics::{start_metrics_server, try_init_metrics};
use staketrail_ingest::Components;
use staketrail_ingest::config::IngestConfig;
use staketrail_ingest::stakers::RECALC_BATCH_SIZE;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

const AUDIT_PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

/// Staketrail ingestion daemon.
#[derive(Parser, Debug)]
#[command(name = "staketrail-ingest")]
#[command(about = "Bitcoin staking delegation indexer")]
#[command(version)]
struct Args {
    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090", env = "METRICS_PORT")]
    metrics_port: u16,

    /// Run one follower tick, reconciliation, and crawl per network, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("staketrail_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    tracing::info!("Staketrail ingestion daemon starting...");

    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    let components =
        Arc::new(Components::build(&config).context("Failed to initialise components")?);

    if args.once {
        run_once(&components).await;
        components.shutdown();
        return Ok(());
    }

    if args.metrics_port > 0 {
        let handle = try_init_metrics().context("Metrics recorder already installed")?;
        start_metrics_server(args.metrics_port, handle)
            .await
            .with_context(|| format!("Failed to bind metrics port {}", args.metrics_port))?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        let _ = shutdown_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut tasks = Vec::new();

    for follower in &components.followers {
        let follower = follower.clone();
        let name = format!("follower:{}", follower.network());
        tasks.extend(spawn_periodic(
            name,
            config.follow_interval,
            shutdown_rx.clone(),
            move || {
                let follower = follower.clone();
                async move {
                    match follower.tick().await {
                        Ok(Some(tick)) if tick.failed > 0 => tracing::warn!(
                            network = %follower.network(),
                            from = tick.from_height,
                            to = tick.to_height,
                            failed = tick.failed,
                            "Follower tick left failed heights"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(
                            network = %follower.network(),
                            "Follower tick failed: {}",
                            e
                        ),
                    }
                }
            },
        ));
    }

    let reconciling = components.clone();
    tasks.extend(spawn_periodic(
        "reconcile".to_string(),
        config.reconcile_interval,
        shutdown_rx.clone(),
        move || {
            let components = reconciling.clone();
            async move { reconcile_all(&components).await }
        },
    ));

    let crawling = components.clone();
    tasks.extend(spawn_periodic(
        "crawl".to_string(),
        config.crawl_interval,
        shutdown_rx.clone(),
        move || {
            let components = crawling.clone();
            async move { crawl_all(&components).await }
        },
    ));

    let recalculating = components.clone();
    tasks.extend(spawn_periodic(
        "recalculate".to_string(),
        config.recalc_interval,
        shutdown_rx.clone(),
        move || {
            let components = recalculating.clone();
            async move {
                if let Err(e) = components.stakers.recalculate_all(RECALC_BATCH_SIZE).await {
                    tracing::warn!("Staker recalculation failed: {}", e);
                }
            }
        },
    ));

    if components.audit.is_some() && config.audit_retention.is_some() {
        let pruning = components.clone();
        tasks.extend(spawn_periodic(
            "audit-prune".to_string(),
            Some(AUDIT_PRUNE_INTERVAL),
            shutdown_rx.clone(),
            move || {
                let components = pruning.clone();
                async move {
                    if let Err(e) = components.prune_audit() {
                        tracing::warn!("Audit prune failed: {}", e);
                    }
                    if let Some(audit) = &components.audit {
                        match audit.approximate_count() {
                            Ok(count) => gauge!("audit_entries_approximate").set(count as f64),
                            Err(e) => tracing::debug!("Audit count unavailable: {}", e),
                        }
                    }
                }
            },
        ));
    }

    tracing::info!(tasks = tasks.len(), "Ingestion running");
    gauge!("ingestion_running").set(1.0);

    let mut wait = shutdown_rx.clone();
    while !*wait.borrow() {
        if wait.changed().await.is_err() {
            break;
        }
    }

    tracing::info!("Waiting for in-flight passes to finish...");
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!("Periodic task panicked: {:?}", e);
        }
    }

    components.shutdown();
    gauge!("ingestion_running").set(0.0);
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Run `task` every `interval` until shutdown. `None` disables the task.
fn spawn_periodic<F, Fut>(
    name: String,
    interval: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) -> Option<JoinHandle<()>>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let Some(interval) = interval else {
        tracing::info!(task = %name, "Periodic task disabled");
        return None;
    };
    tracing::info!(task = %name, interval_secs = interval.as_secs(), "Periodic task scheduled");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            task().await;
        }
        tracing::debug!(task = %name, "Periodic task stopped");
    }))
}

async fn run_once(components: &Components) {
    for follower in &components.followers {
        match follower.tick().await {
            Ok(Some(tick)) => tracing::info!(
                network = %follower.network(),
                from = tick.from_height,
                to = tick.to_height,
                checkpoint = tick.checkpoint,
                failed = tick.failed,
                "Follower tick"
            ),
            Ok(None) => tracing::info!(network = %follower.network(), "Follower up to date"),
            Err(e) => tracing::warn!(network = %follower.network(), "Follower tick failed: {}", e),
        }
    }
    reconcile_all(components).await;
    crawl_all(components).await;
    if let Err(e) = components.prune_audit() {
        tracing::warn!("Audit prune failed: {}", e);
    }
}

async fn reconcile_all(components: &Components) {
    for network in components.reconciler.networks() {
        if let Err(e) = components.reconciler.reconcile(network).await {
            tracing::warn!(network = %network, "Reconciliation failed: {}", e);
        }
    }
}

async fn crawl_all(components: &Components) {
    for network in components.reconciler.networks() {
        if let Err(e) = components.crawler.crawl(network).await {
            tracing::warn!(network = %network, "Crawl failed: {}", e);
        }
    }
}
