//! Prometheus metrics helpers for the staketrail indexer.
//!
//! # Usage
//!
//! ```rust,ignore
//! use staketrail_core::metrics::{start_metrics_server, try_init_metrics};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = try_init_metrics().unwrap();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("dispatcher_events_total", "kind" => "created").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`dispatcher_`, `reconcile_`, `backfill_`,
//!   `follower_`, `crawler_`, `staker_`, `chain_`, `audit_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: `network`, `kind`, `status`, `endpoint` only

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Install the Prometheus recorder and describe every metric.
///
/// Returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Serve `/metrics` on `port` from a background task.
///
/// The listener is bound before returning, so a port conflict surfaces here.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn register_metrics() {
    // =========================================================================
    // Event Dispatcher
    // =========================================================================

    describe_counter!(
        "dispatcher_events_total",
        "Chain events routed to a handler (label: kind)"
    );
    describe_counter!(
        "dispatcher_events_ignored_total",
        "Events with an unrecognized type or missing required attributes"
    );
    describe_counter!(
        "dispatcher_errors_total",
        "Handler failures contained by the dispatcher"
    );

    // =========================================================================
    // Reconciliation
    // =========================================================================

    describe_counter!("reconcile_runs_total", "Completed reconciliation runs");
    describe_counter!(
        "reconcile_delegations_total",
        "Delegations processed by reconciliation (labels: network, outcome)"
    );
    describe_counter!(
        "reconcile_errors_total",
        "Delegations or pages that failed during reconciliation"
    );
    describe_gauge!(
        "reconcile_running",
        "Whether a reconciliation run is in progress (1=yes, 0=no)"
    );
    describe_histogram!(
        "reconcile_duration_seconds",
        "Wall time of a reconciliation run"
    );

    // =========================================================================
    // Backfill / Follower
    // =========================================================================

    describe_counter!("backfill_blocks_total", "Heights processed by backfill");
    describe_counter!(
        "backfill_blocks_failed_total",
        "Heights whose block results could not be fetched"
    );
    describe_counter!(
        "backfill_events_total",
        "Delegation events replayed from block results"
    );
    describe_gauge!(
        "backfill_running",
        "Whether a backfill is in progress (1=yes, 0=no)"
    );
    describe_gauge!(
        "follower_height",
        "Last height processed by the live follower (label: network)"
    );
    describe_gauge!(
        "follower_lag_blocks",
        "Distance between chain tip and follower checkpoint (label: network)"
    );

    // =========================================================================
    // Crawler
    // =========================================================================

    describe_counter!(
        "crawler_delegations_total",
        "Transient delegations checked by the crawler (labels: network, outcome)"
    );
    describe_gauge!(
        "crawler_running",
        "Whether a crawl is in progress (1=yes, 0=no)"
    );

    // =========================================================================
    // Staker Aggregates
    // =========================================================================

    describe_counter!("staker_updates_total", "Incremental staker updates saved");
    describe_counter!(
        "staker_conflicts_total",
        "Staker saves rejected by a concurrent writer"
    );
    describe_counter!(
        "staker_update_failures_total",
        "Staker updates abandoned after exhausting retries"
    );
    describe_counter!(
        "staker_recalculations_total",
        "Stakers rebuilt from their delegation set"
    );

    // =========================================================================
    // Chain Client / Audit Log
    // =========================================================================

    describe_counter!(
        "chain_requests_total",
        "HTTP requests to chain endpoints (labels: network, endpoint, status)"
    );
    describe_counter!(
        "chain_request_retries_total",
        "Retried chain requests after a transient failure"
    );
    describe_histogram!(
        "chain_request_duration_seconds",
        "Latency of chain HTTP requests"
    );
    describe_gauge!(
        "audit_entries_approximate",
        "Approximate number of entries in the audit log"
    );
}
