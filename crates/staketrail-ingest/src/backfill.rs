//! Block-range backfill.
//!
//! Re-scans a height range for delegation events the live path missed.
//! Heights are fetched in contiguous batches under a shared rate limiter,
//! then dispatched one height at a time in height order. A height that
//! cannot be fetched is counted as failed and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use staketrail_core::Network;

use crate::chain::{BlockResults, ChainClient, RawEvent};
use crate::dispatcher::{DispatchStats, EventDispatcher};
use crate::events::{EventBatch, is_delegation_domain};
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::run_state::{RunSnapshot, RunState};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Heights fetched per batch.
    pub batch_size: usize,
    pub max_concurrent: usize,
    /// Minimum spacing between requests to the same node.
    pub request_spacing: Duration,
    /// Pause after each batch.
    pub batch_pause: Duration,
    pub retry: RetryPolicy,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_concurrent: 5,
            request_spacing: Duration::from_secs(1),
            batch_pause: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub network: Network,
    pub start_height: u64,
    pub end_height: u64,
    pub processed: u64,
    /// Ascending.
    pub failed_heights: Vec<u64>,
    pub events: u64,
    pub dispatch: DispatchStats,
}

impl BackfillSummary {
    pub fn first_failed(&self) -> Option<u64> {
        self.failed_heights.first().copied()
    }
}

pub struct BackfillProcessor {
    clients: HashMap<Network, Arc<dyn ChainClient>>,
    dispatcher: Arc<EventDispatcher>,
    limiter: RateLimiter,
    config: BackfillConfig,
    run_states: HashMap<Network, RunState<BackfillSummary>>,
}

impl BackfillProcessor {
    pub fn new(
        clients: Vec<Arc<dyn ChainClient>>,
        dispatcher: Arc<EventDispatcher>,
        config: BackfillConfig,
    ) -> Self {
        let clients: HashMap<Network, Arc<dyn ChainClient>> =
            clients.into_iter().map(|c| (c.network(), c)).collect();
        let run_states = clients.keys().map(|&n| (n, RunState::new())).collect();
        Self {
            clients,
            dispatcher,
            limiter: RateLimiter::new(config.max_concurrent, config.request_spacing),
            config,
            run_states,
        }
    }

    pub fn run_state(&self, network: Network) -> Option<RunSnapshot<BackfillSummary>> {
        self.run_states.get(&network).map(RunState::snapshot)
    }

    /// Re-process `[start_height, end_height]` on `network`.
    ///
    /// Returns `None` if a backfill of this network is already running.
    pub async fn process_missed_blocks(
        &self,
        network: Network,
        start_height: u64,
        end_height: u64,
    ) -> Result<Option<BackfillSummary>> {
        let (Some(client), Some(run_state)) =
            (self.clients.get(&network), self.run_states.get(&network))
        else {
            return Err(Error::Config(format!("network {} is not configured", network)));
        };
        if start_height > end_height {
            return Err(Error::Config(format!(
                "invalid backfill range {}..={}",
                start_height, end_height
            )));
        }
        let Some(guard) = run_state.try_begin() else {
            tracing::info!(network = %network, "Backfill already running, skipping");
            return Ok(None);
        };

        metrics::gauge!("backfill_running").set(1.0);
        let started = Instant::now();
        let mut summary = BackfillSummary {
            network,
            start_height,
            end_height,
            processed: 0,
            failed_heights: Vec::new(),
            events: 0,
            dispatch: DispatchStats::default(),
        };

        let batch_size = self.config.batch_size.max(1) as u64;
        let mut batch_start = start_height;
        loop {
            let batch_end = batch_start.saturating_add(batch_size - 1).min(end_height);
            let heights: Vec<u64> = (batch_start..=batch_end).collect();

            let fetched = join_all(heights.iter().map(|&h| self.fetch(&**client, h))).await;

            for (height, result) in heights.into_iter().zip(fetched) {
                match result {
                    Ok(block) => {
                        self.dispatch_block(network, height, block, &mut summary)
                            .await;
                        summary.processed += 1;
                        metrics::counter!("backfill_blocks_total").increment(1);
                    }
                    Err(e) => {
                        tracing::warn!(network = %network, height, "Backfill height failed: {}", e);
                        metrics::counter!("backfill_blocks_failed_total").increment(1);
                        summary.failed_heights.push(height);
                    }
                }
            }

            if batch_end >= end_height {
                break;
            }
            batch_start = batch_end + 1;
            if !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        metrics::gauge!("backfill_running").set(0.0);
        tracing::info!(
            network = %network,
            start_height,
            end_height,
            processed = summary.processed,
            failed = summary.failed_heights.len(),
            events = summary.events,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backfill complete"
        );
        guard.finish(summary.clone());
        Ok(Some(summary))
    }

    async fn fetch(&self, client: &dyn ChainClient, height: u64) -> Result<BlockResults> {
        let what = format!("{} block results at {}", client.network(), height);
        let limiter = &self.limiter;
        self.config
            .retry
            .run(&what, move || async move {
                let _permit = limiter.acquire(client.rpc_url()).await?;
                client.get_block_results(height).await
            })
            .await
    }

    async fn dispatch_block(
        &self,
        network: Network,
        height: u64,
        block: BlockResults,
        summary: &mut BackfillSummary,
    ) {
        let mut batches: Vec<Vec<RawEvent>> = block
            .txs_results
            .into_iter()
            .filter(|tx| tx.succeeded())
            .map(|tx| tx.events)
            .collect();
        batches.push(block.finalize_block_events);

        for events in batches {
            let events: Vec<RawEvent> =
                events.into_iter().filter(is_delegation_domain).collect();
            if events.is_empty() {
                continue;
            }
            summary.events += events.len() as u64;
            metrics::counter!("backfill_events_total").increment(events.len() as u64);
            let batch = EventBatch::new(events).at_height(height);
            let stats = self.dispatcher.handle_event(&batch, network).await;
            summary.dispatch.merge(&stats);
        }
    }
}
