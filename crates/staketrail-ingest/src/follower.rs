//! Live height follower.
//!
//! Each tick compares the chain head with the last processed height and
//! backfills the gap, so live ingestion and gap recovery share one path. The
//! checkpoint never moves past a failed height; the next tick retries it.

use std::sync::Arc;

use staketrail_core::Network;

use crate::Result;
use crate::backfill::BackfillProcessor;
use crate::chain::ChainClient;
use crate::retry::RetryPolicy;
use crate::store::CheckpointStore;

/// Outcome of one follower tick that processed heights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowTick {
    pub from_height: u64,
    pub to_height: u64,
    pub chain_height: u64,
    /// Last processed height after the tick.
    pub checkpoint: u64,
    pub failed: usize,
}

pub struct HeightFollower {
    client: Arc<dyn ChainClient>,
    backfill: Arc<BackfillProcessor>,
    checkpoints: Arc<dyn CheckpointStore>,
    max_lag: u64,
    retry: RetryPolicy,
}

impl HeightFollower {
    pub fn new(
        client: Arc<dyn ChainClient>,
        backfill: Arc<BackfillProcessor>,
        checkpoints: Arc<dyn CheckpointStore>,
        max_lag: u64,
    ) -> Self {
        Self {
            client,
            backfill,
            checkpoints,
            max_lag: max_lag.max(1),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn network(&self) -> Network {
        self.client.network()
    }

    pub fn checkpoint_key(network: Network) -> String {
        format!("follower:{}", network)
    }

    /// Process up to `max_lag` new heights. `None` when there was nothing to do.
    pub async fn tick(&self) -> Result<Option<FollowTick>> {
        let network = self.network();
        let key = Self::checkpoint_key(network);
        let client = &self.client;
        let chain_height = self
            .retry
            .run("current height", move || client.get_current_height())
            .await?;

        let stored = self.checkpoints.get_checkpoint(&key)?;
        let done = match stored {
            Some(done) => done,
            None => {
                tracing::info!(network = %network, chain_height, "No checkpoint, following from head");
                chain_height.saturating_sub(1)
            }
        };
        if done >= chain_height {
            metrics::gauge!("follower_lag_blocks", "network" => network.as_str()).set(0.0);
            return Ok(None);
        }

        let from_height = done + 1;
        let to_height = chain_height.min(done.saturating_add(self.max_lag));
        let Some(summary) = self
            .backfill
            .process_missed_blocks(network, from_height, to_height)
            .await?
        else {
            return Ok(None);
        };

        let checkpoint = summary
            .first_failed()
            .map(|h| h - 1)
            .unwrap_or(to_height);
        if stored.is_none() || checkpoint > done {
            self.checkpoints.set_checkpoint(&key, checkpoint)?;
        }

        let lag = chain_height.saturating_sub(checkpoint);
        metrics::gauge!("follower_height", "network" => network.as_str()).set(checkpoint as f64);
        metrics::gauge!("follower_lag_blocks", "network" => network.as_str()).set(lag as f64);
        if lag > 0 {
            tracing::debug!(network = %network, checkpoint, lag, "Follower behind head");
        }

        Ok(Some(FollowTick {
            from_height,
            to_height,
            chain_height,
            checkpoint,
            failed: summary.failed_heights.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::BackfillConfig;
    use crate::chain::{BlockResults, RawEvent};
    use crate::dispatcher::EventDispatcher;
    use crate::lifecycle::ExistingPolicy;
    use crate::store::{DelegationStore, SqliteStore};
    use crate::testing::{self, FakeChainClient, delegation, tx_result};
    use staketrail_core::DelegationState;
    use std::time::Duration;

    fn follower(
        client: FakeChainClient,
        max_lag: u64,
    ) -> (Arc<SqliteStore>, Arc<FakeChainClient>, HeightFollower, Arc<crate::lifecycle::DelegationWriter>) {
        let (store, writer) = testing::writer();
        let writer = Arc::new(writer);
        let dispatcher = Arc::new(EventDispatcher::new(writer.clone(), None));
        let client = Arc::new(client);
        let config = BackfillConfig {
            batch_size: 5,
            request_spacing: Duration::ZERO,
            batch_pause: Duration::ZERO,
            retry: RetryPolicy::immediate(1),
            ..Default::default()
        };
        let backfill = Arc::new(BackfillProcessor::new(
            vec![client.clone()],
            dispatcher,
            config,
        ));
        let follower = HeightFollower::new(client.clone(), backfill, store.clone(), max_lag)
            .with_retry(RetryPolicy::immediate(1));
        (store, client, follower, writer)
    }

    fn key() -> String {
        HeightFollower::checkpoint_key(Network::Mainnet)
    }

    #[tokio::test]
    async fn test_cold_start_follows_from_head() {
        let (store, client, follower, _) =
            follower(FakeChainClient::new(Network::Mainnet).with_height(1_000), 100);

        let tick = follower.tick().await.unwrap().unwrap();
        assert_eq!((tick.from_height, tick.to_height), (1_000, 1_000));
        assert_eq!(store.get_checkpoint(&key()).unwrap(), Some(1_000));
        assert_eq!(client.calls("block:"), 1);

        assert!(follower.tick().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lag_is_bounded_per_tick() {
        let (store, _client, follower, _) =
            follower(FakeChainClient::new(Network::Mainnet).with_height(50), 10);
        store.set_checkpoint(&key(), 20).unwrap();

        let tick = follower.tick().await.unwrap().unwrap();
        assert_eq!((tick.from_height, tick.to_height), (21, 30));
        let tick = follower.tick().await.unwrap().unwrap();
        assert_eq!((tick.from_height, tick.to_height), (31, 40));
        assert_eq!(store.get_checkpoint(&key()).unwrap(), Some(40));
    }

    #[tokio::test]
    async fn test_failed_height_is_retried_next_tick() {
        let client = FakeChainClient::new(Network::Mainnet)
            .with_height(14)
            .with_block(BlockResults {
                height: 13,
                txs_results: vec![tx_result(
                    0,
                    vec![RawEvent::new(
                        "babylon.btcstaking.v1.EventBTCDelegationExpired",
                        &[("staking_tx_hash", "T2")],
                    )],
                )],
                finalize_block_events: vec![],
            });
        client.fail("block:13", testing::timeout());
        let (store, client, follower, writer) = follower(client, 100);
        writer
            .observe(
                delegation("T2", "bbn1abc", 1_000, 100, DelegationState::Verified),
                ExistingPolicy::Keep,
            )
            .await
            .unwrap();
        store.set_checkpoint(&key(), 10).unwrap();

        let tick = follower.tick().await.unwrap().unwrap();
        assert_eq!(tick.failed, 1);
        assert_eq!(tick.checkpoint, 12);
        assert_eq!(store.get_checkpoint(&key()).unwrap(), Some(12));

        client.set_height(14);
        let tick = follower.tick().await.unwrap().unwrap();
        assert_eq!((tick.from_height, tick.checkpoint), (13, 14));
        let d = store.get_delegation(Network::Mainnet, "T2").unwrap().unwrap();
        assert_eq!(d.state, DelegationState::Expired);
    }
}
