//! Polling crawler for delegations stuck in transient states.
//!
//! Some transitions never produce an event the indexer sees. The crawler
//! re-reads every mirrored `PENDING`/`VERIFIED` delegation from the chain and
//! pushes the chain's view through the shared write path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use staketrail_core::{Delegation, DelegationState, Network};

use crate::chain::ChainClient;
use crate::lifecycle::{DelegationWriter, ExistingPolicy, WriteOutcome};
use crate::retry::RetryPolicy;
use crate::run_state::{RunSnapshot, RunState};
use crate::store::{DelegationQuery, DelegationSortField, SortOrder};
use crate::{Error, Result};

const PAGE_SIZE: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Updated,
    Unchanged,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub network: Network,
    pub checked: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Unknown to the chain.
    pub missing: u64,
    pub errored: u64,
}

pub struct PollingCrawler {
    clients: HashMap<Network, Arc<dyn ChainClient>>,
    writer: Arc<DelegationWriter>,
    retry: RetryPolicy,
    run_state: RunState<CrawlSummary>,
}

impl PollingCrawler {
    pub fn new(clients: Vec<Arc<dyn ChainClient>>, writer: Arc<DelegationWriter>) -> Self {
        Self {
            clients: clients.into_iter().map(|c| (c.network(), c)).collect(),
            writer,
            retry: RetryPolicy::default(),
            run_state: RunState::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run_state(&self) -> RunSnapshot<CrawlSummary> {
        self.run_state.snapshot()
    }

    fn transient_delegations(&self, network: Network) -> Result<Vec<Delegation>> {
        let mut query = DelegationQuery {
            network: Some(network),
            states: DelegationState::TRANSIENT.to_vec(),
            sort: DelegationSortField::StakingTxId,
            order: SortOrder::Asc,
            offset: 0,
            limit: PAGE_SIZE,
            ..Default::default()
        };
        let mut all = Vec::new();
        loop {
            let page = self.writer.store().list_delegations(&query)?;
            let count = page.items.len() as u64;
            all.extend(page.items);
            if count < query.limit {
                return Ok(all);
            }
            query.offset += count;
        }
    }

    /// Re-check every transient delegation of `network`.
    ///
    /// Returns `None` if a crawl is already running.
    pub async fn crawl(&self, network: Network) -> Result<Option<CrawlSummary>> {
        let client = self
            .clients
            .get(&network)
            .ok_or_else(|| Error::Config(format!("network {} is not configured", network)))?;
        let Some(guard) = self.run_state.try_begin() else {
            tracing::info!(network = %network, "Crawl already running, skipping");
            return Ok(None);
        };
        metrics::gauge!("crawler_running").set(1.0);
        let started = Instant::now();

        let mut summary = CrawlSummary {
            network,
            checked: 0,
            updated: 0,
            unchanged: 0,
            missing: 0,
            errored: 0,
        };

        let stuck = match self.transient_delegations(network) {
            Ok(stuck) => stuck,
            Err(e) => {
                metrics::gauge!("crawler_running").set(0.0);
                return Err(e);
            }
        };

        for stored in stuck {
            summary.checked += 1;
            let outcome = match self.check(&**client, stored).await {
                Ok(Check::Updated) => {
                    summary.updated += 1;
                    "updated"
                }
                Ok(Check::Unchanged) => {
                    summary.unchanged += 1;
                    "unchanged"
                }
                Ok(Check::Missing) => {
                    summary.missing += 1;
                    "missing"
                }
                Err(e) => {
                    tracing::warn!(network = %network, "Crawl check failed: {}", e);
                    summary.errored += 1;
                    "errored"
                }
            };
            metrics::counter!(
                "crawler_delegations_total",
                "network" => network.as_str(),
                "outcome" => outcome
            )
            .increment(1);
        }

        metrics::gauge!("crawler_running").set(0.0);
        tracing::info!(
            network = %network,
            checked = summary.checked,
            updated = summary.updated,
            missing = summary.missing,
            errored = summary.errored,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Crawl complete"
        );
        guard.finish(summary.clone());
        Ok(Some(summary))
    }

    async fn check(&self, client: &dyn ChainClient, stored: Delegation) -> Result<Check> {
        let txid = stored.staking_tx_id_hex.clone();
        let what = format!("{} delegation {}", stored.network, txid);
        let lookup = txid.as_str();
        let Some(chain) = self
            .retry
            .run(&what, move || client.get_delegation(lookup))
            .await?
        else {
            tracing::debug!(network = %stored.network, txid = %txid, "Delegation unknown to chain");
            return Ok(Check::Missing);
        };

        let state: DelegationState = chain.status_desc.parse()?;
        let mut candidate = stored;
        candidate.state = state;
        candidate.start_height = chain.start_height;
        candidate.end_height = chain.end_height;

        let outcome = self
            .writer
            .observe(candidate, ExistingPolicy::AdoptStateAndHeights)
            .await?;
        Ok(match outcome {
            WriteOutcome::Updated | WriteOutcome::Created => Check::Updated,
            WriteOutcome::Unchanged | WriteOutcome::Skipped(_) => Check::Unchanged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DelegationStore;
    use crate::testing::{self, FakeChainClient, chain_delegation, delegation};
    use serde_json::json;

    #[tokio::test]
    async fn test_crawl_adopts_chain_state() {
        let mut active = chain_delegation("T1", "bbn1abc", json!("1000"), DelegationState::Active);
        active.start_height = 100;
        active.end_height = 64_100;
        let client = Arc::new(
            FakeChainClient::new(Network::Mainnet)
                .with_delegation("T1", active)
                .with_delegation(
                    "T2",
                    chain_delegation("T2", "bbn1abc", json!("1000"), DelegationState::Verified),
                ),
        );
        client.fail("get:T4", testing::bad_request());

        let (store, writer) = testing::writer();
        for (txid, state) in [
            ("T1", DelegationState::Pending),
            ("T2", DelegationState::Verified),
            ("T3", DelegationState::Pending),
            ("T4", DelegationState::Verified),
            ("T5", DelegationState::Active),
        ] {
            store
                .insert_delegation(&delegation(txid, "bbn1abc", 1_000, 100, state))
                .unwrap();
        }
        let crawler = PollingCrawler::new(vec![client.clone()], Arc::new(writer))
            .with_retry(RetryPolicy::immediate(2));

        let summary = crawler.crawl(Network::Mainnet).await.unwrap().unwrap();
        assert_eq!(
            summary,
            CrawlSummary {
                network: Network::Mainnet,
                checked: 4,
                updated: 1,
                unchanged: 1,
                missing: 1,
                errored: 1,
            }
        );
        assert_eq!(client.calls("get:T5"), 0);

        let t1 = store.get_delegation(Network::Mainnet, "T1").unwrap().unwrap();
        assert_eq!(
            (t1.state, t1.start_height, t1.end_height),
            (DelegationState::Active, 100, 64_100)
        );
        assert!(!crawler.run_state().running);
    }

    #[tokio::test]
    async fn test_crawl_requires_configured_network() {
        let (_store, writer) = testing::writer();
        let crawler = PollingCrawler::new(vec![], Arc::new(writer));
        assert!(crawler.crawl(Network::Testnet).await.is_err());
    }
}
