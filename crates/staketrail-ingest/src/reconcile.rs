//! Full chain-vs-mirror reconciliation.
//!
//! For every delegation status the chain's listing is paged to exhaustion,
//! each record is mapped into the mirror's shape, and the result is pushed
//! through the shared write path in fixed-size batches: absent rows are
//! created, rows in a different state take the chain's state, everything
//! else is left alone.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use staketrail_core::{Delegation, DelegationState, Network};

use crate::chain::{ChainClient, ChainDelegation, DEFAULT_PAGE_LIMIT};
use crate::codec::TxCodec;
use crate::lifecycle::{DelegationWriter, ExistingPolicy, WriteOutcome};
use crate::retry::RetryPolicy;
use crate::run_state::{RunSnapshot, RunState};
use crate::{Error, Result};

/// Map a chain-side record into a mirror delegation in `state`.
///
/// Fails when the record has no staking tx, its amount is not a
/// non-negative integer, or its txid cannot be derived.
pub fn delegation_from_chain(
    network: Network,
    state: DelegationState,
    chain: &ChainDelegation,
    codec: &dyn TxCodec,
) -> std::result::Result<Delegation, String> {
    if chain.staking_tx_hex.is_empty() {
        return Err("missing staking_tx_hex".into());
    }
    let total_sat = parse_amount(&chain.total_sat)
        .ok_or_else(|| format!("unparsable amount {}", chain.total_sat))?;
    let staking_tx_id_hex = codec
        .txid(&chain.staking_tx_hex)
        .map_err(|e| format!("txid: {}", e))?;
    let unbonding_tx_hex = chain
        .undelegation_response
        .as_ref()
        .and_then(|u| u.unbonding_tx_hex.clone())
        .filter(|hex| !hex.is_empty());
    let unbonding_tx_id_hex = unbonding_tx_hex
        .as_deref()
        .and_then(|hex| codec.txid(hex).ok());

    Ok(Delegation {
        staker_btc_address: codec.sender_address(&chain.staking_tx_hex, network),
        staking_tx_hex: chain.staking_tx_hex.clone(),
        staking_tx_id_hex,
        network,
        staker_address: chain.staker_addr.clone(),
        staker_btc_pk_hex: chain.btc_pk.clone(),
        finality_provider_btc_pks_hex: chain.fp_btc_pk_list.clone(),
        total_sat,
        staking_time: chain.staking_time,
        unbonding_time: chain.unbonding_time,
        start_height: chain.start_height,
        end_height: chain.end_height,
        block_height: 0,
        tx_hash: None,
        unbonding_tx_hex,
        unbonding_tx_id_hex,
        spend_stake_tx_hex: None,
        spend_stake_tx_id_hex: None,
        state,
        params_version: chain.params_version,
    })
}

fn parse_amount(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Candidates written concurrently per batch.
    pub batch_size: usize,
    pub page_limit: u32,
    pub retry: RetryPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            page_limit: DEFAULT_PAGE_LIMIT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counts for one status listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errored: u64,
    /// Records rejected by the transform.
    pub discarded: u64,
    /// The listing could not be fetched to exhaustion.
    pub fetch_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub network: Network,
    pub created: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub errored: u64,
    pub discarded: u64,
    pub statuses: BTreeMap<DelegationState, StatusSummary>,
}

impl ReconcileSummary {
    fn new(network: Network) -> Self {
        Self {
            network,
            created: 0,
            updated: 0,
            unchanged: 0,
            errored: 0,
            discarded: 0,
            statuses: BTreeMap::new(),
        }
    }

    fn add(&mut self, status: DelegationState, s: StatusSummary) {
        self.created += s.created;
        self.updated += s.updated;
        self.unchanged += s.unchanged;
        self.errored += s.errored;
        self.discarded += s.discarded;
        self.statuses.insert(status, s);
    }
}

pub struct ReconciliationEngine {
    clients: HashMap<Network, Arc<dyn ChainClient>>,
    writer: Arc<DelegationWriter>,
    config: ReconcileConfig,
    run_state: RunState<ReconcileSummary>,
}

impl ReconciliationEngine {
    /// Fails with a configuration error when no network client is given.
    pub fn new(
        clients: Vec<Arc<dyn ChainClient>>,
        writer: Arc<DelegationWriter>,
        config: ReconcileConfig,
    ) -> Result<Self> {
        if clients.is_empty() {
            return Err(Error::Config(
                "reconciliation needs at least one network client".into(),
            ));
        }
        let clients = clients.into_iter().map(|c| (c.network(), c)).collect();
        Ok(Self {
            clients,
            writer,
            config,
            run_state: RunState::new(),
        })
    }

    pub fn networks(&self) -> Vec<Network> {
        let mut networks: Vec<Network> = self.clients.keys().copied().collect();
        networks.sort();
        networks
    }

    pub fn run_state(&self) -> RunSnapshot<ReconcileSummary> {
        self.run_state.snapshot()
    }

    /// One full pass over `network`. Returns `None` if a pass is already running.
    pub async fn reconcile(&self, network: Network) -> Result<Option<ReconcileSummary>> {
        let client = self
            .clients
            .get(&network)
            .ok_or_else(|| Error::Config(format!("network {} is not configured", network)))?;
        let Some(guard) = self.run_state.try_begin() else {
            tracing::info!(network = %network, "Reconciliation already running, skipping");
            return Ok(None);
        };

        metrics::counter!("reconcile_runs_total").increment(1);
        metrics::gauge!("reconcile_running").set(1.0);
        let started = Instant::now();

        let listings = join_all(
            DelegationState::ALL
                .iter()
                .map(|&status| self.fetch_status(&**client, status)),
        )
        .await;

        let mut summary = ReconcileSummary::new(network);
        for (status, listing) in DelegationState::ALL.into_iter().zip(listings) {
            let status_summary = self.apply_status(network, status, listing).await;
            tracing::info!(
                network = %network,
                status = %status,
                fetched = status_summary.fetched,
                created = status_summary.created,
                updated = status_summary.updated,
                unchanged = status_summary.unchanged,
                errored = status_summary.errored,
                discarded = status_summary.discarded,
                "Reconciled status"
            );
            summary.add(status, status_summary);
        }

        let elapsed = started.elapsed();
        metrics::histogram!("reconcile_duration_seconds").record(elapsed.as_secs_f64());
        metrics::gauge!("reconcile_running").set(0.0);
        for (outcome, count) in [
            ("created", summary.created),
            ("updated", summary.updated),
            ("unchanged", summary.unchanged),
            ("errored", summary.errored),
            ("discarded", summary.discarded),
        ] {
            metrics::counter!(
                "reconcile_delegations_total",
                "network" => network.as_str(),
                "outcome" => outcome
            )
            .increment(count);
        }
        tracing::info!(
            network = %network,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            errored = summary.errored,
            elapsed_ms = elapsed.as_millis() as u64,
            "Reconciliation complete"
        );

        guard.finish(summary.clone());
        Ok(Some(summary))
    }

    /// Page one status listing to exhaustion.
    ///
    /// On failure the records fetched so far are kept.
    async fn fetch_status(
        &self,
        client: &dyn ChainClient,
        status: DelegationState,
    ) -> (Vec<ChainDelegation>, Option<Error>) {
        let mut items = Vec::new();
        let mut page_key: Option<String> = None;
        let limit = self.config.page_limit;
        let what = format!("{} listing of {}", client.network(), status);

        loop {
            let key = page_key.clone();
            let page = self
                .config
                .retry
                .run(&what, move || {
                    let key = key.clone();
                    async move {
                        client
                            .list_delegations_by_status(status, key.as_deref(), limit)
                            .await
                    }
                })
                .await;
            match page {
                Ok(page) => {
                    items.extend(page.items);
                    match page.next_key {
                        Some(next) => page_key = Some(next),
                        None => return (items, None),
                    }
                }
                Err(e) => return (items, Some(e)),
            }
        }
    }

    async fn apply_status(
        &self,
        network: Network,
        status: DelegationState,
        (records, fetch_error): (Vec<ChainDelegation>, Option<Error>),
    ) -> StatusSummary {
        let mut summary = StatusSummary {
            fetched: records.len() as u64,
            ..Default::default()
        };
        if let Some(e) = fetch_error {
            metrics::counter!("reconcile_errors_total").increment(1);
            tracing::warn!(
                network = %network,
                status = %status,
                fetched = records.len(),
                "Listing fetch aborted: {}",
                e
            );
            summary.fetch_failed = true;
        }

        let codec = self.writer.codec().clone();
        let candidates: Vec<Delegation> = records
            .iter()
            .filter_map(
                |record| match delegation_from_chain(network, status, record, codec.as_ref()) {
                    Ok(d) => Some(d),
                    Err(reason) => {
                        tracing::warn!(
                            network = %network,
                            status = %status,
                            "Discarding chain record: {}",
                            reason
                        );
                        summary.discarded += 1;
                        None
                    }
                },
            )
            .collect();

        for batch in candidates.chunks(self.config.batch_size.max(1)) {
            let results = join_all(
                batch
                    .iter()
                    .map(|d| self.writer.observe(d.clone(), ExistingPolicy::AdoptState)),
            )
            .await;
            for (candidate, result) in batch.iter().zip(results) {
                match result {
                    Ok(WriteOutcome::Created) => summary.created += 1,
                    Ok(WriteOutcome::Updated) => summary.updated += 1,
                    Ok(WriteOutcome::Unchanged) | Ok(WriteOutcome::Skipped(_)) => {
                        summary.unchanged += 1
                    }
                    Err(e) => {
                        summary.errored += 1;
                        tracing::warn!(
                            network = %network,
                            txid = %candidate.staking_tx_id_hex,
                            "Reconcile write failed: {}",
                            e
                        );
                    }
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DelegationStore, StakerStore};
    use crate::testing::{self, FakeChainClient, StubTxCodec, chain_delegation, delegation};
    use serde_json::json;
    use staketrail_core::DelegationState::*;

    fn engine(client: FakeChainClient) -> (Arc<crate::store::SqliteStore>, Arc<FakeChainClient>, ReconciliationEngine) {
        let (store, writer) = testing::writer();
        let client = Arc::new(client);
        let config = ReconcileConfig {
            batch_size: 2,
            retry: RetryPolicy::immediate(3),
            ..Default::default()
        };
        let engine = ReconciliationEngine::new(vec![client.clone()], Arc::new(writer), config)
            .unwrap();
        (store, client, engine)
    }

    #[test]
    fn test_transform_amounts_and_ids() {
        let codec = StubTxCodec;
        let ok = chain_delegation("T1", "bbn1abc", json!("5000000000"), Active);
        let d = delegation_from_chain(Network::Mainnet, Active, &ok, &codec).unwrap();
        assert_eq!(d.staking_tx_id_hex, "T1");
        assert_eq!(d.total_sat, 5_000_000_000);
        assert_eq!(d.state, Active);

        let numeric = chain_delegation("T2", "bbn1abc", json!(42), Active);
        assert_eq!(
            delegation_from_chain(Network::Mainnet, Active, &numeric, &codec)
                .unwrap()
                .total_sat,
            42
        );

        for bad in [json!("-5"), json!(-5), json!("1.5"), json!(null), json!("abc")] {
            let record = chain_delegation("T3", "bbn1abc", bad, Active);
            assert!(delegation_from_chain(Network::Mainnet, Active, &record, &codec).is_err());
        }
    }

    #[test]
    fn test_requires_a_network() {
        let (_store, writer) = testing::writer();
        assert!(matches!(
            ReconciliationEngine::new(vec![], Arc::new(writer), ReconcileConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_state_drift_is_repaired() {
        let client = FakeChainClient::new(Network::Mainnet).with_listing(
            Active,
            vec![vec![chain_delegation("T1", "bbn1abc", json!("1000"), Active)]],
        );
        let (store, _client, engine) = engine(client);
        store
            .insert_delegation(&delegation("T1", "bbn1abc", 1_000, 100, Pending))
            .unwrap();

        let summary = engine.reconcile(Network::Mainnet).await.unwrap().unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.statuses[&Active].updated, 1);

        let d = store.get_delegation(Network::Mainnet, "T1").unwrap().unwrap();
        assert_eq!(d.state, Active);
    }

    #[tokio::test]
    async fn test_pages_followed_and_rows_created() {
        let page = |ids: &[&str]| {
            ids.iter()
                .map(|id| chain_delegation(id, "bbn1abc", json!("10"), Verified))
                .collect::<Vec<_>>()
        };
        let client = FakeChainClient::new(Network::Mainnet).with_listing(
            Verified,
            vec![page(&["A", "B"]), page(&["C"]), page(&["D", "E"])],
        );
        let (store, client, engine) = engine(client);

        let summary = engine.reconcile(Network::Mainnet).await.unwrap().unwrap();
        assert_eq!(summary.created, 5);
        assert_eq!(summary.statuses[&Verified].fetched, 5);
        assert_eq!(client.calls("list:VERIFIED"), 3);

        let staker = store.get_staker("bbn1abc").unwrap().unwrap();
        assert_eq!(staker.delegation_states.verified, 5);

        // Second pass: nothing left to do.
        let again = engine.reconcile(Network::Mainnet).await.unwrap().unwrap();
        assert_eq!((again.created, again.updated, again.unchanged), (0, 0, 5));
    }

    #[tokio::test]
    async fn test_transient_retried_and_fatal_isolated() {
        let client = FakeChainClient::new(Network::Mainnet)
            .with_listing(
                Active,
                vec![vec![chain_delegation("T1", "bbn1abc", json!("10"), Active)]],
            )
            .with_listing(
                Expired,
                vec![vec![chain_delegation("T2", "bbn1abc", json!("10"), Expired)]],
            );
        client.fail("list:ACTIVE", testing::timeout());
        client.fail("list:ACTIVE", testing::timeout());
        client.fail("list:EXPIRED", testing::bad_request());
        let (store, client, engine) = engine(client);

        let summary = engine.reconcile(Network::Mainnet).await.unwrap().unwrap();
        assert_eq!(client.calls("list:ACTIVE"), 3);
        assert_eq!(client.calls("list:EXPIRED"), 1);
        assert!(!summary.statuses[&Active].fetch_failed);
        assert!(summary.statuses[&Expired].fetch_failed);
        assert_eq!(summary.created, 1);
        assert!(store.get_delegation(Network::Mainnet, "T1").unwrap().is_some());
        assert!(store.get_delegation(Network::Mainnet, "T2").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_records_are_discarded() {
        let client = FakeChainClient::new(Network::Mainnet).with_listing(
            Pending,
            vec![vec![
                chain_delegation("T1", "bbn1abc", json!("oops"), Pending),
                chain_delegation("T2", "bbn1abc", json!("7"), Pending),
            ]],
        );
        let (_store, _client, engine) = engine(client);

        let summary = engine.reconcile(Network::Mainnet).await.unwrap().unwrap();
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn test_unknown_network_and_run_state() {
        let (_store, _client, engine) = engine(FakeChainClient::new(Network::Mainnet));
        assert!(matches!(
            engine.reconcile(Network::Testnet).await,
            Err(Error::Config(_))
        ));

        engine.reconcile(Network::Mainnet).await.unwrap().unwrap();
        let snapshot = engine.run_state();
        assert!(!snapshot.running);
        assert_eq!(snapshot.last.unwrap().result.network, Network::Mainnet);
        assert_eq!(engine.networks(), vec![Network::Mainnet]);
    }
}
