//! Test fixtures: delegation builders, a scripted chain, and a stub codec.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use staketrail_core::{Delegation, DelegationState, Network};

use crate::chain::{
    BlockResults, ChainClient, ChainDelegation, DelegationPage, RawEvent, TxResult,
};
use crate::codec::TxCodec;
use crate::lifecycle::DelegationWriter;
use crate::stakers::StakerAggregateEngine;
use crate::store::SqliteStore;
use crate::{Error, Result};

/// Segwit tx spending a P2WPKH input (pubkey = secp256k1 generator) into a
/// 50 BTC taproot output.
pub(crate) const P2WPKH_TX_HEX: &str = "0200000000010111111111111111111111111111111111111111111111111111111111111111110000000000ffffffff0100f2052a01000000225120222222222222222222222222222222222222222222222222222222222222222202473030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030303030210279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f8179800000000";
pub(crate) const P2WPKH_TXID: &str =
    "e449cc310c73dfe87125608e87a1b88e5ae2c099d18c15ebac97dfdc3abecac2";

/// Mainnet delegation toward `fp-a` whose raw tx hex is `raw-{txid}`.
pub(crate) fn delegation(
    txid: &str,
    staker: &str,
    total_sat: u64,
    staking_time: u64,
    state: DelegationState,
) -> Delegation {
    Delegation {
        staking_tx_hex: format!("raw-{}", txid),
        staking_tx_id_hex: txid.to_string(),
        network: Network::Mainnet,
        staker_address: staker.to_string(),
        staker_btc_address: None,
        staker_btc_pk_hex: "staker-pk".to_string(),
        finality_provider_btc_pks_hex: vec!["fp-a".to_string()],
        total_sat,
        staking_time,
        unbonding_time: 1_008,
        start_height: 0,
        end_height: 0,
        block_height: 0,
        tx_hash: None,
        unbonding_tx_hex: None,
        unbonding_tx_id_hex: None,
        spend_stake_tx_hex: None,
        spend_stake_tx_id_hex: None,
        state,
        params_version: None,
    }
}

/// Codec for opaque fixtures: `raw-{id}` has txid `{id}`, anything else
/// `id-{hex}`. No amounts or addresses.
pub(crate) struct StubTxCodec;

impl TxCodec for StubTxCodec {
    fn txid(&self, raw_hex: &str) -> Result<String> {
        if raw_hex.is_empty() {
            return Err(Error::ChainResponse("empty tx".into()));
        }
        Ok(raw_hex
            .strip_prefix("raw-")
            .map(String::from)
            .unwrap_or_else(|| format!("id-{}", raw_hex)))
    }

    fn sender_address(&self, _raw_hex: &str, _network: Network) -> Option<String> {
        None
    }

    fn amount(&self, _raw_hex: &str) -> Option<u64> {
        None
    }
}

pub(crate) fn writer_with_codec(codec: Arc<dyn TxCodec>) -> (Arc<SqliteStore>, DelegationWriter) {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let stakers = Arc::new(
        StakerAggregateEngine::new(store.clone(), store.clone())
            .with_conflict_backoff(std::time::Duration::ZERO),
    );
    let writer = DelegationWriter::new(store.clone(), stakers, codec);
    (store, writer)
}

pub(crate) fn writer() -> (Arc<SqliteStore>, DelegationWriter) {
    writer_with_codec(Arc::new(StubTxCodec))
}

/// Chain-side record for a fixture delegation (`raw-{txid}` hex).
pub(crate) fn chain_delegation(
    txid: &str,
    staker: &str,
    total_sat: serde_json::Value,
    status: DelegationState,
) -> ChainDelegation {
    ChainDelegation {
        staker_addr: staker.to_string(),
        btc_pk: "staker-pk".to_string(),
        fp_btc_pk_list: vec!["fp-a".to_string()],
        start_height: 0,
        end_height: 0,
        total_sat,
        staking_time: 100,
        unbonding_time: 1_008,
        staking_tx_hex: format!("raw-{}", txid),
        params_version: None,
        status_desc: status.as_str().to_string(),
        undelegation_response: None,
    }
}

pub(crate) fn tx_result(code: u32, events: Vec<RawEvent>) -> TxResult {
    TxResult { code, events }
}

/// Scripted [`ChainClient`].
///
/// Failures are queued per operation key (`list:ACTIVE`, `get:{txid}`,
/// `block:{height}`, `height`) and returned before the scripted answer.
pub(crate) struct FakeChainClient {
    network: Network,
    listings: Mutex<HashMap<DelegationState, Vec<Vec<ChainDelegation>>>>,
    delegations: Mutex<HashMap<String, ChainDelegation>>,
    blocks: Mutex<HashMap<u64, BlockResults>>,
    height: AtomicU64,
    failures: Mutex<HashMap<String, VecDeque<Error>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeChainClient {
    pub(crate) fn new(network: Network) -> Self {
        Self {
            network,
            listings: Mutex::new(HashMap::new()),
            delegations: Mutex::new(HashMap::new()),
            blocks: Mutex::new(HashMap::new()),
            height: AtomicU64::new(0),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Listing for `status`, one inner vec per page.
    pub(crate) fn with_listing(self, status: DelegationState, pages: Vec<Vec<ChainDelegation>>) -> Self {
        self.listings.lock().insert(status, pages);
        self
    }

    pub(crate) fn with_delegation(self, txid: &str, delegation: ChainDelegation) -> Self {
        self.delegations.lock().insert(txid.to_string(), delegation);
        self
    }

    pub(crate) fn with_block(self, results: BlockResults) -> Self {
        self.blocks.lock().insert(results.height, results);
        self
    }

    pub(crate) fn with_height(self, height: u64) -> Self {
        self.height.store(height, Ordering::SeqCst);
        self
    }

    pub(crate) fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub(crate) fn fail(&self, op: &str, error: Error) {
        self.failures
            .lock()
            .entry(op.to_string())
            .or_default()
            .push_back(error);
    }

    pub(crate) fn calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn enter(&self, op: String) -> Result<()> {
        self.calls.lock().push(op.clone());
        match self.failures.lock().get_mut(&op).and_then(VecDeque::pop_front) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub(crate) fn timeout() -> Error {
    Error::Timeout("scripted".into())
}

pub(crate) fn bad_request() -> Error {
    Error::ChainStatus {
        status: 400,
        url: "http://fake".into(),
        body: "bad request".into(),
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    fn network(&self) -> Network {
        self.network
    }

    fn base_url(&self) -> &str {
        "http://fake-rest"
    }

    fn rpc_url(&self) -> &str {
        "http://fake-rpc"
    }

    async fn list_delegations_by_status(
        &self,
        status: DelegationState,
        page_key: Option<&str>,
        _page_limit: u32,
    ) -> Result<DelegationPage> {
        self.enter(format!("list:{}", status))?;
        let index = match page_key {
            None => 0,
            Some(key) => key
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| Error::ChainResponse(format!("bad page key {}", key)))?,
        };
        let listings = self.listings.lock();
        let pages = listings.get(&status).map(Vec::as_slice).unwrap_or(&[]);
        Ok(DelegationPage {
            items: pages.get(index).cloned().unwrap_or_default(),
            next_key: (index + 1 < pages.len()).then(|| format!("page-{}", index + 1)),
        })
    }

    async fn get_delegation(&self, staking_tx_id_hex: &str) -> Result<Option<ChainDelegation>> {
        self.enter(format!("get:{}", staking_tx_id_hex))?;
        Ok(self.delegations.lock().get(staking_tx_id_hex).cloned())
    }

    async fn get_block_results(&self, height: u64) -> Result<BlockResults> {
        self.enter(format!("block:{}", height))?;
        Ok(self.blocks.lock().get(&height).cloned().unwrap_or(BlockResults {
            height,
            ..Default::default()
        }))
    }

    async fn get_current_height(&self) -> Result<u64> {
        self.enter("height".to_string())?;
        Ok(self.height.load(Ordering::SeqCst))
    }
}
