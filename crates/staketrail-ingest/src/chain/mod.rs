//! Source chain access.
//!
//! [`ChainClient`] is bound to one network and exposes the four queries the
//! ingestion paths need. The wire types mirror the chain's REST and RPC JSON
//! closely; mapping them into mirror records happens elsewhere.

mod de;
mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use staketrail_core::{DelegationState, Network};

use crate::Result;

pub use http::HttpChainClient;

/// Default page size for delegation listings.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

/// One `{key, value}` attribute of a chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default, deserialize_with = "de::string_or_null")]
    pub value: String,
}

/// A typed chain event: a type string plus a flat attribute list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub attributes: Vec<EventAttribute>,
}

impl RawEvent {
    pub fn new(kind: impl Into<String>, attributes: &[(&str, &str)]) -> Self {
        Self {
            kind: kind.into(),
            attributes: attributes
                .iter()
                .map(|(k, v)| EventAttribute {
                    key: (*k).to_string(),
                    value: (*v).to_string(),
                })
                .collect(),
        }
    }

    /// Raw value of the first attribute named `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Result of executing one transaction in a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub events: Vec<RawEvent>,
}

impl TxResult {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }
}

/// Execution results of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BlockResults {
    #[serde(deserialize_with = "de::u64_lenient")]
    pub height: u64,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub txs_results: Vec<TxResult>,
    /// Events emitted outside transactions (e.g. expiry at block end).
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub finalize_block_events: Vec<RawEvent>,
}

/// Unbonding details attached to a delegation by the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChainUndelegation {
    #[serde(default)]
    pub unbonding_tx_hex: Option<String>,
}

/// Delegation as reported by the chain's btcstaking REST module.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChainDelegation {
    #[serde(default)]
    pub staker_addr: String,
    #[serde(default)]
    pub btc_pk: String,
    #[serde(default, deserialize_with = "de::vec_or_null")]
    pub fp_btc_pk_list: Vec<String>,
    #[serde(default, deserialize_with = "de::u64_lenient")]
    pub start_height: u64,
    #[serde(default, deserialize_with = "de::u64_lenient")]
    pub end_height: u64,
    /// String or number on the wire; parsed by the mirror transform.
    #[serde(default)]
    pub total_sat: serde_json::Value,
    #[serde(default, deserialize_with = "de::u64_lenient")]
    pub staking_time: u64,
    #[serde(default, deserialize_with = "de::u64_lenient")]
    pub unbonding_time: u64,
    #[serde(default)]
    pub staking_tx_hex: String,
    #[serde(default, deserialize_with = "de::opt_u32_lenient")]
    pub params_version: Option<u32>,
    #[serde(default)]
    pub status_desc: String,
    #[serde(default, alias = "btc_undelegation")]
    pub undelegation_response: Option<ChainUndelegation>,
}

/// One page of a delegation listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelegationPage {
    pub items: Vec<ChainDelegation>,
    /// Cursor for the next page; `None` when exhausted.
    pub next_key: Option<String>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Network this client is bound to.
    fn network(&self) -> Network;

    /// REST base URL.
    fn base_url(&self) -> &str;

    /// RPC base URL.
    fn rpc_url(&self) -> &str;

    async fn list_delegations_by_status(
        &self,
        status: DelegationState,
        page_key: Option<&str>,
        page_limit: u32,
    ) -> Result<DelegationPage>;

    /// Single delegation by staking txid; `None` when the chain doesn't know it.
    async fn get_delegation(&self, staking_tx_id_hex: &str) -> Result<Option<ChainDelegation>>;

    async fn get_block_results(&self, height: u64) -> Result<BlockResults>;

    async fn get_current_height(&self) -> Result<u64>;
}
