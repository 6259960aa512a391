//! Chain event classification.
//!
//! Raw `{type, attributes}` sub-events are decoded once into the closed set of
//! [`DelegationEvent`] variants. Handlers never look at attribute lists.

mod attributes;
mod classify;

use staketrail_core::DelegationState;

use crate::chain::RawEvent;

pub use attributes::{Attributes, unwrap_value};
pub use classify::{BatchContext, Classified, classify};

/// Sub-event type prefix of the btcstaking module.
pub const BTCSTAKING_EVENT_PREFIX: &str = "babylon.btcstaking.v1.";

/// Whether a sub-event belongs to the delegation domain: a btcstaking module
/// event, or a `message` event (carries the tx sender).
pub fn is_delegation_domain(event: &RawEvent) -> bool {
    event.kind == "message" || event.kind.contains("btcstaking")
}

/// A batch of sub-events delivered together (one tx, or one block's
/// finalize events), with optional provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub height: Option<u64>,
    pub tx_hash: Option<String>,
    pub events: Vec<RawEvent>,
}

impl EventBatch {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn at_height(mut self, height: u64) -> Self {
        self.height = Some(height);
        self
    }
}

/// Fields of a delegation creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEvent {
    pub staking_tx_hex: String,
    pub staker_address: String,
    pub staker_btc_pk_hex: String,
    pub finality_provider_btc_pks_hex: Vec<String>,
    pub staking_time: u64,
    pub unbonding_time: u64,
    /// Falls back to the codec's staking output amount when absent.
    pub total_sat: Option<u64>,
    pub unbonding_tx_hex: Option<String>,
    pub params_version: Option<u32>,
}

/// A state change addressed to an existing delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdateEvent {
    pub staking_tx_id_hex: String,
    pub new_state: DelegationState,
    pub start_height: Option<u64>,
    pub end_height: Option<u64>,
    pub unbonding_tx_hex: Option<String>,
}

/// Typed delegation-domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationEvent {
    Created(CreatedEvent),
    StateUpdate(StateUpdateEvent),
    /// Applied only to delegations that are still `PENDING`.
    QuorumReached(StateUpdateEvent),
    /// Always carries both heights.
    InclusionProof(StateUpdateEvent),
    EarlyUnbonding(StateUpdateEvent),
    Expired(StateUpdateEvent),
    /// Informational; audited but never mutates state.
    CovenantSignature { staking_tx_id_hex: Option<String> },
}

impl DelegationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::StateUpdate(_) => "state_update",
            Self::QuorumReached(_) => "quorum_reached",
            Self::InclusionProof(_) => "inclusion_proof",
            Self::EarlyUnbonding(_) => "early_unbonding",
            Self::Expired(_) => "expired",
            Self::CovenantSignature { .. } => "covenant_signature",
        }
    }
}
