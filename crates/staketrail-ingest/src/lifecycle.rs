//! The delegation write path shared by every ingestion source.
//!
//! Live events, reconciliation, and the crawler all mutate delegations
//! through [`DelegationWriter`], so the ingestion paths cannot diverge. Each
//! successful write is folded into the owning staker's aggregate.

use std::fmt;
use std::sync::Arc;

use staketrail_core::{Delegation, DelegationState, Network};

use crate::Result;
use crate::codec::TxCodec;
use crate::stakers::StakerAggregateEngine;
use crate::store::DelegationStore;

/// How [`DelegationWriter::observe`] treats a row that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingPolicy {
    /// Leave the stored row untouched.
    Keep,
    /// Take the candidate's state when it differs.
    AdoptState,
    /// Take the candidate's state and its known (non-zero) heights.
    AdoptStateAndHeights,
}

/// A state update addressed to an existing delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub new_state: DelegationState,
    pub start_height: Option<u64>,
    pub end_height: Option<u64>,
    /// Apply only if the stored state equals this one.
    pub only_if: Option<DelegationState>,
    pub unbonding_tx_hex: Option<String>,
}

impl StateChange {
    pub fn to(new_state: DelegationState) -> Self {
        Self {
            new_state,
            start_height: None,
            end_height: None,
            only_if: None,
            unbonding_tx_hex: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnknownDelegation,
    /// The `only_if` guard did not hold.
    StateGuard { current: DelegationState },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownDelegation => f.write_str("unknown delegation"),
            Self::StateGuard { current } => write!(f, "guarded, current state {}", current),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
    Skipped(SkipReason),
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped(_) => "skipped",
        }
    }
}

pub struct DelegationWriter {
    store: Arc<dyn DelegationStore>,
    stakers: Arc<StakerAggregateEngine>,
    codec: Arc<dyn TxCodec>,
}

impl DelegationWriter {
    pub fn new(
        store: Arc<dyn DelegationStore>,
        stakers: Arc<StakerAggregateEngine>,
        codec: Arc<dyn TxCodec>,
    ) -> Self {
        Self {
            store,
            stakers,
            codec,
        }
    }

    pub fn store(&self) -> &Arc<dyn DelegationStore> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<dyn TxCodec> {
        &self.codec
    }

    /// Create-if-absent by `(staking tx hex or txid, network)`.
    pub async fn observe(
        &self,
        candidate: Delegation,
        policy: ExistingPolicy,
    ) -> Result<WriteOutcome> {
        let existing = self.store.find_delegation(
            candidate.network,
            &candidate.staking_tx_hex,
            &candidate.staking_tx_id_hex,
        )?;

        let Some(existing) = existing else {
            if !self.store.insert_delegation(&candidate)? {
                // Lost an insert race to an identical key.
                return Ok(WriteOutcome::Unchanged);
            }
            tracing::debug!(
                network = %candidate.network,
                txid = %candidate.staking_tx_id_hex,
                state = %candidate.state,
                "Delegation created"
            );
            self.notify(&candidate).await;
            return Ok(WriteOutcome::Created);
        };

        let mut next = existing.clone();
        match policy {
            ExistingPolicy::Keep => return Ok(WriteOutcome::Unchanged),
            ExistingPolicy::AdoptState => next.state = candidate.state,
            ExistingPolicy::AdoptStateAndHeights => {
                next.state = candidate.state;
                if candidate.start_height > 0 {
                    next.start_height = candidate.start_height;
                }
                if candidate.end_height > 0 {
                    next.end_height = candidate.end_height;
                }
            }
        }
        self.replace(&existing, next).await
    }

    /// Apply a state change to an existing delegation.
    pub async fn transition(
        &self,
        network: Network,
        staking_tx_id_hex: &str,
        change: StateChange,
    ) -> Result<WriteOutcome> {
        let Some(existing) = self.store.get_delegation(network, staking_tx_id_hex)? else {
            return Ok(WriteOutcome::Skipped(SkipReason::UnknownDelegation));
        };

        if let Some(required) = change.only_if {
            if existing.state != required {
                return Ok(WriteOutcome::Skipped(SkipReason::StateGuard {
                    current: existing.state,
                }));
            }
        }

        let mut next = existing.clone();
        next.state = change.new_state;
        if let Some(height) = change.start_height {
            next.start_height = height;
        }
        if let Some(height) = change.end_height {
            next.end_height = height;
        }
        if let Some(hex) = change.unbonding_tx_hex {
            next.unbonding_tx_id_hex = self.codec.txid(&hex).ok();
            next.unbonding_tx_hex = Some(hex);
        }
        self.replace(&existing, next).await
    }

    async fn replace(&self, existing: &Delegation, next: Delegation) -> Result<WriteOutcome> {
        if &next == existing {
            return Ok(WriteOutcome::Unchanged);
        }
        if !self.store.update_delegation(&next)? {
            return Ok(WriteOutcome::Skipped(SkipReason::UnknownDelegation));
        }
        tracing::debug!(
            network = %next.network,
            txid = %next.staking_tx_id_hex,
            from = %existing.state,
            to = %next.state,
            "Delegation updated"
        );
        self.notify(&next).await;
        Ok(WriteOutcome::Updated)
    }

    async fn notify(&self, delegation: &Delegation) {
        if let Err(e) = self.stakers.on_delegation_changed(delegation).await {
            tracing::warn!(
                staker = %delegation.staker_address,
                txid = %delegation.staking_tx_id_hex,
                "Staker update failed, left for recalculation: {}",
                e
            );
        }
    }
}
