//! Per-staker aggregate document.
//!
//! A [`Staker`] row holds rollups over every delegation belonging to one
//! staker address. The counters are maintained incrementally on every
//! delegation change and can be rebuilt from scratch from the delegation
//! set; both paths share the accessors defined here.

use serde::{Deserialize, Serialize};

use crate::{DelegationState, Network};

/// Delegation count per lifecycle state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: u64,
    pub verified: u64,
    pub active: u64,
    pub unbonded: u64,
    pub expired: u64,
}

impl StateCounts {
    pub fn get(&self, state: DelegationState) -> u64 {
        match state {
            DelegationState::Pending => self.pending,
            DelegationState::Verified => self.verified,
            DelegationState::Active => self.active,
            DelegationState::Unbonded => self.unbonded,
            DelegationState::Expired => self.expired,
        }
    }

    fn slot(&mut self, state: DelegationState) -> &mut u64 {
        match state {
            DelegationState::Pending => &mut self.pending,
            DelegationState::Verified => &mut self.verified,
            DelegationState::Active => &mut self.active,
            DelegationState::Unbonded => &mut self.unbonded,
            DelegationState::Expired => &mut self.expired,
        }
    }

    pub fn increment(&mut self, state: DelegationState) {
        *self.slot(state) += 1;
    }

    pub fn decrement(&mut self, state: DelegationState) {
        let slot = self.slot(state);
        *slot = slot.saturating_sub(1);
    }

    pub fn total(&self) -> u64 {
        self.pending + self.verified + self.active + self.unbonded + self.expired
    }
}

/// The four counters every rollup scope carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_delegations: u64,
    pub active_delegations: u64,
    pub total_staked_sat: u64,
    pub active_staked_sat: u64,
}

/// Per-network sub-rollups of a staker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRollups {
    pub mainnet: NetworkStats,
    pub testnet: NetworkStats,
}

impl NetworkRollups {
    pub fn get(&self, network: Network) -> &NetworkStats {
        match network {
            Network::Mainnet => &self.mainnet,
            Network::Testnet => &self.testnet,
        }
    }

    pub fn get_mut(&mut self, network: Network) -> &mut NetworkStats {
        match network {
            Network::Mainnet => &mut self.mainnet,
            Network::Testnet => &mut self.testnet,
        }
    }

    pub fn total_delegations(&self) -> u64 {
        self.mainnet.total_delegations + self.testnet.total_delegations
    }
}

/// Rollup of one staker's delegations toward one finality provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityProviderStats {
    pub finality_provider_btc_pk_hex: String,
    pub delegations_count: u64,
    pub total_staked_sat: u64,
    pub active_delegations_count: u64,
    pub active_staked_sat: u64,
}

/// Totals for one phase, with a finality provider rollup scoped to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub phase: u8,
    pub total_delegations: u64,
    pub active_delegations: u64,
    pub total_staked_sat: u64,
    pub active_staked_sat: u64,
    pub finality_providers: Vec<FinalityProviderStats>,
}

/// Denormalized projection of a delegation inside its staker document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerDelegation {
    pub staking_tx_id_hex: String,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finality_provider_btc_pk_hex: Option<String>,
    pub total_sat: u64,
    pub staking_time: u64,
    pub state: DelegationState,
    pub phase: u8,
}

/// Aggregate document for one staker address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staker {
    pub staker_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staker_btc_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staker_btc_pk_hex: Option<String>,

    pub total_delegations_count: u64,
    pub active_delegations_count: u64,
    pub total_staked_sat: u64,
    pub active_staked_sat: u64,
    pub delegation_states: StateCounts,
    pub networks: NetworkRollups,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_staking_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_staking_time: Option<u64>,

    pub phase_stats: Vec<PhaseStats>,
    pub unique_finality_providers: Vec<FinalityProviderStats>,
    pub delegations: Vec<StakerDelegation>,
    pub recent_delegations: Vec<StakerDelegation>,

    /// Optimistic concurrency version; owned by the store, not the document.
    #[serde(skip)]
    pub version: u64,
}

impl Staker {
    pub fn new(staker_address: impl Into<String>) -> Self {
        Self {
            staker_address: staker_address.into(),
            ..Default::default()
        }
    }

    /// Clear every rollup while keeping identity fields and version.
    pub fn reset_rollups(&mut self) {
        *self = Self {
            staker_address: std::mem::take(&mut self.staker_address),
            staker_btc_address: self.staker_btc_address.take(),
            staker_btc_pk_hex: self.staker_btc_pk_hex.take(),
            version: self.version,
            ..Default::default()
        };
    }

    pub fn delegation(&self, network: Network, staking_tx_id_hex: &str) -> Option<&StakerDelegation> {
        self.delegations
            .iter()
            .find(|d| d.network == network && d.staking_tx_id_hex == staking_tx_id_hex)
    }

    pub fn delegation_mut(
        &mut self,
        network: Network,
        staking_tx_id_hex: &str,
    ) -> Option<&mut StakerDelegation> {
        self.delegations
            .iter_mut()
            .find(|d| d.network == network && d.staking_tx_id_hex == staking_tx_id_hex)
    }

    /// Phase rollup for `phase`, inserted in phase order if missing.
    pub fn phase_mut(&mut self, phase: u8) -> &mut PhaseStats {
        let idx = match self.phase_stats.binary_search_by_key(&phase, |p| p.phase) {
            Ok(idx) => idx,
            Err(idx) => {
                self.phase_stats.insert(
                    idx,
                    PhaseStats {
                        phase,
                        ..Default::default()
                    },
                );
                idx
            }
        };
        &mut self.phase_stats[idx]
    }

    /// Global finality provider rollup for `pk`, inserted in key order if missing.
    pub fn finality_provider_mut(&mut self, pk: &str) -> &mut FinalityProviderStats {
        finality_provider_entry(&mut self.unique_finality_providers, pk)
    }

    /// Widen the first/last staking time bounds to include `staking_time`.
    pub fn extend_staking_time(&mut self, staking_time: u64) {
        self.first_staking_time = Some(
            self.first_staking_time
                .map_or(staking_time, |t| t.min(staking_time)),
        );
        self.last_staking_time = Some(
            self.last_staking_time
                .map_or(staking_time, |t| t.max(staking_time)),
        );
    }

    /// Recompute the staking time bounds from `delegations[]`.
    ///
    /// [`extend_staking_time`](Self::extend_staking_time) only widens, so a
    /// delegation whose staking time moved needs this to narrow them again.
    pub fn recompute_staking_time_bounds(&mut self) {
        self.first_staking_time = self.delegations.iter().map(|d| d.staking_time).min();
        self.last_staking_time = self.delegations.iter().map(|d| d.staking_time).max();
    }
}

impl PhaseStats {
    pub fn finality_provider_mut(&mut self, pk: &str) -> &mut FinalityProviderStats {
        finality_provider_entry(&mut self.finality_providers, pk)
    }
}

fn finality_provider_entry<'a>(
    entries: &'a mut Vec<FinalityProviderStats>,
    pk: &str,
) -> &'a mut FinalityProviderStats {
    let idx = match entries
        .binary_search_by(|e| e.finality_provider_btc_pk_hex.as_str().cmp(pk))
    {
        Ok(idx) => idx,
        Err(idx) => {
            entries.insert(
                idx,
                FinalityProviderStats {
                    finality_provider_btc_pk_hex: pk.to_string(),
                    ..Default::default()
                },
            );
            idx
        }
    };
    &mut entries[idx]
}
