//! The delegation record: one BTC staking position, keyed by its staking txid.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, PHASE2_PARAMS_VERSION};

/// Network a delegation was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// All networks, in a stable order.
    pub const ALL: [Network; 2] = [Network::Mainnet, Network::Testnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }

    /// Single-byte tag used in binary keys.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Mainnet => 0,
            Self::Testnet => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Mainnet),
            1 => Some(Self::Testnet),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            other => Err(Error::InvalidField {
                field: "network",
                reason: format!("unknown network '{}'", other),
            }),
        }
    }
}

/// Lifecycle state of a delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DelegationState {
    Pending,
    Verified,
    Active,
    Unbonded,
    Expired,
}

impl DelegationState {
    /// Every state the chain can list delegations by.
    pub const ALL: [DelegationState; 5] = [
        DelegationState::Pending,
        DelegationState::Verified,
        DelegationState::Active,
        DelegationState::Unbonded,
        DelegationState::Expired,
    ];

    /// States a delegation can sit in while waiting for a chain event.
    pub const TRANSIENT: [DelegationState; 2] =
        [DelegationState::Pending, DelegationState::Verified];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Active => "ACTIVE",
            Self::Unbonded => "UNBONDED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_transient(&self) -> bool {
        Self::TRANSIENT.contains(self)
    }
}

impl fmt::Display for DelegationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DelegationState {
    type Err = Error;

    /// Parses chain spellings: `ACTIVE`, `active`, and the proto enum form
    /// `BTC_DELEGATION_STATUS_ACTIVE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper
            .strip_prefix("BTC_DELEGATION_STATUS_")
            .unwrap_or(upper.as_str());
        match name {
            "PENDING" => Ok(Self::Pending),
            "VERIFIED" => Ok(Self::Verified),
            "ACTIVE" => Ok(Self::Active),
            "UNBONDED" => Ok(Self::Unbonded),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(Error::InvalidField {
                field: "state",
                reason: format!("unknown delegation state '{}'", s),
            }),
        }
    }
}

/// Phase bucket for a params version (1 when absent or below the phase 2 boundary).
pub fn phase_for_params_version(params_version: Option<u32>) -> u8 {
    match params_version {
        Some(v) if v >= PHASE2_PARAMS_VERSION => 2,
        _ => 1,
    }
}

/// Mirror record of one staking transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub staking_tx_hex: String,
    pub staking_tx_id_hex: String,
    pub network: Network,

    pub staker_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staker_btc_address: Option<String>,
    pub staker_btc_pk_hex: String,
    pub finality_provider_btc_pks_hex: Vec<String>,

    /// Staked amount in satoshis.
    pub total_sat: u64,
    pub staking_time: u64,
    pub unbonding_time: u64,

    /// BTC height the stake becomes active (0 until known).
    pub start_height: u64,
    /// BTC height the stake expires (0 until known).
    pub end_height: u64,
    /// Height of the chain transaction that created the delegation.
    pub block_height: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unbonding_tx_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unbonding_tx_id_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_stake_tx_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_stake_tx_id_hex: Option<String>,

    pub state: DelegationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_version: Option<u32>,
}

impl Delegation {
    pub fn phase(&self) -> u8 {
        phase_for_params_version(self.params_version)
    }

    /// The finality provider this delegation is accounted under.
    pub fn primary_finality_provider(&self) -> Option<&str> {
        self.finality_provider_btc_pks_hex
            .first()
            .map(String::as_str)
            .filter(|pk| !pk.is_empty())
    }
}
