//! Persistence boundary.
//!
//! The ingestion paths see three narrow traits; [`SqliteStore`] implements all
//! of them on one database. Delegation writes are idempotent by key, staker
//! writes carry an optimistic concurrency version.

mod schema;
mod sqlite;

use std::fmt;
use std::str::FromStr;

use staketrail_core::{Delegation, DelegationState, Network, Staker};

use crate::{Error, Result};

pub use sqlite::SqliteStore;

/// Sort direction for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(Error::Config(format!("unknown sort order '{}'", other))),
        }
    }
}

macro_rules! sort_fields {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $column:literal, $snake:literal, $camel:literal;)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Indexed column backing this field.
            pub(crate) fn column(&self) -> &'static str {
                match self {
                    $(Self::$variant => $column,)+
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $snake,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            /// Accepts the snake_case and camelCase spellings only.
            fn from_str(s: &str) -> Result<Self> {
                match s.trim() {
                    $($snake | $camel => Ok(Self::$variant),)+
                    other => Err(Error::Config(format!(
                        "'{}' is not a sortable field",
                        other
                    ))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

sort_fields! {
    /// Allow-listed sort keys for delegation listings.
    DelegationSortField {
        StakingTime => "staking_time", "staking_time", "stakingTime";
        TotalSat => "total_sat", "total_sat", "totalSat";
        StartHeight => "start_height", "start_height", "startHeight";
        BlockHeight => "block_height", "block_height", "blockHeight";
        StakingTxId => "staking_tx_id_hex", "staking_tx_id_hex", "stakingTxIdHex";
    }
}

sort_fields! {
    /// Allow-listed sort keys for staker listings.
    StakerSortField {
        TotalStakedSat => "total_staked_sat", "total_staked_sat", "totalStakedSat";
        ActiveStakedSat => "active_staked_sat", "active_staked_sat", "activeStakedSat";
        TotalDelegations => "total_delegations_count", "total_delegations_count", "totalDelegationsCount";
        ActiveDelegations => "active_delegations_count", "active_delegations_count", "activeDelegationsCount";
        LastStakingTime => "last_staking_time", "last_staking_time", "lastStakingTime";
        Address => "staker_address", "staker_address", "stakerAddress";
    }
}

/// Filter, sort, and window for delegation listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationQuery {
    pub network: Option<Network>,
    /// Empty means any state.
    pub states: Vec<DelegationState>,
    pub staker_address: Option<String>,
    /// Matches the delegation's first finality provider.
    pub finality_provider: Option<String>,
    pub sort: DelegationSortField,
    pub order: SortOrder,
    pub offset: u64,
    pub limit: u64,
}

impl Default for DelegationQuery {
    fn default() -> Self {
        Self {
            network: None,
            states: Vec::new(),
            staker_address: None,
            finality_provider: None,
            sort: DelegationSortField::StakingTime,
            order: SortOrder::Desc,
            offset: 0,
            limit: 50,
        }
    }
}

/// Sort and window for staker listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakerQuery {
    pub sort: StakerSortField,
    pub order: SortOrder,
    pub offset: u64,
    pub limit: u64,
}

impl Default for StakerQuery {
    fn default() -> Self {
        Self {
            sort: StakerSortField::TotalStakedSat,
            order: SortOrder::Desc,
            offset: 0,
            limit: 50,
        }
    }
}

/// A window of results plus the unwindowed match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Aggregate staker totals, optionally scoped to one network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakerTotals {
    /// Stakers with at least one delegation in scope.
    pub staker_count: u64,
    pub total_staked_sat: u64,
    pub active_staked_sat: u64,
}

pub trait DelegationStore: Send + Sync {
    fn get_delegation(&self, network: Network, staking_tx_id_hex: &str)
    -> Result<Option<Delegation>>;

    /// Lookup by raw staking tx hex or by txid.
    fn find_delegation(
        &self,
        network: Network,
        staking_tx_hex: &str,
        staking_tx_id_hex: &str,
    ) -> Result<Option<Delegation>>;

    /// Insert unless a row with the same key exists. Returns whether it was inserted.
    fn insert_delegation(&self, delegation: &Delegation) -> Result<bool>;

    /// Replace an existing row. Returns `false` if there was no row to replace.
    fn update_delegation(&self, delegation: &Delegation) -> Result<bool>;

    /// Every delegation of a staker across networks, in insertion order.
    fn delegations_by_staker(&self, staker_address: &str) -> Result<Vec<Delegation>>;

    /// Distinct staker addresses owning at least one delegation, ascending,
    /// strictly after `after`.
    fn delegation_staker_addresses(&self, after: Option<&str>, limit: u64) -> Result<Vec<String>>;

    fn list_delegations(&self, query: &DelegationQuery) -> Result<Page<Delegation>>;

    fn delegations_by_finality_provider(
        &self,
        finality_provider_btc_pk_hex: &str,
        query: &DelegationQuery,
    ) -> Result<Page<Delegation>> {
        let query = DelegationQuery {
            finality_provider: Some(finality_provider_btc_pk_hex.to_string()),
            ..query.clone()
        };
        self.list_delegations(&query)
    }
}

pub trait StakerStore: Send + Sync {
    /// Load a staker with its current version.
    fn get_staker(&self, staker_address: &str) -> Result<Option<Staker>>;

    /// Save if the stored version equals `expected` (0 means the row must not
    /// exist yet). Returns the new version.
    fn save_staker(&self, staker: &Staker, expected: u64) -> Result<u64>;

    /// Staker addresses in ascending order, strictly after `after`.
    fn staker_addresses(&self, after: Option<&str>, limit: u64) -> Result<Vec<String>>;

    fn list_stakers(&self, query: &StakerQuery) -> Result<Page<Staker>>;

    fn staker_totals(&self, network: Option<Network>) -> Result<StakerTotals>;
}

pub trait CheckpointStore: Send + Sync {
    fn get_checkpoint(&self, key: &str) -> Result<Option<u64>>;

    fn set_checkpoint(&self, key: &str, value: u64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_fields_are_allow_listed() {
        assert_eq!(
            "stakingTime".parse::<DelegationSortField>().unwrap(),
            DelegationSortField::StakingTime
        );
        assert_eq!(
            "total_sat".parse::<DelegationSortField>().unwrap(),
            DelegationSortField::TotalSat
        );
        assert!("doc".parse::<DelegationSortField>().is_err());
        assert!(
            "total_sat; DROP TABLE delegations"
                .parse::<DelegationSortField>()
                .is_err()
        );
        assert_eq!(
            "activeStakedSat".parse::<StakerSortField>().unwrap(),
            StakerSortField::ActiveStakedSat
        );
        for field in StakerSortField::ALL {
            assert_eq!(field.as_str().parse::<StakerSortField>().unwrap(), *field);
        }
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!(SortOrder::default(), SortOrder::Desc);
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
