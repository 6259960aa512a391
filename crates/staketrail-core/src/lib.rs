//! Core types, transaction codec, and shared utilities for the staketrail indexer.
//!
//! This crate provides:
//! - The delegation record and its lifecycle states
//! - The per-staker aggregate document and its rollup sub-structures
//! - A Bitcoin transaction codec (txid, staking amount, sender address)
//! - Prometheus metrics helpers
//! - Shared error types

pub mod btc;
mod delegation;
mod error;
pub mod metrics;
mod staker;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// First staking params version that belongs to phase 2.
///
/// Delegations without a params version, or with a lower one, are phase 1.
pub const PHASE2_PARAMS_VERSION: u32 = 4;

/// Maximum number of entries kept in a staker's recent delegation list.
pub const RECENT_DELEGATIONS_CAP: usize = 10;

pub use btc::{extract_amount, extract_sender_address, parse_transaction, sender_address, txid};
pub use delegation::{Delegation, DelegationState, Network, phase_for_params_version};
pub use error::{Error, Result};
pub use staker::{
    FinalityProviderStats, NetworkStats, NetworkRollups, PhaseStats, StakerDelegation, Staker,
    StateCounts,
};
