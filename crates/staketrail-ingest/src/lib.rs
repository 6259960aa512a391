//! Staketrail ingestion: delegation mirroring and staker aggregation.
//!
//! This crate keeps a local mirror of Bitcoin staking delegations in step
//! with the chain and maintains the per-staker aggregate documents derived
//! from them.
//!
//! # Modules
//!
//! - [`dispatcher`] - Routes decoded chain events to delegation writes
//! - [`reconcile`] - Periodic full resync against chain listings
//! - [`backfill`] - Height-range re-scans for missed events
//! - [`follower`] - Live ingestion as a checkpointed height follower
//! - [`crawler`] - Re-checks delegations stuck in transient states
//! - [`stakers`] - Incremental and full staker aggregate maintenance
//! - [`lifecycle`] - The state-transition contract every path writes through
//!
//! # Architecture
//!
//! ```text
//!  follower ──► backfill ──► dispatcher ─┐
//!                                        │
//!  reconcile ────────────────────────────┼──► DelegationWriter ──► store
//!                                        │            │
//!  crawler ──────────────────────────────┘            ▼
//!                                          StakerAggregateEngine ──► store
//! ```
//!
//! Every path funnels through [`lifecycle::DelegationWriter`]; the staker
//! documents are always derivable from the delegation set, and
//! [`stakers::StakerAggregateEngine::recalculate_all`] rebuilds them.

pub mod app;
pub mod audit;
pub mod backfill;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crawler;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod follower;
pub mod lifecycle;
pub mod ratelimit;
pub mod reconcile;
pub mod retry;
pub mod run_state;
pub mod stakers;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

pub use app::Components;
pub use config::{IngestConfig, NetworkEndpoints};
pub use lifecycle::{DelegationWriter, ExistingPolicy, StateChange, WriteOutcome};
