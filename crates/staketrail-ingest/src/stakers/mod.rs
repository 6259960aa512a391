//! Staker aggregate engine.
//!
//! Two paths maintain the same document:
//! - [`apply_delegation`]: the incremental fold run after every delegation
//!   mutation, persisted with optimistic-write-retry.
//! - [`rebuild_staker`]: a from-scratch rebuild over the staker's delegation
//!   rows, the ground truth used to heal drift.
//!
//! Both share one set of accrual rules, so a staker built purely
//! incrementally is left unchanged by a rebuild.

mod apply;
mod engine;
mod recalc;

pub use apply::apply_delegation;
pub use engine::{RECALC_BATCH_SIZE, RecalcSummary, StakerAggregateEngine};
pub use recalc::rebuild_staker;
