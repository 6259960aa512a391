//! Full rebuild of a staker document from its delegation set.

use staketrail_core::{Delegation, RECENT_DELEGATIONS_CAP, Staker, StakerDelegation};

use super::apply::{Direction, accrue, fill_identity, project, recent_order};

/// Bounded set of the most recent entries, kept in [`recent_order`].
struct RecentCandidates {
    entries: Vec<StakerDelegation>,
}

impl RecentCandidates {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(RECENT_DELEGATIONS_CAP + 1),
        }
    }

    fn offer(&mut self, entry: &StakerDelegation) {
        if self.entries.len() == RECENT_DELEGATIONS_CAP
            && self
                .entries
                .last()
                .is_some_and(|last| recent_order(entry, last).is_ge())
        {
            return;
        }
        let idx = self
            .entries
            .binary_search_by(|e| recent_order(e, entry))
            .unwrap_or_else(|idx| idx);
        self.entries.insert(idx, entry.clone());
        self.entries.truncate(RECENT_DELEGATIONS_CAP);
    }

    fn into_sorted(self) -> Vec<StakerDelegation> {
        self.entries
    }
}

/// Rebuild every rollup of `staker` from `delegations`, in the given order.
///
/// Identity fields already present are kept. The result depends only on the
/// delegation set and its order, so running it twice yields the same document.
pub fn rebuild_staker(mut staker: Staker, delegations: &[Delegation]) -> Staker {
    staker.reset_rollups();
    let mut recent = RecentCandidates::new();

    for delegation in delegations {
        fill_identity(&mut staker, delegation);
        staker.extend_staking_time(delegation.staking_time);

        let entry = project(delegation);
        accrue(&mut staker, &entry, Direction::Add);
        recent.offer(&entry);
        staker.delegations.push(entry);
    }

    staker.recent_delegations = recent.into_sorted();
    staker
}
