//! Pure accrual rules shared by the incremental and rebuild paths.

use std::cmp::Ordering;

use staketrail_core::{Delegation, RECENT_DELEGATIONS_CAP, Staker, StakerDelegation};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum Direction {
    Add,
    Remove,
}

fn adjust(value: &mut u64, amount: u64, direction: Direction) {
    *value = match direction {
        Direction::Add => value.saturating_add(amount),
        Direction::Remove => value.saturating_sub(amount),
    };
}

/// Projection of a delegation as stored inside its staker document.
pub(super) fn project(delegation: &Delegation) -> StakerDelegation {
    StakerDelegation {
        staking_tx_id_hex: delegation.staking_tx_id_hex.clone(),
        network: delegation.network,
        finality_provider_btc_pk_hex: delegation.primary_finality_provider().map(String::from),
        total_sat: delegation.total_sat,
        staking_time: delegation.staking_time,
        state: delegation.state,
        phase: delegation.phase(),
    }
}

/// Recent list order: newest staking time first, then txid ascending.
pub(super) fn recent_order(a: &StakerDelegation, b: &StakerDelegation) -> Ordering {
    b.staking_time
        .cmp(&a.staking_time)
        .then_with(|| a.staking_tx_id_hex.cmp(&b.staking_tx_id_hex))
        .then_with(|| a.network.cmp(&b.network))
}

/// Fill identity fields that are still empty.
pub(super) fn fill_identity(staker: &mut Staker, delegation: &Delegation) {
    if staker.staker_btc_address.is_none() {
        staker.staker_btc_address = delegation.staker_btc_address.clone();
    }
    if staker.staker_btc_pk_hex.is_none() && !delegation.staker_btc_pk_hex.is_empty() {
        staker.staker_btc_pk_hex = Some(delegation.staker_btc_pk_hex.clone());
    }
}

/// Add or remove one projected delegation's contribution to every rollup.
///
/// Totals and finality-provider counts cover every delegation; the active
/// counters only move for `ACTIVE` ones. Entries emptied by a removal are
/// dropped so the document matches a fresh rebuild.
pub(super) fn accrue(staker: &mut Staker, entry: &StakerDelegation, direction: Direction) {
    let amount = entry.total_sat;
    let active = entry.state.is_active();

    adjust(&mut staker.total_delegations_count, 1, direction);
    adjust(&mut staker.total_staked_sat, amount, direction);
    match direction {
        Direction::Add => staker.delegation_states.increment(entry.state),
        Direction::Remove => staker.delegation_states.decrement(entry.state),
    }

    let network = staker.networks.get_mut(entry.network);
    adjust(&mut network.total_delegations, 1, direction);
    adjust(&mut network.total_staked_sat, amount, direction);

    let phase = staker.phase_mut(entry.phase);
    adjust(&mut phase.total_delegations, 1, direction);
    adjust(&mut phase.total_staked_sat, amount, direction);

    if active {
        adjust(&mut staker.active_delegations_count, 1, direction);
        adjust(&mut staker.active_staked_sat, amount, direction);
        let network = staker.networks.get_mut(entry.network);
        adjust(&mut network.active_delegations, 1, direction);
        adjust(&mut network.active_staked_sat, amount, direction);
        let phase = staker.phase_mut(entry.phase);
        adjust(&mut phase.active_delegations, 1, direction);
        adjust(&mut phase.active_staked_sat, amount, direction);
    }

    if let Some(pk) = entry.finality_provider_btc_pk_hex.as_deref() {
        let global = staker.finality_provider_mut(pk);
        accrue_finality_provider(global, amount, active, direction);
        let scoped = staker.phase_mut(entry.phase).finality_provider_mut(pk);
        accrue_finality_provider(scoped, amount, active, direction);
    }

    if direction == Direction::Remove {
        for phase in &mut staker.phase_stats {
            phase.finality_providers.retain(|fp| fp.delegations_count > 0);
        }
        staker.phase_stats.retain(|p| p.total_delegations > 0);
        staker
            .unique_finality_providers
            .retain(|fp| fp.delegations_count > 0);
    }
}

fn accrue_finality_provider(
    fp: &mut staketrail_core::FinalityProviderStats,
    amount: u64,
    active: bool,
    direction: Direction,
) {
    adjust(&mut fp.delegations_count, 1, direction);
    adjust(&mut fp.total_staked_sat, amount, direction);
    if active {
        adjust(&mut fp.active_delegations_count, 1, direction);
        adjust(&mut fp.active_staked_sat, amount, direction);
    }
}

fn upsert_recent(staker: &mut Staker, entry: StakerDelegation) {
    staker
        .recent_delegations
        .retain(|d| !(d.network == entry.network && d.staking_tx_id_hex == entry.staking_tx_id_hex));
    let idx = staker
        .recent_delegations
        .binary_search_by(|d| recent_order(d, &entry))
        .unwrap_or_else(|idx| idx);
    staker.recent_delegations.insert(idx, entry);
    staker.recent_delegations.truncate(RECENT_DELEGATIONS_CAP);
}

/// Rebuild the recent list from `delegations[]`.
fn refresh_recent(staker: &mut Staker) {
    let mut recent = staker.delegations.clone();
    recent.sort_by(recent_order);
    recent.truncate(RECENT_DELEGATIONS_CAP);
    staker.recent_delegations = recent;
}

/// Fold one changed delegation into its staker's rollups.
///
/// The prior contribution of the same delegation (network and txid) is read
/// from `delegations[]`; it is removed and the new one added, so a state
/// change moves exactly one per-state count and an identical observation
/// leaves the document untouched. A moved staking time recomputes the time
/// bounds and the recent list from `delegations[]`, matching a rebuild.
pub fn apply_delegation(mut staker: Staker, delegation: &Delegation) -> Staker {
    fill_identity(&mut staker, delegation);

    let entry = project(delegation);
    match staker
        .delegations
        .iter()
        .position(|d| d.network == entry.network && d.staking_tx_id_hex == entry.staking_tx_id_hex)
    {
        Some(idx) if staker.delegations[idx] == entry => staker,
        Some(idx) => {
            let prior = staker.delegations[idx].clone();
            accrue(&mut staker, &prior, Direction::Remove);
            accrue(&mut staker, &entry, Direction::Add);
            staker.delegations[idx] = entry.clone();
            if prior.staking_time == entry.staking_time {
                upsert_recent(&mut staker, entry);
            } else {
                staker.recompute_staking_time_bounds();
                refresh_recent(&mut staker);
            }
            staker
        }
        None => {
            staker.extend_staking_time(entry.staking_time);
            accrue(&mut staker, &entry, Direction::Add);
            staker.delegations.push(entry.clone());
            upsert_recent(&mut staker, entry);
            staker
        }
    }
}
