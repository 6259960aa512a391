//! Persisting staker aggregate engine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use staketrail_core::{Delegation, Staker};

use super::{apply_delegation, rebuild_staker};
use crate::Result;
use crate::run_state::{RunSnapshot, RunState};
use crate::store::{DelegationStore, StakerStore};

/// Save attempts per staker update, including the first.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// Default page size for [`StakerAggregateEngine::recalculate_all`].
pub const RECALC_BATCH_SIZE: u64 = 200;

/// Result of one [`StakerAggregateEngine::recalculate_all`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecalcSummary {
    pub recalculated: u64,
    pub failed: u64,
}

/// Keeps staker documents in step with the delegation set.
pub struct StakerAggregateEngine {
    delegations: Arc<dyn DelegationStore>,
    stakers: Arc<dyn StakerStore>,
    conflict_backoff: Duration,
    recalc_state: RunState<RecalcSummary>,
}

impl StakerAggregateEngine {
    pub fn new(delegations: Arc<dyn DelegationStore>, stakers: Arc<dyn StakerStore>) -> Self {
        Self {
            delegations,
            stakers,
            conflict_backoff: Duration::from_millis(50),
            recalc_state: RunState::new(),
        }
    }

    /// Base delay between conflicting save attempts; attempt `n` waits `n * backoff`.
    pub fn with_conflict_backoff(mut self, backoff: Duration) -> Self {
        self.conflict_backoff = backoff;
        self
    }

    pub fn recalc_state(&self) -> RunSnapshot<RecalcSummary> {
        self.recalc_state.snapshot()
    }

    /// Load, transform, and save a staker under optimistic concurrency.
    ///
    /// Every attempt starts from a fresh read, so a retry after a conflict
    /// builds on the counters that won the race.
    async fn update_staker<F>(&self, staker_address: &str, mut transform: F) -> Result<Staker>
    where
        F: FnMut(Staker) -> Result<Staker>,
    {
        let mut attempt = 1;
        loop {
            let current = self
                .stakers
                .get_staker(staker_address)?
                .unwrap_or_else(|| Staker::new(staker_address));
            let expected = current.version;
            let mut next = transform(current.clone())?;
            if next == current {
                return Ok(current);
            }

            match self.stakers.save_staker(&next, expected) {
                Ok(version) => {
                    next.version = version;
                    metrics::counter!("staker_updates_total").increment(1);
                    return Ok(next);
                }
                Err(e) if e.is_version_conflict() && attempt < MAX_SAVE_ATTEMPTS => {
                    metrics::counter!("staker_conflicts_total").increment(1);
                    tracing::debug!(
                        staker = staker_address,
                        attempt,
                        "Staker version conflict, reloading: {}",
                        e
                    );
                    let delay = self.conflict_backoff * attempt;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(e) => {
                    metrics::counter!("staker_update_failures_total").increment(1);
                    return Err(e);
                }
            }
        }
    }

    /// Fold a delegation mutation into its staker's rollups.
    pub async fn on_delegation_changed(&self, delegation: &Delegation) -> Result<()> {
        self.update_staker(&delegation.staker_address, |staker| {
            Ok(apply_delegation(staker, delegation))
        })
        .await?;
        Ok(())
    }

    /// Rebuild one staker from the delegation store and persist it.
    pub async fn recalculate_staker(&self, staker_address: &str) -> Result<Staker> {
        let staker = self
            .update_staker(staker_address, |staker| {
                let delegations = self.delegations.delegations_by_staker(staker_address)?;
                Ok(rebuild_staker(staker, &delegations))
            })
            .await?;
        metrics::counter!("staker_recalculations_total").increment(1);
        Ok(staker)
    }

    /// Next page of addresses to rebuild: every staker with a document or
    /// with delegation rows, ascending and deduplicated.
    fn address_page(&self, after: Option<&str>, limit: u64) -> Result<Vec<String>> {
        let mut page = self.delegations.delegation_staker_addresses(after, limit)?;
        page.extend(self.stakers.staker_addresses(after, limit)?);
        page.sort_unstable();
        page.dedup();
        page.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(page)
    }

    /// Rebuild every staker, paging through addresses in order.
    ///
    /// Addresses come from both the delegation rows and the staker documents,
    /// so a staker whose document was never saved is still rebuilt.
    ///
    /// Returns `None` if a recalculation pass is already running.
    pub async fn recalculate_all(&self, batch_size: u64) -> Result<Option<RecalcSummary>> {
        let Some(guard) = self.recalc_state.try_begin() else {
            tracing::info!("Staker recalculation already running, skipping");
            return Ok(None);
        };

        let started = Instant::now();
        let mut summary = RecalcSummary::default();
        let mut after: Option<String> = None;

        loop {
            let batch = self.address_page(after.as_deref(), batch_size.max(1))?;
            let Some(last) = batch.last().cloned() else {
                break;
            };

            for address in &batch {
                match self.recalculate_staker(address).await {
                    Ok(_) => summary.recalculated += 1,
                    Err(e) => {
                        summary.failed += 1;
                        tracing::warn!(staker = %address, "Staker recalculation failed: {}", e);
                    }
                }
            }
            after = Some(last);
        }

        tracing::info!(
            recalculated = summary.recalculated,
            failed = summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Staker recalculation complete"
        );
        guard.finish(summary.clone());
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Page, SqliteStore, StakerQuery, StakerTotals};
    use crate::testing::delegation;
    use parking_lot::Mutex;
    use staketrail_core::DelegationState;

    fn engine(store: &Arc<SqliteStore>) -> StakerAggregateEngine {
        StakerAggregateEngine::new(store.clone(), store.clone())
            .with_conflict_backoff(Duration::ZERO)
    }

    /// Commits a competing update right before the first save goes through.
    struct RacingStakerStore {
        inner: Arc<SqliteStore>,
        interloper: Mutex<Option<Delegation>>,
    }

    impl StakerStore for RacingStakerStore {
        fn get_staker(&self, staker_address: &str) -> Result<Option<Staker>> {
            self.inner.get_staker(staker_address)
        }

        fn save_staker(&self, staker: &Staker, expected: u64) -> Result<u64> {
            if let Some(competing) = self.interloper.lock().take() {
                let current = self
                    .inner
                    .get_staker(&competing.staker_address)?
                    .unwrap_or_else(|| Staker::new(competing.staker_address.clone()));
                let version = current.version;
                self.inner
                    .save_staker(&apply_delegation(current, &competing), version)?;
            }
            self.inner.save_staker(staker, expected)
        }

        fn staker_addresses(&self, after: Option<&str>, limit: u64) -> Result<Vec<String>> {
            self.inner.staker_addresses(after, limit)
        }

        fn list_stakers(&self, query: &StakerQuery) -> Result<Page<Staker>> {
            self.inner.list_stakers(query)
        }

        fn staker_totals(
            &self,
            network: Option<staketrail_core::Network>,
        ) -> Result<StakerTotals> {
            self.inner.staker_totals(network)
        }
    }

    #[tokio::test]
    async fn test_conflict_retry_loses_no_update() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let first = delegation("t1", "bbn1abc", 1_000, 100, DelegationState::Active);
        let second = delegation("t2", "bbn1abc", 2_000, 200, DelegationState::Active);
        let racing = Arc::new(RacingStakerStore {
            inner: store.clone(),
            interloper: Mutex::new(Some(first.clone())),
        });
        let engine = StakerAggregateEngine::new(store.clone(), racing)
            .with_conflict_backoff(Duration::ZERO);

        engine.on_delegation_changed(&second).await.unwrap();

        let staker = store.get_staker("bbn1abc").unwrap().unwrap();
        assert_eq!(staker.total_delegations_count, 2);
        assert_eq!(staker.total_staked_sat, 3_000);
        assert_eq!(staker.active_staked_sat, 3_000);
        assert_eq!(staker.version, 2);
    }

    #[tokio::test]
    async fn test_unchanged_update_skips_save() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = engine(&store);
        let d = delegation("t1", "bbn1abc", 1_000, 100, DelegationState::Pending);

        engine.on_delegation_changed(&d).await.unwrap();
        engine.on_delegation_changed(&d).await.unwrap();

        assert_eq!(store.get_staker("bbn1abc").unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_recalculation_heals_drift_and_is_stable() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = engine(&store);
        let d1 = delegation("t1", "bbn1abc", 1_000, 100, DelegationState::Active);
        let d2 = delegation("t2", "bbn1abc", 2_000, 200, DelegationState::Verified);
        for d in [&d1, &d2] {
            store.insert_delegation(d).unwrap();
            engine.on_delegation_changed(d).await.unwrap();
        }
        let incremental = store.get_staker("bbn1abc").unwrap().unwrap();

        // Built purely incrementally: a rebuild changes nothing.
        let rebuilt = engine.recalculate_staker("bbn1abc").await.unwrap();
        assert_eq!(rebuilt, incremental);

        // Corrupt the stored rollups, then heal.
        let mut drifted = incremental.clone();
        drifted.active_staked_sat = 99;
        drifted.total_delegations_count = 7;
        store.save_staker(&drifted, drifted.version).unwrap();

        let healed = engine.recalculate_staker("bbn1abc").await.unwrap();
        let again = engine.recalculate_staker("bbn1abc").await.unwrap();
        assert_eq!(healed.active_staked_sat, 1_000);
        assert_eq!(healed.total_delegations_count, 2);
        assert_eq!(
            serde_json::to_string(&healed).unwrap(),
            serde_json::to_string(&again).unwrap()
        );
        assert_eq!(again.version, healed.version);
    }

    #[tokio::test]
    async fn test_recalculate_all_pages_every_staker() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = engine(&store);
        for i in 0..5 {
            let d = delegation(
                &format!("t{}", i),
                &format!("bbn1s{}", i),
                100,
                10,
                DelegationState::Active,
            );
            store.insert_delegation(&d).unwrap();
            engine.on_delegation_changed(&d).await.unwrap();
        }

        let summary = engine.recalculate_all(2).await.unwrap().unwrap();
        assert_eq!(
            summary,
            RecalcSummary {
                recalculated: 5,
                failed: 0
            }
        );
        let snapshot = engine.recalc_state();
        assert!(!snapshot.running);
        assert_eq!(snapshot.last.unwrap().result.recalculated, 5);
    }

    #[tokio::test]
    async fn test_recalculate_all_heals_staker_without_document() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let engine = engine(&store);
        let tracked = delegation("t1", "bbn1a", 100, 10, DelegationState::Active);
        store.insert_delegation(&tracked).unwrap();
        engine.on_delegation_changed(&tracked).await.unwrap();
        // Written to the delegation table only; the staker update never landed.
        for txid in ["t2", "t3"] {
            store
                .insert_delegation(&delegation(txid, "bbn1b", 250, 20, DelegationState::Active))
                .unwrap();
        }
        assert!(store.get_staker("bbn1b").unwrap().is_none());

        let summary = engine.recalculate_all(1).await.unwrap().unwrap();
        assert_eq!(summary.recalculated, 2);
        assert_eq!(summary.failed, 0);

        let healed = store.get_staker("bbn1b").unwrap().unwrap();
        assert_eq!(healed.total_delegations_count, 2);
        assert_eq!(healed.active_staked_sat, 500);
        assert_eq!(healed.version, 1);
    }
}
