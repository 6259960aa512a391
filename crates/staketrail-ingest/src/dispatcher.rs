//! Event dispatcher: classify chain event batches and route them into the
//! delegation write path.
//!
//! [`EventDispatcher::handle_event`] never fails. Every sub-event of a batch
//! is processed on its own; a malformed or unknown one is logged, counted,
//! and dropped without affecting its siblings.

use std::sync::Arc;

use staketrail_core::{Delegation, DelegationState, Network};

use crate::audit::{AuditEntry, AuditLog};
use crate::events::{
    BatchContext, Classified, CreatedEvent, DelegationEvent, EventBatch, StateUpdateEvent,
    classify,
};
use crate::lifecycle::{DelegationWriter, ExistingPolicy, StateChange, WriteOutcome};
use crate::{Error, Result};

/// Per-batch dispatch counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Precondition failures: unknown delegation or state guard.
    pub skipped: usize,
    /// Malformed events and write failures.
    pub dropped: usize,
    /// Informational events (covenant signatures).
    pub informational: usize,
    /// Sub-events outside the delegation lifecycle.
    pub ignored: usize,
}

impl DispatchStats {
    pub fn merge(&mut self, other: &DispatchStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.dropped += other.dropped;
        self.informational += other.informational;
        self.ignored += other.ignored;
    }

    fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Created => self.created += 1,
            WriteOutcome::Updated => self.updated += 1,
            WriteOutcome::Unchanged => self.unchanged += 1,
            WriteOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

pub struct EventDispatcher {
    writer: Arc<DelegationWriter>,
    audit: Option<Arc<AuditLog>>,
}

impl EventDispatcher {
    pub fn new(writer: Arc<DelegationWriter>, audit: Option<Arc<AuditLog>>) -> Self {
        Self { writer, audit }
    }

    /// Classify and apply every sub-event of `batch`.
    pub async fn handle_event(&self, batch: &EventBatch, network: Network) -> DispatchStats {
        let ctx = BatchContext::from_events(&batch.events);
        let mut stats = DispatchStats::default();
        let mut audited = Vec::new();
        let mut kinds = Vec::new();

        for raw in &batch.events {
            let event = match classify(raw, &ctx) {
                Classified::Ignored => {
                    stats.ignored += 1;
                    continue;
                }
                Classified::Malformed { kind, reason } => {
                    tracing::warn!(
                        network = %network,
                        height = ?batch.height,
                        kind,
                        "Dropping malformed event: {}",
                        reason
                    );
                    metrics::counter!("dispatcher_events_ignored_total").increment(1);
                    stats.dropped += 1;
                    continue;
                }
                Classified::Event(event) => event,
            };

            let kind = event.kind();
            metrics::counter!("dispatcher_events_total", "kind" => kind).increment(1);
            if !matches!(event, DelegationEvent::Created(_)) {
                audited.push(raw.clone());
                kinds.push(kind.to_string());
            }

            match self.apply(event, batch, network).await {
                Ok(Some(outcome)) => {
                    if let WriteOutcome::Skipped(reason) = outcome {
                        tracing::info!(network = %network, kind, "Event skipped: {}", reason);
                    }
                    stats.record(outcome);
                }
                Ok(None) => stats.informational += 1,
                Err(e) => {
                    tracing::warn!(
                        network = %network,
                        height = ?batch.height,
                        kind,
                        "Failed to apply event: {}",
                        e
                    );
                    metrics::counter!("dispatcher_errors_total").increment(1);
                    stats.dropped += 1;
                }
            }
        }

        if !audited.is_empty() {
            self.audit(batch, network, kinds, audited);
        }
        stats
    }

    /// Apply one typed event. `Ok(None)` means it carried no mutation.
    async fn apply(
        &self,
        event: DelegationEvent,
        batch: &EventBatch,
        network: Network,
    ) -> Result<Option<WriteOutcome>> {
        let outcome = match event {
            DelegationEvent::Created(created) => {
                let candidate = self.delegation_from_created(created, batch, network)?;
                self.writer.observe(candidate, ExistingPolicy::Keep).await?
            }
            DelegationEvent::StateUpdate(update)
            | DelegationEvent::EarlyUnbonding(update)
            | DelegationEvent::Expired(update)
            | DelegationEvent::InclusionProof(update) => {
                self.transition(network, update, None).await?
            }
            DelegationEvent::QuorumReached(update) => {
                self.transition(network, update, Some(DelegationState::Pending))
                    .await?
            }
            DelegationEvent::CovenantSignature { staking_tx_id_hex } => {
                tracing::debug!(
                    network = %network,
                    txid = ?staking_tx_id_hex,
                    "Covenant signature received"
                );
                return Ok(None);
            }
        };
        Ok(Some(outcome))
    }

    async fn transition(
        &self,
        network: Network,
        update: StateUpdateEvent,
        only_if: Option<DelegationState>,
    ) -> Result<WriteOutcome> {
        let change = StateChange {
            new_state: update.new_state,
            start_height: update.start_height,
            end_height: update.end_height,
            only_if,
            unbonding_tx_hex: update.unbonding_tx_hex,
        };
        self.writer
            .transition(network, &update.staking_tx_id_hex, change)
            .await
    }

    fn delegation_from_created(
        &self,
        created: CreatedEvent,
        batch: &EventBatch,
        network: Network,
    ) -> Result<Delegation> {
        let codec = self.writer.codec();
        let staking_tx_id_hex = codec.txid(&created.staking_tx_hex)?;
        let total_sat = created
            .total_sat
            .or_else(|| codec.amount(&created.staking_tx_hex))
            .ok_or_else(|| {
                Error::Core(staketrail_core::Error::InvalidField {
                    field: "total_sat",
                    reason: format!("no amount for {}", staking_tx_id_hex),
                })
            })?;
        let unbonding_tx_id_hex = created
            .unbonding_tx_hex
            .as_deref()
            .and_then(|hex| codec.txid(hex).ok());

        Ok(Delegation {
            staker_btc_address: codec.sender_address(&created.staking_tx_hex, network),
            staking_tx_hex: created.staking_tx_hex,
            staking_tx_id_hex,
            network,
            staker_address: created.staker_address,
            staker_btc_pk_hex: created.staker_btc_pk_hex,
            finality_provider_btc_pks_hex: created.finality_provider_btc_pks_hex,
            total_sat,
            staking_time: created.staking_time,
            unbonding_time: created.unbonding_time,
            start_height: 0,
            end_height: 0,
            block_height: batch.height.unwrap_or(0),
            tx_hash: batch.tx_hash.clone(),
            unbonding_tx_hex: created.unbonding_tx_hex,
            unbonding_tx_id_hex,
            spend_stake_tx_hex: None,
            spend_stake_tx_id_hex: None,
            state: DelegationState::Pending,
            params_version: created.params_version,
        })
    }

    fn audit(
        &self,
        batch: &EventBatch,
        network: Network,
        kinds: Vec<String>,
        events: Vec<crate::chain::RawEvent>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let entry = AuditEntry {
            network,
            height: batch.height,
            tx_hash: batch.tx_hash.clone(),
            kinds,
            events,
        };
        if let Err(e) = audit.append(&entry) {
            tracing::warn!(network = %network, "Audit append failed: {}", e);
        }
    }
}
