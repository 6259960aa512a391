//! Sub-event classification.
//!
//! Turns one raw `{type, attributes}` sub-event into a typed
//! [`DelegationEvent`], a malformed-event report, or nothing. Several
//! attribute spellings are accepted for the same field.

use staketrail_core::DelegationState;

use super::{Attributes, CreatedEvent, DelegationEvent, StateUpdateEvent};
use crate::chain::RawEvent;

const CREATE_ACTION_SUFFIX: &str = "MsgCreateBTCDelegation";
const CREATED_EVENT_SUFFIX: &str = "EventBTCDelegationCreated";

const TXID_KEYS: &[&str] = &["staking_tx_hash", "staking_tx_id_hex"];
const STATE_KEYS: &[&str] = &["new_state", "state"];
const FP_KEYS: &[&str] = &["finality_provider_btc_pks_hex", "fp_btc_pk_list"];
const AMOUNT_KEYS: &[&str] = &["total_sat", "staking_amount"];
const UNBONDING_TX_KEYS: &[&str] = &["unbonding_tx", "unbonding_tx_hex"];

/// Facts shared by every sub-event of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchContext {
    /// `sender` of the batch's `message` sub-event.
    pub sender: Option<String>,
    /// The batch carries a typed `EventBTCDelegationCreated`.
    pub has_created_event: bool,
}

impl BatchContext {
    pub fn from_events(events: &[RawEvent]) -> Self {
        let sender = events
            .iter()
            .filter(|e| e.kind == "message")
            .find_map(|e| Attributes::new(e).string(&["sender"]));
        let has_created_event = events
            .iter()
            .any(|e| e.kind.ends_with(CREATED_EVENT_SUFFIX));
        Self {
            sender,
            has_created_event,
        }
    }
}

/// Outcome of classifying one sub-event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Event(DelegationEvent),
    /// Recognized type with missing or unusable attributes.
    Malformed {
        kind: &'static str,
        reason: String,
    },
    /// Not a delegation lifecycle event.
    Ignored,
}

#[derive(Clone, Copy)]
enum Kind {
    Created,
    StateUpdate,
    QuorumReached,
    InclusionProof,
    EarlyUnbonding,
    Expired,
    CovenantSignature,
}

fn kind_of(event: &RawEvent) -> Option<Kind> {
    let t = event.kind.as_str();
    if t == "message" {
        let action = Attributes::new(event).string(&["action"])?;
        return action.ends_with(CREATE_ACTION_SUFFIX).then_some(Kind::Created);
    }
    if t.ends_with(CREATED_EVENT_SUFFIX) {
        Some(Kind::Created)
    } else if t.ends_with("EventBTCDelegationStateUpdate") {
        Some(Kind::StateUpdate)
    } else if t.ends_with("EventCovenantQuorumReached") {
        Some(Kind::QuorumReached)
    } else if t.ends_with("EventBTCDelegationInclusionProofReceived") {
        Some(Kind::InclusionProof)
    } else if t.ends_with("EventBTCDelgationUnbondedEarly")
        || t.ends_with("EventBTCDelegationUnbondedEarly")
    {
        Some(Kind::EarlyUnbonding)
    } else if t.ends_with("EventBTCDelegationExpired") {
        Some(Kind::Expired)
    } else if t.ends_with("EventCovenantSignatureReceived") {
        Some(Kind::CovenantSignature)
    } else {
        None
    }
}

fn malformed(kind: &'static str, reason: impl Into<String>) -> Classified {
    Classified::Malformed {
        kind,
        reason: reason.into(),
    }
}

/// Decode one sub-event into a typed delegation event.
pub fn classify(event: &RawEvent, ctx: &BatchContext) -> Classified {
    let Some(kind) = kind_of(event) else {
        return Classified::Ignored;
    };
    let attrs = Attributes::new(event);

    // A bare create message only names the sender; the typed event in the
    // same batch carries the payload.
    if event.kind == "message"
        && ctx.has_created_event
        && attrs.string(&["staking_tx_hex"]).is_none()
    {
        return Classified::Ignored;
    }

    let result = match kind {
        Kind::Created => created(&attrs, ctx).map(DelegationEvent::Created),
        Kind::StateUpdate => state_update(&attrs, None).map(DelegationEvent::StateUpdate),
        Kind::QuorumReached => state_update(&attrs, None).map(DelegationEvent::QuorumReached),
        Kind::EarlyUnbonding => state_update(&attrs, Some(DelegationState::Unbonded))
            .map(DelegationEvent::EarlyUnbonding),
        Kind::Expired => {
            state_update(&attrs, Some(DelegationState::Expired)).map(DelegationEvent::Expired)
        }
        Kind::InclusionProof => state_update(&attrs, None).and_then(|update| {
            if update.start_height.is_none() || update.end_height.is_none() {
                Err("missing start_height or end_height".to_string())
            } else {
                Ok(DelegationEvent::InclusionProof(update))
            }
        }),
        Kind::CovenantSignature => Ok(DelegationEvent::CovenantSignature {
            staking_tx_id_hex: attrs.string(TXID_KEYS).map(|t| t.to_ascii_lowercase()),
        }),
    };

    match result {
        Ok(event) => Classified::Event(event),
        Err(reason) => malformed(kind_name(kind), reason),
    }
}

fn kind_name(kind: Kind) -> &'static str {
    match kind {
        Kind::Created => "created",
        Kind::StateUpdate => "state_update",
        Kind::QuorumReached => "quorum_reached",
        Kind::InclusionProof => "inclusion_proof",
        Kind::EarlyUnbonding => "early_unbonding",
        Kind::Expired => "expired",
        Kind::CovenantSignature => "covenant_signature",
    }
}

fn required_u64(attrs: &Attributes<'_>, key: &'static str) -> Result<u64, String> {
    match attrs.u64(&[key]) {
        Ok(Some(v)) => Ok(v),
        Ok(None) => Err(format!("missing {}", key)),
        Err(raw) => Err(format!("{} is not an integer: '{}'", key, raw)),
    }
}

fn created(attrs: &Attributes<'_>, ctx: &BatchContext) -> Result<CreatedEvent, String> {
    let staking_tx_hex = attrs
        .string(&["staking_tx_hex"])
        .ok_or("missing staking_tx_hex")?;
    let staker_address = attrs
        .string(&["staker_addr"])
        .or_else(|| ctx.sender.clone())
        .ok_or("missing sender")?;
    let staker_btc_pk_hex = attrs
        .string(&["staker_btc_pk_hex", "btc_pk"])
        .ok_or("missing staker_btc_pk_hex")?;
    let finality_provider_btc_pks_hex = attrs.list(FP_KEYS);
    if finality_provider_btc_pks_hex.is_empty() {
        return Err("missing finality_provider_btc_pks_hex".into());
    }
    let staking_time = required_u64(attrs, "staking_time")?;
    let unbonding_time = required_u64(attrs, "unbonding_time")?;
    let total_sat = attrs
        .u64(AMOUNT_KEYS)
        .map_err(|raw| format!("total_sat is not an integer: '{}'", raw))?;
    let params_version = match attrs.u64(&["params_version"]) {
        Ok(v) => v.and_then(|v| u32::try_from(v).ok()),
        Err(raw) => return Err(format!("params_version is not an integer: '{}'", raw)),
    };

    Ok(CreatedEvent {
        staking_tx_hex,
        staker_address,
        staker_btc_pk_hex,
        finality_provider_btc_pks_hex,
        staking_time,
        unbonding_time,
        total_sat,
        unbonding_tx_hex: attrs.string(UNBONDING_TX_KEYS),
        params_version,
    })
}

fn state_update(
    attrs: &Attributes<'_>,
    default_state: Option<DelegationState>,
) -> Result<StateUpdateEvent, String> {
    let staking_tx_id_hex = attrs
        .string(TXID_KEYS)
        .ok_or("missing staking_tx_hash")?
        .to_ascii_lowercase();
    let new_state = match attrs.state(STATE_KEYS) {
        Ok(Some(state)) => state,
        Ok(None) => default_state.ok_or("missing new_state")?,
        Err(raw) => return Err(format!("unknown new_state '{}'", raw)),
    };
    let start_height = attrs
        .u64(&["start_height"])
        .map_err(|raw| format!("start_height is not an integer: '{}'", raw))?;
    let end_height = attrs
        .u64(&["end_height"])
        .map_err(|raw| format!("end_height is not an integer: '{}'", raw))?;

    Ok(StateUpdateEvent {
        staking_tx_id_hex,
        new_state,
        start_height,
        end_height,
        unbonding_tx_hex: attrs.string(UNBONDING_TX_KEYS),
    })
}
