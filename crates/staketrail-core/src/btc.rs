//! Bitcoin transaction codec.
//!
//! Only what the indexer needs from a raw staking transaction:
//! - the canonical txid (hash of the witness-stripped serialization)
//! - the staking amount (value of output 0)
//! - the sender's BTC address, when input 0 is a P2WPKH spend
//!
//! Decoding is consensus decoding from the `bitcoin` crate; trailing bytes
//! are rejected.

use bitcoin::address::KnownHrp;
use bitcoin::{Address, CompressedPublicKey, Transaction};

use crate::{Error, Network, Result};

/// Decode a hex-encoded transaction. A leading `0x` is accepted.
pub fn parse_transaction(raw_hex: &str) -> Result<Transaction> {
    let trimmed = raw_hex.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(trimmed)?;
    Ok(bitcoin::consensus::deserialize(&bytes)?)
}

/// Canonical txid of a hex-encoded transaction, as lowercase hex.
pub fn txid(raw_hex: &str) -> Result<String> {
    Ok(parse_transaction(raw_hex)?.compute_txid().to_string())
}

/// Value of the staking output (output 0), or `None` if the tx doesn't parse.
pub fn extract_amount(raw_hex: &str) -> Option<u64> {
    parse_transaction(raw_hex)
        .ok()?
        .output
        .first()
        .map(|o| o.value.to_sat())
}

/// Sender BTC address, or `None` if it can't be derived from the raw tx.
pub fn extract_sender_address(raw_hex: &str, network: Network) -> Option<String> {
    sender_address(&parse_transaction(raw_hex).ok()?, network)
}

/// Address of the sender, derived from input 0.
///
/// Only P2WPKH spends (`[signature, compressed pubkey]` witness, empty
/// script sig) carry enough information to derive an address without the
/// previous output.
pub fn sender_address(tx: &Transaction, network: Network) -> Option<String> {
    let input = tx.input.first()?;
    if !input.script_sig.is_empty() || input.witness.len() != 2 {
        return None;
    }
    let pubkey = CompressedPublicKey::from_slice(input.witness.nth(1)?).ok()?;
    let hrp = match network {
        Network::Mainnet => KnownHrp::Mainnet,
        Network::Testnet => KnownHrp::Testnets,
    };
    Some(Address::p2wpkh(&pubkey, hrp).to_string())
}

impl From<bitcoin::consensus::encode::Error> for Error {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        Error::TxDecode(e.to_string())
    }
}
