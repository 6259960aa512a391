//! Bitcoin transaction codec seam.
//!
//! Ingestion paths only need three pure functions from a raw staking tx. They
//! go through [`TxCodec`] so tests can feed opaque fixtures.

use staketrail_core::{Network, btc};

use crate::Result;

pub trait TxCodec: Send + Sync {
    /// Canonical txid of a hex-encoded transaction.
    fn txid(&self, raw_hex: &str) -> Result<String>;

    /// Sender BTC address, if derivable from the transaction alone.
    fn sender_address(&self, raw_hex: &str, network: Network) -> Option<String>;

    /// Staking amount in satoshis.
    fn amount(&self, raw_hex: &str) -> Option<u64>;
}

/// The production codec backed by [`staketrail_core::btc`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BitcoinTxCodec;

impl TxCodec for BitcoinTxCodec {
    fn txid(&self, raw_hex: &str) -> Result<String> {
        Ok(btc::txid(raw_hex)?)
    }

    fn sender_address(&self, raw_hex: &str, network: Network) -> Option<String> {
        btc::extract_sender_address(raw_hex, network)
    }

    fn amount(&self, raw_hex: &str) -> Option<u64> {
        btc::extract_amount(raw_hex)
    }
}
