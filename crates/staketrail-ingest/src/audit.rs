//! Append-only audit log of dispatched chain events.
//!
//! # Key Design
//!
//! ```text
//! Key:   [timestamp_ms_be (8 bytes)][network tag (1 byte)][sequence_be (4 bytes)]
//! Value: JSON-encoded AuditEntry
//! ```
//!
//! The big-endian timestamp prefix keeps entries in arrival order, so
//! time-range reads and pruning are forward scans. The sequence disambiguates
//! entries appended within the same millisecond.
//!
//! The log is observational only. Nothing is ever replayed from it; state is
//! always re-derived from the chain.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rocksdb::{DBWithThreadMode, IteratorMode, MultiThreaded, Options};
use serde::{Deserialize, Serialize};
use staketrail_core::Network;

use crate::Result;
use crate::chain::RawEvent;

const KEY_LEN: usize = 13;

/// One dispatched event batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Classified kinds in the batch (e.g. `state_update`).
    pub kinds: Vec<String>,
    pub events: Vec<RawEvent>,
}

/// RocksDB-backed audit log.
pub struct AuditLog {
    db: DBWithThreadMode<MultiThreaded>,
    sequence: AtomicU32,
}

impl AuditLog {
    /// Open or create an audit log at the given directory.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        tracing::info!("Opening audit log at {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_write_buffer_size(16 * 1024 * 1024);
        opts.set_max_write_buffer_number(2);
        opts.increase_parallelism(num_cpus::get().min(4) as i32);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)?;

        Ok(Self {
            db,
            sequence: AtomicU32::new(0),
        })
    }

    fn make_key(timestamp_ms: u64, network: Network, sequence: u32) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        key[0..8].copy_from_slice(&timestamp_ms.to_be_bytes());
        key[8] = network.tag();
        key[9..13].copy_from_slice(&sequence.to_be_bytes());
        key
    }

    fn parse_key(key: &[u8]) -> Option<(u64, Network)> {
        if key.len() != KEY_LEN {
            return None;
        }
        let ts = u64::from_be_bytes(key[0..8].try_into().ok()?);
        let network = Network::from_tag(key[8])?;
        Some((ts, network))
    }

    /// Append an entry stamped with the current wall-clock time.
    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.append_at(now_ms, entry)
    }

    pub fn append_at(&self, timestamp_ms: u64, entry: &AuditEntry) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = Self::make_key(timestamp_ms, entry.network, sequence);
        self.db.put(key, serde_json::to_vec(entry)?)?;
        Ok(())
    }

    /// Entries with `timestamp >= since_ms`, oldest first.
    pub fn entries_since(&self, since_ms: u64) -> Result<Vec<(u64, AuditEntry)>> {
        let start_key = Self::make_key(since_ms, Network::Mainnet, 0);
        let iter = self
            .db
            .iterator(IteratorMode::From(&start_key, rocksdb::Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            let Some((ts, _network)) = Self::parse_key(&key) else {
                continue;
            };
            match serde_json::from_slice::<AuditEntry>(&value) {
                Ok(entry) => entries.push((ts, entry)),
                Err(e) => tracing::warn!("Skipping unreadable audit entry at {}: {}", ts, e),
            }
        }
        Ok(entries)
    }

    /// Delete entries older than `before_ms`. Returns the number removed.
    pub fn prune_before(&self, before_ms: u64) -> Result<usize> {
        let end_key = Self::make_key(before_ms, Network::Mainnet, 0);

        let mut batch = rocksdb::WriteBatch::default();
        let mut count = 0usize;

        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item?;
            if key.as_ref() >= end_key.as_slice() {
                break;
            }
            batch.delete(&key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
        }

        tracing::debug!("Pruned {} audit entries before {}", count, before_ms);
        Ok(count)
    }

    /// Delete entries older than `retention` relative to now.
    pub fn prune_older_than(&self, retention: Duration) -> Result<usize> {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let retention_ms = u64::try_from(retention.as_millis()).unwrap_or(u64::MAX);
        self.prune_before(now_ms.saturating_sub(retention_ms))
    }

    /// Get the approximate number of entries.
    pub fn approximate_count(&self) -> Result<u64> {
        let count = self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(network: Network, kind: &str) -> AuditEntry {
        AuditEntry {
            network,
            height: Some(7),
            tx_hash: None,
            kinds: vec![kind.to_string()],
            events: vec![RawEvent::new(kind, &[("staking_tx_hash", "aa")])],
        }
    }

    #[test]
    fn test_key_layout_orders_by_time() {
        let early = AuditLog::make_key(1_000, Network::Testnet, 9);
        let late = AuditLog::make_key(2_000, Network::Mainnet, 0);
        assert!(early < late);
        assert_eq!(
            AuditLog::parse_key(&early),
            Some((1_000, Network::Testnet))
        );
        assert_eq!(AuditLog::parse_key(&early[..12]), None);
    }

    #[test]
    fn test_append_and_read_since() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::open(tmp.path()).unwrap();

        log.append_at(1_000, &entry(Network::Mainnet, "expired")).unwrap();
        log.append_at(1_000, &entry(Network::Testnet, "state_update")).unwrap();
        log.append_at(3_000, &entry(Network::Mainnet, "quorum_reached")).unwrap();

        let all = log.entries_since(0).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].1.kinds, vec!["expired"]);

        let recent = log.entries_since(2_000).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].0, 3_000);
        assert_eq!(recent[0].1.kinds, vec!["quorum_reached"]);
    }

    #[test]
    fn test_prune_before() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::open(tmp.path()).unwrap();

        for ts in [1_000, 2_000, 3_000] {
            log.append_at(ts, &entry(Network::Mainnet, "expired")).unwrap();
        }

        assert_eq!(log.prune_before(2_500).unwrap(), 2);
        let remaining = log.entries_since(0).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, 3_000);
        log.flush().unwrap();
    }

    #[test]
    fn test_prune_older_than_keeps_recent_entries() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::open(tmp.path()).unwrap();

        log.append_at(1_000, &entry(Network::Mainnet, "expired")).unwrap();
        log.append(&entry(Network::Testnet, "state_update")).unwrap();

        let removed = log.prune_older_than(Duration::from_secs(86_400)).unwrap();
        assert_eq!(removed, 1);
        let remaining = log.entries_since(0).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].1.kinds, vec!["state_update"]);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let tmp = TempDir::new().unwrap();
        {
            let log = AuditLog::open(tmp.path()).unwrap();
            log.append(&entry(Network::Mainnet, "expired")).unwrap();
            log.flush().unwrap();
        }
        let log = AuditLog::open(tmp.path()).unwrap();
        assert_eq!(log.entries_since(0).unwrap().len(), 1);
    }
}
