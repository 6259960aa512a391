//! SQLite-backed document store.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use staketrail_core::{Delegation, Network, Staker};

use super::{
    CheckpointStore, DelegationQuery, DelegationStore, Page, StakerQuery, StakerStore,
    StakerTotals, schema,
};
use crate::{Error, Result};

/// Delegation, staker, and checkpoint store on one SQLite database.
pub struct SqliteStore {
    /// SQLite connection (protected by mutex for thread safety).
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening document store at {}", path.display());
        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn unix_now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn decode_delegations(docs: Vec<String>) -> Result<Vec<Delegation>> {
        docs.iter()
            .map(|doc| serde_json::from_str(doc).map_err(Error::from))
            .collect()
    }

    fn decode_staker(doc: &str, version: i64) -> Result<Staker> {
        let mut staker: Staker = serde_json::from_str(doc)?;
        staker.version = from_sql_int(version, "version")?;
        Ok(staker)
    }

    /// WHERE clause and bound values for a delegation query.
    fn delegation_filter(query: &DelegationQuery) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(network) = query.network {
            clauses.push("network = ?".to_string());
            values.push(Value::Text(network.as_str().to_string()));
        }
        if !query.states.is_empty() {
            let marks = vec!["?"; query.states.len()].join(", ");
            clauses.push(format!("state IN ({})", marks));
            values.extend(
                query
                    .states
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some(staker) = &query.staker_address {
            clauses.push("staker_address = ?".to_string());
            values.push(Value::Text(staker.clone()));
        }
        if let Some(fp) = &query.finality_provider {
            clauses.push("finality_provider_btc_pk_hex = ?".to_string());
            values.push(Value::Text(fp.clone()));
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        (filter, values)
    }
}

/// SQLite integers are signed 64-bit; larger values are rejected, not wrapped.
fn to_sql_int(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| Error::Database(format!("{} out of range for SQLite: {}", field, value)))
}

fn from_sql_int(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| Error::Database(format!("Negative {} in database: {}", field, value)))
}

/// Integer columns of a delegation row.
struct DelegationColumns {
    total_sat: i64,
    staking_time: i64,
    start_height: i64,
    block_height: i64,
}

impl DelegationColumns {
    fn new(d: &Delegation) -> Result<Self> {
        Ok(Self {
            total_sat: to_sql_int(d.total_sat, "total_sat")?,
            staking_time: to_sql_int(d.staking_time, "staking_time")?,
            start_height: to_sql_int(d.start_height, "start_height")?,
            block_height: to_sql_int(d.block_height, "block_height")?,
        })
    }
}

/// Integer columns of a staker row.
struct StakerColumns {
    total_delegations_count: i64,
    active_delegations_count: i64,
    total_staked_sat: i64,
    active_staked_sat: i64,
    last_staking_time: Option<i64>,
}

impl StakerColumns {
    fn new(staker: &Staker) -> Result<Self> {
        Ok(Self {
            total_delegations_count: to_sql_int(
                staker.total_delegations_count,
                "total_delegations_count",
            )?,
            active_delegations_count: to_sql_int(
                staker.active_delegations_count,
                "active_delegations_count",
            )?,
            total_staked_sat: to_sql_int(staker.total_staked_sat, "total_staked_sat")?,
            active_staked_sat: to_sql_int(staker.active_staked_sat, "active_staked_sat")?,
            last_staking_time: staker
                .last_staking_time
                .map(|t| to_sql_int(t, "last_staking_time"))
                .transpose()?,
        })
    }
}

impl DelegationStore for SqliteStore {
    fn get_delegation(
        &self,
        network: Network,
        staking_tx_id_hex: &str,
    ) -> Result<Option<Delegation>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM delegations WHERE network = ? AND staking_tx_id_hex = ?",
                params![network.as_str(), staking_tx_id_hex],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        doc.map(|d| serde_json::from_str(&d).map_err(Error::from))
            .transpose()
    }

    fn find_delegation(
        &self,
        network: Network,
        staking_tx_hex: &str,
        staking_tx_id_hex: &str,
    ) -> Result<Option<Delegation>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM delegations
                 WHERE network = ?1 AND (staking_tx_id_hex = ?2 OR staking_tx_hex = ?3)
                 LIMIT 1",
                params![network.as_str(), staking_tx_id_hex, staking_tx_hex],
                |row| row.get(0),
            )
            .optional()?;
        drop(conn);

        doc.map(|d| serde_json::from_str(&d).map_err(Error::from))
            .transpose()
    }

    fn insert_delegation(&self, d: &Delegation) -> Result<bool> {
        let columns = DelegationColumns::new(d)?;
        let doc = serde_json::to_string(d)?;
        let now = Self::unix_now();
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO delegations (
                network, staking_tx_id_hex, staking_tx_hex, staker_address,
                finality_provider_btc_pk_hex, state, total_sat, staking_time,
                start_height, block_height, doc, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
             ON CONFLICT(network, staking_tx_id_hex) DO NOTHING",
            params![
                d.network.as_str(),
                d.staking_tx_id_hex,
                d.staking_tx_hex,
                d.staker_address,
                d.primary_finality_provider(),
                d.state.as_str(),
                columns.total_sat,
                columns.staking_time,
                columns.start_height,
                columns.block_height,
                doc,
                now,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn update_delegation(&self, d: &Delegation) -> Result<bool> {
        let columns = DelegationColumns::new(d)?;
        let doc = serde_json::to_string(d)?;
        let now = Self::unix_now();
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE delegations SET
                staking_tx_hex = ?3, staker_address = ?4, finality_provider_btc_pk_hex = ?5,
                state = ?6, total_sat = ?7, staking_time = ?8, start_height = ?9,
                block_height = ?10, doc = ?11, updated_at = ?12
             WHERE network = ?1 AND staking_tx_id_hex = ?2",
            params![
                d.network.as_str(),
                d.staking_tx_id_hex,
                d.staking_tx_hex,
                d.staker_address,
                d.primary_finality_provider(),
                d.state.as_str(),
                columns.total_sat,
                columns.staking_time,
                columns.start_height,
                columns.block_height,
                doc,
                now,
            ],
        )?;
        Ok(updated > 0)
    }

    fn delegations_by_staker(&self, staker_address: &str) -> Result<Vec<Delegation>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT doc FROM delegations WHERE staker_address = ? ORDER BY rowid")?;
        let docs = stmt
            .query_map([staker_address], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        Self::decode_delegations(docs)
    }

    fn delegation_staker_addresses(&self, after: Option<&str>, limit: u64) -> Result<Vec<String>> {
        let limit = to_sql_int(limit, "limit")?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT staker_address FROM delegations
             WHERE staker_address > ?1 ORDER BY staker_address ASC LIMIT ?2",
        )?;
        let addresses = stmt
            .query_map(params![after.unwrap_or(""), limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(addresses)
    }

    fn list_delegations(&self, query: &DelegationQuery) -> Result<Page<Delegation>> {
        let (filter, values) = Self::delegation_filter(query);
        let conn = self.conn.lock();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM delegations {}", filter),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )?;

        // Column and direction come from allow-listed enums, never from input.
        let sql = format!(
            "SELECT doc FROM delegations {} ORDER BY {} {}, staking_tx_id_hex ASC LIMIT ? OFFSET ?",
            filter,
            query.sort.column(),
            query.order.sql()
        );
        let mut windowed = values.clone();
        windowed.push(Value::Integer(to_sql_int(query.limit, "limit")?));
        windowed.push(Value::Integer(to_sql_int(query.offset, "offset")?));

        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(windowed.iter()), |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        Ok(Page {
            items: Self::decode_delegations(docs)?,
            total: from_sql_int(total, "count")?,
        })
    }
}

impl StakerStore for SqliteStore {
    fn get_staker(&self, staker_address: &str) -> Result<Option<Staker>> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT doc, version FROM stakers WHERE staker_address = ?",
                [staker_address],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        drop(conn);

        row.map(|(doc, version)| Self::decode_staker(&doc, version))
            .transpose()
    }

    fn save_staker(&self, staker: &Staker, expected: u64) -> Result<u64> {
        let columns = StakerColumns::new(staker)?;
        let doc = serde_json::to_string(staker)?;
        let now = Self::unix_now();
        let next = expected + 1;
        let next_sql = to_sql_int(next, "version")?;
        let expected_sql = to_sql_int(expected, "version")?;
        let conn = self.conn.lock();

        let changed = if expected == 0 {
            conn.execute(
                "INSERT INTO stakers (
                    staker_address, version, total_delegations_count, active_delegations_count,
                    total_staked_sat, active_staked_sat, last_staking_time, doc, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(staker_address) DO NOTHING",
                params![
                    staker.staker_address,
                    next_sql,
                    columns.total_delegations_count,
                    columns.active_delegations_count,
                    columns.total_staked_sat,
                    columns.active_staked_sat,
                    columns.last_staking_time,
                    doc,
                    now,
                ],
            )?
        } else {
            conn.execute(
                "UPDATE stakers SET
                    version = ?2, total_delegations_count = ?3, active_delegations_count = ?4,
                    total_staked_sat = ?5, active_staked_sat = ?6, last_staking_time = ?7,
                    doc = ?8, updated_at = ?9
                 WHERE staker_address = ?1 AND version = ?10",
                params![
                    staker.staker_address,
                    next_sql,
                    columns.total_delegations_count,
                    columns.active_delegations_count,
                    columns.total_staked_sat,
                    columns.active_staked_sat,
                    columns.last_staking_time,
                    doc,
                    now,
                    expected_sql,
                ],
            )?
        };

        if changed == 0 {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT version FROM stakers WHERE staker_address = ?",
                    [&staker.staker_address],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(Error::VersionConflict {
                staker_address: staker.staker_address.clone(),
                expected,
                found: found.and_then(|v| u64::try_from(v).ok()),
            });
        }

        Ok(next)
    }

    fn staker_addresses(&self, after: Option<&str>, limit: u64) -> Result<Vec<String>> {
        let limit = to_sql_int(limit, "limit")?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT staker_address FROM stakers
             WHERE staker_address > ?1 ORDER BY staker_address ASC LIMIT ?2",
        )?;
        let addresses = stmt
            .query_map(params![after.unwrap_or(""), limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(addresses)
    }

    fn list_stakers(&self, query: &StakerQuery) -> Result<Page<Staker>> {
        let limit = to_sql_int(query.limit, "limit")?;
        let offset = to_sql_int(query.offset, "offset")?;
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM stakers", [], |row| row.get(0))?;

        let sql = format!(
            "SELECT doc, version FROM stakers ORDER BY {} {}, staker_address ASC LIMIT ? OFFSET ?",
            query.sort.column(),
            query.order.sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit, offset], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(conn);

        let items = rows
            .iter()
            .map(|(doc, version)| Self::decode_staker(doc, *version))
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total: from_sql_int(total, "count")?,
        })
    }

    fn staker_totals(&self, network: Option<Network>) -> Result<StakerTotals> {
        let conn = self.conn.lock();
        let (count, total, active): (i64, i64, i64) = match network {
            None => conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(total_staked_sat), 0), COALESCE(SUM(active_staked_sat), 0)
                 FROM stakers WHERE total_delegations_count > 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?,
            Some(network) => {
                let base = format!("$.networks.{}", network.as_str());
                conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(json_extract(doc, ?1 || '.total_staked_sat')), 0),
                            COALESCE(SUM(json_extract(doc, ?1 || '.active_staked_sat')), 0)
                     FROM stakers
                     WHERE json_extract(doc, ?1 || '.total_delegations') > 0",
                    [&base],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
            }
        };

        Ok(StakerTotals {
            staker_count: from_sql_int(count, "count")?,
            total_staked_sat: from_sql_int(total, "total_staked_sat")?,
            active_staked_sat: from_sql_int(active, "active_staked_sat")?,
        })
    }
}

impl CheckpointStore for SqliteStore {
    fn get_checkpoint(&self, key: &str) -> Result<Option<u64>> {
        let conn = self.conn.lock();
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM ingestion_checkpoint WHERE key = ?",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        value.map(|v| from_sql_int(v, key)).transpose()
    }

    fn set_checkpoint(&self, key: &str, value: u64) -> Result<()> {
        let value = to_sql_int(value, key)?;
        let now = Self::unix_now();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ingestion_checkpoint (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, now],
        )
        .map_err(|e| Error::Database(format!("Failed to update checkpoint: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DelegationSortField, SortOrder, StakerSortField};
    use crate::testing::delegation;
    use staketrail_core::DelegationState;

    #[test]
    fn test_insert_is_idempotent_by_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let d = delegation("t1", "bbn1abc", 1_000, 100, DelegationState::Pending);

        assert!(store.insert_delegation(&d).unwrap());
        let mut again = d.clone();
        again.state = DelegationState::Active;
        assert!(!store.insert_delegation(&again).unwrap());

        let stored = store.get_delegation(Network::Mainnet, "t1").unwrap().unwrap();
        assert_eq!(stored.state, DelegationState::Pending);
        // Same txid on the other network is a different row.
        let mut testnet = d.clone();
        testnet.network = Network::Testnet;
        assert!(store.insert_delegation(&testnet).unwrap());
    }

    #[test]
    fn test_find_by_hex_or_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let d = delegation("t1", "bbn1abc", 1_000, 100, DelegationState::Pending);
        store.insert_delegation(&d).unwrap();

        let by_hex = store
            .find_delegation(Network::Mainnet, &d.staking_tx_hex, "other")
            .unwrap();
        assert!(by_hex.is_some());
        let by_id = store.find_delegation(Network::Mainnet, "ffff", "t1").unwrap();
        assert!(by_id.is_some());
        assert!(
            store
                .find_delegation(Network::Testnet, &d.staking_tx_hex, "t1")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_update_requires_existing_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut d = delegation("t1", "bbn1abc", 1_000, 100, DelegationState::Pending);
        assert!(!store.update_delegation(&d).unwrap());

        store.insert_delegation(&d).unwrap();
        d.state = DelegationState::Verified;
        assert!(store.update_delegation(&d).unwrap());
        assert_eq!(
            store
                .get_delegation(Network::Mainnet, "t1")
                .unwrap()
                .unwrap()
                .state,
            DelegationState::Verified
        );
    }

    #[test]
    fn test_delegations_by_staker_in_insertion_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (txid, time) in [("t3", 300), ("t1", 100), ("t2", 200)] {
            store
                .insert_delegation(&delegation(txid, "bbn1abc", 10, time, DelegationState::Active))
                .unwrap();
        }
        store
            .insert_delegation(&delegation("x", "bbn1other", 10, 1, DelegationState::Active))
            .unwrap();

        let ids: Vec<String> = store
            .delegations_by_staker("bbn1abc")
            .unwrap()
            .into_iter()
            .map(|d| d.staking_tx_id_hex)
            .collect();
        assert_eq!(ids, vec!["t3", "t1", "t2"]);
    }

    #[test]
    fn test_list_filters_sorts_and_windows() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (i, state) in [
            DelegationState::Pending,
            DelegationState::Verified,
            DelegationState::Active,
            DelegationState::Pending,
        ]
        .into_iter()
        .enumerate()
        {
            let txid = format!("t{}", i);
            let d = delegation(&txid, "bbn1abc", 100 * (i as u64 + 1), i as u64, state);
            store.insert_delegation(&d).unwrap();
        }

        let page = store
            .list_delegations(&DelegationQuery {
                network: Some(Network::Mainnet),
                states: DelegationState::TRANSIENT.to_vec(),
                sort: DelegationSortField::TotalSat,
                order: SortOrder::Desc,
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<&str> = page
            .items
            .iter()
            .map(|d| d.staking_tx_id_hex.as_str())
            .collect();
        assert_eq!(ids, vec!["t3", "t1"]);

        let by_fp = store
            .delegations_by_finality_provider("fp-a", &DelegationQuery::default())
            .unwrap();
        assert_eq!(by_fp.total, 4);
        let none = store
            .delegations_by_finality_provider("fp-z", &DelegationQuery::default())
            .unwrap();
        assert_eq!(none.total, 0);
    }

    #[test]
    fn test_save_staker_detects_conflicts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut staker = Staker::new("bbn1abc");
        staker.total_staked_sat = 10;

        let v1 = store.save_staker(&staker, 0).unwrap();
        assert_eq!(v1, 1);
        // A second creator loses.
        let err = store.save_staker(&staker, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::VersionConflict {
                expected: 0,
                found: Some(1),
                ..
            }
        ));

        let loaded = store.get_staker("bbn1abc").unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        let v2 = store.save_staker(&loaded, loaded.version).unwrap();
        assert_eq!(v2, 2);
        // A writer holding the stale version loses.
        assert!(store.save_staker(&loaded, 1).unwrap_err().is_version_conflict());
    }

    #[test]
    fn test_staker_listing_and_totals() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (address, total, active) in [("bbn1a", 100, 50), ("bbn1b", 300, 0), ("bbn1c", 0, 0)] {
            let mut staker = Staker::new(address);
            staker.total_staked_sat = total;
            staker.active_staked_sat = active;
            if total > 0 {
                staker.total_delegations_count = 1;
                staker.networks.mainnet.total_delegations = 1;
                staker.networks.mainnet.total_staked_sat = total;
                staker.networks.mainnet.active_staked_sat = active;
            }
            store.save_staker(&staker, 0).unwrap();
        }

        let page = store
            .list_stakers(&StakerQuery {
                sort: StakerSortField::TotalStakedSat,
                order: SortOrder::Desc,
                offset: 0,
                limit: 2,
            })
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].staker_address, "bbn1b");
        assert_eq!(page.items[1].staker_address, "bbn1a");

        let totals = store.staker_totals(None).unwrap();
        assert_eq!(totals.staker_count, 2);
        assert_eq!(totals.total_staked_sat, 400);
        assert_eq!(totals.active_staked_sat, 50);

        let mainnet = store.staker_totals(Some(Network::Mainnet)).unwrap();
        assert_eq!(mainnet.staker_count, 2);
        assert_eq!(mainnet.total_staked_sat, 400);
        let testnet = store.staker_totals(Some(Network::Testnet)).unwrap();
        assert_eq!(testnet.staker_count, 0);

        let addresses = store.staker_addresses(None, 2).unwrap();
        assert_eq!(addresses, vec!["bbn1a", "bbn1b"]);
        let rest = store.staker_addresses(Some("bbn1b"), 2).unwrap();
        assert_eq!(rest, vec!["bbn1c"]);
    }

    #[test]
    fn test_out_of_range_integers_are_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        let huge = delegation("t1", "bbn1abc", u64::MAX, 100, DelegationState::Pending);
        assert!(matches!(store.insert_delegation(&huge), Err(Error::Database(_))));
        assert!(store.get_delegation(Network::Mainnet, "t1").unwrap().is_none());

        let mut staker = Staker::new("bbn1abc");
        staker.total_staked_sat = u64::MAX;
        assert!(matches!(store.save_staker(&staker, 0), Err(Error::Database(_))));
        assert!(store.get_staker("bbn1abc").unwrap().is_none());

        assert!(store.set_checkpoint("follower:mainnet", u64::MAX).is_err());
        assert_eq!(store.get_checkpoint("follower:mainnet").unwrap(), None);
    }

    #[test]
    fn test_delegation_staker_addresses_are_distinct() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (txid, staker) in [("t1", "bbn1b"), ("t2", "bbn1a"), ("t3", "bbn1b"), ("t4", "bbn1c")] {
            store
                .insert_delegation(&delegation(txid, staker, 10, 1, DelegationState::Active))
                .unwrap();
        }

        assert_eq!(
            store.delegation_staker_addresses(None, 2).unwrap(),
            vec!["bbn1a", "bbn1b"]
        );
        assert_eq!(
            store.delegation_staker_addresses(Some("bbn1b"), 2).unwrap(),
            vec!["bbn1c"]
        );
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get_checkpoint("follower:mainnet").unwrap(), None);
        store.set_checkpoint("follower:mainnet", 100).unwrap();
        store.set_checkpoint("follower:mainnet", 120).unwrap();
        assert_eq!(store.get_checkpoint("follower:mainnet").unwrap(), Some(120));
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("staketrail.db");
        let store = SqliteStore::open(&path).unwrap();
        store
            .insert_delegation(&delegation("t1", "bbn1abc", 1, 1, DelegationState::Pending))
            .unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert!(reopened.get_delegation(Network::Mainnet, "t1").unwrap().is_some());
    }
}
