//! SQLite schema for the delegation mirror.
//!
//! Rows carry the full record as a JSON document plus the handful of columns
//! that lookups, filters, and allow-listed sorts need.

use rusqlite::Connection;

use crate::{Error, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables on a fresh database and refuse one written by a newer build.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version > SCHEMA_VERSION {
        return Err(Error::Database(format!(
            "schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per staking transaction per network
        CREATE TABLE IF NOT EXISTS delegations (
            network TEXT NOT NULL,
            staking_tx_id_hex TEXT NOT NULL,
            staking_tx_hex TEXT NOT NULL,
            staker_address TEXT NOT NULL,
            finality_provider_btc_pk_hex TEXT,
            state TEXT NOT NULL,
            total_sat INTEGER NOT NULL,
            staking_time INTEGER NOT NULL,
            start_height INTEGER NOT NULL,
            block_height INTEGER NOT NULL,
            doc TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (network, staking_tx_id_hex)
        );

        -- Per-staker aggregate documents
        CREATE TABLE IF NOT EXISTS stakers (
            staker_address TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            total_delegations_count INTEGER NOT NULL,
            active_delegations_count INTEGER NOT NULL,
            total_staked_sat INTEGER NOT NULL,
            active_staked_sat INTEGER NOT NULL,
            last_staking_time INTEGER,
            doc TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_delegations_tx_hex ON delegations(network, staking_tx_hex);
        CREATE INDEX IF NOT EXISTS idx_delegations_staker ON delegations(staker_address);
        CREATE INDEX IF NOT EXISTS idx_delegations_fp ON delegations(finality_provider_btc_pk_hex);
        CREATE INDEX IF NOT EXISTS idx_delegations_state ON delegations(network, state);
        CREATE INDEX IF NOT EXISTS idx_delegations_staking_time ON delegations(staking_time DESC);
        CREATE INDEX IF NOT EXISTS idx_stakers_total ON stakers(total_staked_sat DESC);

        -- Follower checkpoints (last fully processed height per network)
        CREATE TABLE IF NOT EXISTS ingestion_checkpoint (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#,
    )?;

    Ok(())
}
