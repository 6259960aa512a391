//! Ingestion configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use staketrail_core::Network;

use crate::{Error, Result};

/// Chain endpoints for one enabled network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoints {
    pub network: Network,
    /// LCD/REST base URL (delegation queries).
    pub rest_url: String,
    /// CometBFT RPC base URL (block results, status).
    pub rpc_url: String,
}

/// Ingestion configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Enabled networks; never empty.
    pub networks: Vec<NetworkEndpoints>,

    /// SQLite document store path.
    pub db_path: PathBuf,

    /// RocksDB audit log directory (`None` disables the audit log).
    pub audit_path: Option<PathBuf>,

    /// Age past which audit entries are pruned (`None` keeps everything).
    pub audit_retention: Option<Duration>,

    /// `None` disables the corresponding periodic task.
    pub reconcile_interval: Option<Duration>,
    pub crawl_interval: Option<Duration>,
    pub follow_interval: Option<Duration>,
    pub recalc_interval: Option<Duration>,

    pub reconcile_batch_size: usize,
    pub backfill_batch_size: usize,
    pub backfill_max_concurrent: usize,

    /// Maximum heights the follower processes per tick.
    pub follow_max_lag: u64,
}

impl IngestConfig {
    /// Load configuration from environment variables.
    ///
    /// Networks (a network is enabled when its REST URL is set; the RPC URL
    /// defaults to the REST URL):
    /// - `MAINNET_REST_URL`, `MAINNET_RPC_URL`
    /// - `TESTNET_REST_URL`, `TESTNET_RPC_URL`
    ///
    /// Optional:
    /// - `STAKETRAIL_DB_PATH` (default: `./data/staketrail.db`)
    /// - `STAKETRAIL_AUDIT_PATH` (default: `./data/audit`, empty disables)
    /// - `AUDIT_RETENTION_DAYS` (30; `0` keeps every entry)
    /// - `RECONCILE_INTERVAL_SECS` (300), `CRAWL_INTERVAL_SECS` (120),
    ///   `FOLLOW_INTERVAL_SECS` (6), `RECALC_INTERVAL_SECS` (3600); `0` disables
    /// - `RECONCILE_BATCH_SIZE` (100), `BACKFILL_BATCH_SIZE` (20),
    ///   `BACKFILL_MAX_CONCURRENT` (5), `FOLLOW_MAX_LAG` (1000)
    pub fn from_env() -> Result<Self> {
        let mut networks = Vec::new();
        for network in Network::ALL {
            let prefix = network.as_str().to_ascii_uppercase();
            let Some(rest_url) = env_url(&format!("{}_REST_URL", prefix)) else {
                continue;
            };
            let rpc_url =
                env_url(&format!("{}_RPC_URL", prefix)).unwrap_or_else(|| rest_url.clone());
            networks.push(NetworkEndpoints {
                network,
                rest_url,
                rpc_url,
            });
        }

        if networks.is_empty() {
            return Err(Error::Config(
                "no network configured: set MAINNET_REST_URL and/or TESTNET_REST_URL".into(),
            ));
        }

        let db_path = std::env::var("STAKETRAIL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/staketrail.db"));

        let audit_path = match std::env::var("STAKETRAIL_AUDIT_PATH") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) => Some(PathBuf::from("./data/audit")),
        };

        let config = Self {
            networks,
            db_path,
            audit_path,
            audit_retention: env_days("AUDIT_RETENTION_DAYS", 30)?,
            reconcile_interval: env_interval("RECONCILE_INTERVAL_SECS", 300)?,
            crawl_interval: env_interval("CRAWL_INTERVAL_SECS", 120)?,
            follow_interval: env_interval("FOLLOW_INTERVAL_SECS", 6)?,
            recalc_interval: env_interval("RECALC_INTERVAL_SECS", 3600)?,
            reconcile_batch_size: env_positive("RECONCILE_BATCH_SIZE", 100)?,
            backfill_batch_size: env_positive("BACKFILL_BATCH_SIZE", 20)?,
            backfill_max_concurrent: env_positive("BACKFILL_MAX_CONCURRENT", 5)?,
            follow_max_lag: env_positive("FOLLOW_MAX_LAG", 1000)?,
        };

        tracing::info!(
            networks = ?config.networks.iter().map(|n| n.network.as_str()).collect::<Vec<_>>(),
            db_path = %config.db_path.display(),
            audit = config.audit_path.is_some(),
            audit_retention = ?config.audit_retention,
            reconcile_interval = ?config.reconcile_interval,
            crawl_interval = ?config.crawl_interval,
            follow_interval = ?config.follow_interval,
            recalc_interval = ?config.recalc_interval,
            "ingest configuration loaded"
        );

        Ok(config)
    }

    pub fn endpoints(&self, network: Network) -> Option<&NetworkEndpoints> {
        self.networks.iter().find(|n| n.network == network)
    }
}

fn env_url(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}='{}': {}", key, raw, e))),
        _ => Ok(default),
    }
}

fn env_interval(key: &str, default_secs: u64) -> Result<Option<Duration>> {
    let secs: u64 = env_parse(key, default_secs)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn env_days(key: &str, default_days: u64) -> Result<Option<Duration>> {
    let days: u64 = env_parse(key, default_days)?;
    Ok((days > 0).then(|| Duration::from_secs(days.saturating_mul(86_400))))
}

fn env_positive<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value = env_parse(key, default)?;
    if value == T::default() {
        return Err(Error::Config(format!("{} must be greater than zero", key)));
    }
    Ok(value)
}
