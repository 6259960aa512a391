//! Component graph built from [`IngestConfig`].
//!
//! The daemon and the operator binaries all start from [`Components::build`],
//! so every entry point shares one write path and one store.

use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::audit::AuditLog;
use crate::backfill::{BackfillConfig, BackfillProcessor};
use crate::chain::{ChainClient, HttpChainClient};
use crate::codec::{BitcoinTxCodec, TxCodec};
use crate::config::IngestConfig;
use crate::crawler::PollingCrawler;
use crate::dispatcher::EventDispatcher;
use crate::follower::HeightFollower;
use crate::lifecycle::DelegationWriter;
use crate::reconcile::{ReconcileConfig, ReconciliationEngine};
use crate::stakers::StakerAggregateEngine;
use crate::store::SqliteStore;

pub struct Components {
    pub store: Arc<SqliteStore>,
    pub audit: Option<Arc<AuditLog>>,
    audit_retention: Option<Duration>,
    pub stakers: Arc<StakerAggregateEngine>,
    pub writer: Arc<DelegationWriter>,
    pub dispatcher: Arc<EventDispatcher>,
    pub reconciler: Arc<ReconciliationEngine>,
    pub backfill: Arc<BackfillProcessor>,
    pub crawler: Arc<PollingCrawler>,
    /// One per enabled network.
    pub followers: Vec<Arc<HeightFollower>>,
}

impl Components {
    pub fn build(config: &IngestConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.db_path)?);
        let audit = match &config.audit_path {
            Some(path) => Some(Arc::new(AuditLog::open(path)?)),
            None => None,
        };

        let mut clients: Vec<Arc<dyn ChainClient>> = Vec::with_capacity(config.networks.len());
        for endpoints in &config.networks {
            tracing::info!(
                network = %endpoints.network,
                rest_url = %endpoints.rest_url,
                rpc_url = %endpoints.rpc_url,
                "Chain client configured"
            );
            clients.push(Arc::new(HttpChainClient::new(endpoints)?));
        }

        let codec: Arc<dyn TxCodec> = Arc::new(BitcoinTxCodec);
        let stakers = Arc::new(StakerAggregateEngine::new(store.clone(), store.clone()));
        let writer = Arc::new(DelegationWriter::new(store.clone(), stakers.clone(), codec));
        let dispatcher = Arc::new(EventDispatcher::new(writer.clone(), audit.clone()));

        let reconciler = Arc::new(ReconciliationEngine::new(
            clients.clone(),
            writer.clone(),
            ReconcileConfig {
                batch_size: config.reconcile_batch_size,
                ..Default::default()
            },
        )?);

        let backfill = Arc::new(BackfillProcessor::new(
            clients.clone(),
            dispatcher.clone(),
            BackfillConfig {
                batch_size: config.backfill_batch_size,
                max_concurrent: config.backfill_max_concurrent,
                ..Default::default()
            },
        ));

        let crawler = Arc::new(PollingCrawler::new(clients.clone(), writer.clone()));

        let followers = clients
            .into_iter()
            .map(|client| {
                Arc::new(HeightFollower::new(
                    client,
                    backfill.clone(),
                    store.clone(),
                    config.follow_max_lag,
                ))
            })
            .collect();

        Ok(Self {
            store,
            audit,
            audit_retention: config.audit_retention,
            stakers,
            writer,
            dispatcher,
            reconciler,
            backfill,
            crawler,
            followers,
        })
    }

    /// Drop audit entries past the configured retention.
    ///
    /// Returns the number removed; zero when the log or retention is disabled.
    pub fn prune_audit(&self) -> Result<usize> {
        let (Some(audit), Some(retention)) = (&self.audit, self.audit_retention) else {
            return Ok(0);
        };
        let removed = audit.prune_older_than(retention)?;
        if removed > 0 {
            tracing::info!(removed, "Pruned audit log");
        }
        Ok(removed)
    }

    /// Flush buffered state before exit.
    pub fn shutdown(&self) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.flush() {
                tracing::warn!("Audit log flush failed: {}", e);
            }
        }
    }
}
