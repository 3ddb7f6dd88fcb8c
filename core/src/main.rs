//! Kestrel Node
//!
//! Runs the operator pipeline against an in-process settlement contract.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Kestrel Node                              │
//! │                                                                  │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │ Settlement  │  │  Pipeline   │  │    Prover Service       │  │
//! │  │ (in-process)│◀─│  (tokio)    │─▶│    (dedicated thread)   │  │
//! │  └─────────────┘  └──────┬──────┘  └─────────────────────────┘  │
//! │                          ▼                                       │
//! │                   ┌─────────────┐                                │
//! │                   │   RocksDB   │                                │
//! │                   └─────────────┘                                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use kestrel_core::config::KestrelConfig;
use kestrel_core::sequencer::{PipelineService, PipelineState, RocksDbStore};
use kestrel_crypto::empty_root;
use kestrel_settlement::{SettlementContract, SharedSettlement};

const STATS_INTERVAL_SECS: u64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = KestrelConfig::load()?;
    let pipeline_config = config.to_pipeline_config();
    info!(
        db = %config.database.path,
        depth = config.tree.depth,
        prover = ?pipeline_config.prover_mode,
        "kestrel node starting"
    );

    let db = Arc::new(
        RocksDbStore::open(&config.database.path)
            .with_context(|| format!("failed to open database at {}", config.database.path))?,
    );
    if db.root()?.is_some() {
        warn!("database holds settled state but the in-process contract starts at genesis");
    }

    // one backend for both sides: the contract verifies what the operator proves
    let backend = pipeline_config.prover_mode.backend();
    let contract = SharedSettlement::new(SettlementContract::new(
        empty_root(config.tree.depth),
        backend.clone(),
    ));

    let pipeline = PipelineService::start(db, pipeline_config, contract, backend)?;

    let mut ticker = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match pipeline.stats().await {
                    Ok(stats) => {
                        if let PipelineState::Paused { reason } = &stats.state {
                            warn!(%reason, "pipeline paused");
                        }
                        info!(
                            pending = stats.batch_stats.pending_txs,
                            accounts = stats.batch_stats.accounts,
                            settled = stats.batches_settled,
                            discarded = stats.batches_discarded,
                            root = %hex::encode(stats.batch_stats.root),
                            "pipeline stats"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "pipeline stopped responding");
                        break;
                    }
                }
            }
            result = signal::ctrl_c() => {
                result?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = pipeline.shutdown().await {
        error!(error = %e, "error shutting down pipeline");
    }
    info!("kestrel node stopped");
    Ok(())
}
