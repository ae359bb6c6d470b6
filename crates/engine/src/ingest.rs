//! Boundary for inbound batches.
//!
//! Each batch is validated in full before the store sees any of it.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use configuration::EngineConfig;
use core_types::{FxBatch, PriceBatch, SignalBatch};
use database::DbRepository;
use tracing::info;

pub async fn ingest_signals(repo: &DbRepository, batch: &SignalBatch) -> Result<usize, EngineError> {
    let batch = batch.validated()?;
    let count = repo.upsert_signals(&batch).await?;
    info!(date = %batch.as_of_date, run = %batch.model_run_id, count, "Ingested signals");
    Ok(count)
}

/// Prices without a currency are taken to be in `fx.default_quote_ccy`.
pub async fn ingest_prices(
    repo: &DbRepository,
    config: &EngineConfig,
    batch: &PriceBatch,
) -> Result<usize, EngineError> {
    let batch = batch.validated(&config.fx.default_quote_ccy)?;
    let count = repo.upsert_prices(&batch).await?;
    info!(date = %batch.as_of_date, count, "Ingested prices");
    Ok(count)
}

pub async fn ingest_fx_rates(
    repo: &DbRepository,
    batch: &FxBatch,
    ts: DateTime<Utc>,
) -> Result<usize, EngineError> {
    let batch = batch.validated()?;
    let count = repo.insert_fx_rates(&batch, ts).await?;
    info!(base = %batch.base, provider = %batch.provider, count, "Ingested FX rates");
    Ok(count)
}
