//! Scheduled jobs: token upkeep and the per-platform data pulls.
//!
//! Every job resolves its work items from the credential store, runs them
//! through a [`BatchRunner`](crate::BatchRunner) and persists each batch
//! with one bulk write.

pub mod google_ads;
pub mod meta;
pub mod shopee;
pub mod tiktok;
pub mod tokens;

use adsync_core::{DateRange, KeyedDocument, Level, Platform, SchedulerType, ShapeError};
use adsync_db::{CredentialStore, DocumentStore, WriteOp};

/// What a metrics pull covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub level: Level,
    pub scheduler: SchedulerType,
    pub range: DateRange,
}

/// Relational id of `platform`.
pub(crate) async fn platform_id(
    credentials: &dyn CredentialStore,
    platform: Platform,
) -> anyhow::Result<i64> {
    let row = credentials
        .platform_by_name(platform.store_name())
        .await?
        .ok_or_else(|| anyhow::anyhow!("platform '{}' is not registered", platform.store_name()))?;
    Ok(row.id)
}

/// Replace-upsert ops for every normalized document. Rows that failed to
/// normalize are logged under `item` and skipped.
pub(crate) fn replace_ops<D: KeyedDocument>(
    item: &str,
    results: impl IntoIterator<Item = Result<Option<D>, ShapeError>>,
) -> anyhow::Result<Vec<WriteOp>> {
    let mut ops = Vec::new();
    for result in results {
        match result {
            Ok(Some(doc)) => ops.push(WriteOp::replace(&doc)?),
            Ok(None) => {}
            Err(e) => tracing::warn!(item, error = %e, "skipping malformed record"),
        }
    }
    Ok(ops)
}

/// One bulk upsert of a batch's operations.
pub(crate) async fn upsert_batch(
    store: &dyn DocumentStore,
    collection: &str,
    ops: Vec<WriteOp>,
) -> anyhow::Result<()> {
    let written = store.upsert_bulk(collection, &ops).await?;
    tracing::info!(collection, operations = ops.len(), written, "batch persisted");
    Ok(())
}
