//! Batch Concurrency Runner.
//!
//! Items are split into fixed-size batches that run one after another.
//! Inside a batch every item is dispatched to a bounded worker pool; a
//! failing item is logged with its key and dropped while its siblings carry
//! on. Each batch's results go to the sink in one call before the next
//! batch starts.

use std::future::Future;

use adsync_core::RunnerConfig;
use adsync_db::{AccountToken, CredentialRow};
use futures::stream::{self, StreamExt};

/// Anything the runner can process: it only needs a key to log failures under.
pub trait WorkItem {
    fn key(&self) -> String;
}

impl WorkItem for AccountToken {
    fn key(&self) -> String {
        self.account_id.clone()
    }
}

impl WorkItem for CredentialRow {
    fn key(&self) -> String {
        format!("credential {}", self.id)
    }
}

impl WorkItem for String {
    fn key(&self) -> String {
        self.clone()
    }
}

/// Counts accumulated over one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub items: usize,
    pub failed_items: usize,
    pub records: usize,
    pub failed_batches: usize,
}

impl RunSummary {
    fn absorb(&mut self, batch: BatchOutcome) {
        self.items += batch.items;
        self.failed_items += batch.failed;
    }
}

struct BatchOutcome {
    items: usize,
    failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchRunner {
    batch_size: usize,
    max_concurrency: usize,
}

impl BatchRunner {
    /// Zero sizes are raised to one.
    #[must_use]
    pub fn new(batch_size: usize, max_concurrency: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_concurrency: max_concurrency.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.batch_size, config.max_concurrency)
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn run_batch<'a, I, T, W, Fut>(
        &self,
        batch: &'a [I],
        worker: &W,
        records: &mut Vec<T>,
    ) -> BatchOutcome
    where
        I: WorkItem,
        W: Fn(&'a I) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        let outcomes: Vec<(&I, anyhow::Result<Vec<T>>)> = stream::iter(batch)
            .map(|item| {
                let fut = worker(item);
                async move { (item, fut.await) }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut failed = 0;
        for (item, outcome) in outcomes {
            match outcome {
                Ok(produced) => records.extend(produced),
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::error!(item = %item.key(), error = %error, "work item failed");
                    failed += 1;
                }
            }
        }
        BatchOutcome {
            items: batch.len(),
            failed,
        }
    }

    /// Process `items` batch by batch, handing each batch's records to
    /// `sink`. A sink failure is logged and the next batch still runs.
    pub async fn run<'a, I, T, W, Fut, S, SFut>(
        &self,
        items: &'a [I],
        worker: W,
        sink: S,
    ) -> RunSummary
    where
        I: WorkItem,
        W: Fn(&'a I) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
        S: Fn(Vec<T>) -> SFut,
        SFut: Future<Output = anyhow::Result<()>>,
    {
        let mut summary = RunSummary::default();
        let batch_count = items.len().div_ceil(self.batch_size);

        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            let mut records = Vec::new();
            let outcome = self.run_batch(batch, &worker, &mut records).await;
            summary.absorb(outcome);

            if records.is_empty() {
                tracing::debug!(batch = index + 1, batch_count, "batch produced no records");
                continue;
            }
            let produced = records.len();
            match sink(records).await {
                Ok(()) => summary.records += produced,
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::error!(
                        batch = index + 1,
                        batch_count,
                        records = produced,
                        error = %error,
                        "batch persistence failed"
                    );
                    summary.failed_batches += 1;
                }
            }
        }

        if summary.failed_items > 0 {
            tracing::warn!(
                failed_items = summary.failed_items,
                total_items = summary.items,
                "some items failed during the run"
            );
        }
        summary
    }

    /// Process every batch and return all records together, for callers
    /// that write once at the end of the run.
    pub async fn collect<'a, I, T, W, Fut>(&self, items: &'a [I], worker: W) -> (Vec<T>, RunSummary)
    where
        I: WorkItem,
        W: Fn(&'a I) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        let mut summary = RunSummary::default();
        let mut records = Vec::new();
        for batch in items.chunks(self.batch_size) {
            let outcome = self.run_batch(batch, &worker, &mut records).await;
            summary.absorb(outcome);
        }
        summary.records = records.len();
        if summary.failed_items > 0 {
            tracing::warn!(
                failed_items = summary.failed_items,
                total_items = summary.items,
                "some items failed during the run"
            );
        }
        (records, summary)
    }
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
