//! Meta jobs.
//!
//! Insights are pulled in two runs. `request_reports` submits one async
//! report per ad account and queues the references; `sync_insights` later
//! waits for each queued job, stores its rows and marks the reference
//! consumed. `sync_content` stores ad previews for the ads seen in the
//! ad-level insights.

use std::collections::{BTreeMap, HashMap};

use adsync_core::{
    collection_name, ContentDocument, Creative, KeyedDocument, Level, Platform, ReportReference,
    ReportStatus, SchedulerType,
};
use adsync_db::{insert_records, CredentialStore, DocumentStore, Filter, WriteOp};
use adsync_platforms::meta::{act_id, normalize_insight, preview_format};
use adsync_platforms::{MetaClient, PlatformError};
use chrono::Utc;
use serde_json::{Map, Value};

use super::{platform_id, replace_ops, upsert_batch, SyncWindow};
use crate::runner::{BatchRunner, RunSummary, WorkItem};

const CONTENT_COLLECTION: &str = "meta_content";

impl WorkItem for ReportReference {
    fn key(&self) -> String {
        format!("report {} ({})", self.reference, self.account_id)
    }
}

/// `meta_references` or `meta_references_<scheduler>`.
#[must_use]
pub fn references_collection(scheduler: SchedulerType) -> String {
    collection_name("meta", "references", None, scheduler)
}

fn status_set(status: ReportStatus) -> Map<String, Value> {
    let mut set = Map::new();
    set.insert("status".into(), Value::from(status.code()));
    set
}

// ---------------------------------------------------------------------------
// Report requests
// ---------------------------------------------------------------------------

/// Submit one insights job per bound ad account and queue its reference.
///
/// # Errors
///
/// Fails only when the account list cannot be loaded.
pub async fn request_reports(
    store: &dyn DocumentStore,
    credentials: &dyn CredentialStore,
    client: &MetaClient,
    runner: &BatchRunner,
    window: SyncWindow,
) -> anyhow::Result<RunSummary> {
    let platform_id = platform_id(credentials, Platform::Meta).await?;
    let accounts = credentials.list_account_tokens(platform_id).await?;
    let collection = references_collection(window.scheduler);
    let collection = collection.as_str();
    tracing::info!(accounts = accounts.len(), level = %window.level, "requesting meta reports");

    let summary = runner
        .run(
            &accounts,
            |account| async move {
                let reference = client
                    .start_async_job(
                        &account.account_id,
                        &account.access_token,
                        window.range,
                        window.level,
                        window.scheduler,
                    )
                    .await?;
                tracing::debug!(account = %account.account_id, reference = %reference, "meta report queued");
                Ok(vec![ReportReference {
                    account_id: act_id(&account.account_id),
                    access_token: account.access_token.clone(),
                    level: window.level,
                    reference,
                    date_start: window.range.start,
                    date_end: window.range.end,
                    created_at: Utc::now(),
                    status: ReportStatus::Pending,
                }])
            },
            |references| async move {
                let inserted = insert_records(store, collection, &references).await?;
                tracing::info!(collection, inserted, "meta references queued");
                anyhow::Ok(())
            },
        )
        .await;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Report consumption
// ---------------------------------------------------------------------------

/// Rows of one finished report plus the reference to mark consumed.
struct ConsumedReport {
    reference: Map<String, Value>,
    ops: Vec<WriteOp>,
}

async fn consume_report(
    store: &dyn DocumentStore,
    client: &MetaClient,
    references: &str,
    scheduler: SchedulerType,
    report: &ReportReference,
) -> anyhow::Result<Vec<ConsumedReport>> {
    match client
        .wait_for_job(&report.reference, &report.access_token)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(reference = %report.reference, "meta report still running, left pending");
            return Ok(Vec::new());
        }
        Err(PlatformError::JobFailed { status, .. }) => {
            tracing::warn!(reference = %report.reference, status = %status, "meta report failed, marking it");
            store
                .update_one(
                    references,
                    &Filter::from(KeyedDocument::key(report)),
                    &status_set(ReportStatus::Failed),
                )
                .await?;
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    }

    let rows = client
        .fetch_insights(&report.reference, &report.access_token)
        .await?;
    let ops = replace_ops(
        &report.reference,
        rows.iter().map(|row| normalize_insight(row, scheduler)),
    )?;
    tracing::debug!(
        reference = %report.reference,
        rows = rows.len(),
        documents = ops.len(),
        "meta report fetched"
    );
    Ok(vec![ConsumedReport {
        reference: KeyedDocument::key(report),
        ops,
    }])
}

/// Store the rows of every finished pending report at `level`.
///
/// # Errors
///
/// Fails only when the pending references cannot be read.
pub async fn sync_insights(
    store: &dyn DocumentStore,
    client: &MetaClient,
    runner: &BatchRunner,
    level: Level,
    scheduler: SchedulerType,
) -> anyhow::Result<RunSummary> {
    let references = references_collection(scheduler);
    let references = references.as_str();
    let insights = collection_name("meta", "insights", Some(level), scheduler);
    let insights = insights.as_str();

    let filter = Filter::new()
        .eq("status", ReportStatus::Pending.code())
        .eq("level", level.as_str());
    let pending: Vec<ReportReference> = store
        .find(references, &filter, None)
        .await?
        .into_iter()
        .filter_map(|doc| match serde_json::from_value::<ReportReference>(doc) {
            Ok(reference) => Some(reference),
            Err(e) => {
                tracing::warn!(collection = references, error = %e, "skipping malformed reference");
                None
            }
        })
        .collect();
    tracing::info!(pending = pending.len(), %level, "consuming meta reports");

    let summary = runner
        .run(
            &pending,
            |report| consume_report(store, client, references, scheduler, report),
            |consumed| async move {
                let mut ops = Vec::new();
                let mut marks = Vec::with_capacity(consumed.len());
                for report in consumed {
                    ops.extend(report.ops);
                    marks.push(WriteOp::update(
                        Filter::from(report.reference),
                        status_set(ReportStatus::Completed),
                    ));
                }
                if !ops.is_empty() {
                    upsert_batch(store, insights, ops).await?;
                }
                store.upsert_bulk(references, &marks).await?;
                anyhow::Ok(())
            },
        )
        .await;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Ad previews
// ---------------------------------------------------------------------------

/// One ad to fetch a preview for, with the placement it was shown in.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AdTarget {
    account_id: String,
    ad_id: String,
    publisher_platform: Option<String>,
    platform_position: Option<String>,
    access_token: String,
}

impl WorkItem for AdTarget {
    fn key(&self) -> String {
        format!("ad {}", self.ad_id)
    }
}

fn field(doc: &Value, name: &str) -> Option<String> {
    doc.get(name).and_then(Value::as_str).map(str::to_owned)
}

/// Distinct ads of the ad-level insights, first placement seen per ad,
/// limited to accounts that still have a valid token.
fn ad_targets(insight_rows: &[Value], tokens: &HashMap<String, String>) -> Vec<AdTarget> {
    let mut targets: BTreeMap<(String, String), AdTarget> = BTreeMap::new();
    for row in insight_rows {
        let (Some(account_id), Some(ad_id)) = (field(row, "account_id"), field(row, "ad_id")) else {
            continue;
        };
        let account_id = act_id(&account_id);
        let Some(access_token) = tokens.get(&account_id) else {
            continue;
        };
        targets
            .entry((account_id.clone(), ad_id.clone()))
            .or_insert_with(|| AdTarget {
                account_id,
                ad_id,
                publisher_platform: field(row, "publisher_platform"),
                platform_position: field(row, "platform_position"),
                access_token: access_token.clone(),
            });
    }
    targets.into_values().collect()
}

async fn fetch_preview(client: &MetaClient, target: &AdTarget) -> anyhow::Result<Vec<ContentDocument>> {
    let ad_format = preview_format(
        target.publisher_platform.as_deref(),
        target.platform_position.as_deref(),
    );
    let previews = client
        .fetch_ad_preview(&target.ad_id, &target.access_token, ad_format)
        .await?;
    let Some(preview) = previews.into_iter().next() else {
        tracing::debug!(ad = %target.ad_id, ad_format, "no preview returned");
        return Ok(Vec::new());
    };
    let creative = Creative::Preview {
        ad_format: ad_format.to_owned(),
        body: preview.body,
    };
    Ok(vec![ContentDocument::new(
        target.account_id.as_str(),
        target.ad_id.as_str(),
        creative,
    )])
}

/// Fetch a preview for every ad present in the ad-level insights.
///
/// # Errors
///
/// Fails only when the insights or account tokens cannot be read.
pub async fn sync_content(
    store: &dyn DocumentStore,
    credentials: &dyn CredentialStore,
    client: &MetaClient,
    runner: &BatchRunner,
) -> anyhow::Result<RunSummary> {
    let platform_id = platform_id(credentials, Platform::Meta).await?;
    let tokens: HashMap<String, String> = credentials
        .list_account_tokens(platform_id)
        .await?
        .into_iter()
        .map(|t| (act_id(&t.account_id), t.access_token))
        .collect();

    let insights = collection_name("meta", "insights", Some(Level::Ad), SchedulerType::Daily);
    let bound = Filter::new().any_of("account_id", tokens.keys().cloned().collect());
    let rows = store
        .find(
            &insights,
            &bound,
            Some(&["account_id", "ad_id", "publisher_platform", "platform_position"]),
        )
        .await?;
    let targets = ad_targets(&rows, &tokens);
    tracing::info!(ads = targets.len(), "fetching meta ad previews");

    let summary = runner
        .run(
            &targets,
            |target| fetch_preview(client, target),
            |documents| async move {
                let ops = documents
                    .iter()
                    .map(WriteOp::replace)
                    .collect::<Result<Vec<_>, _>>()?;
                upsert_batch(store, CONTENT_COLLECTION, ops).await
            },
        )
        .await;
    Ok(summary)
}

#[cfg(test)]
#[path = "meta_test.rs"]
mod tests;
