//! Google Ads metrics and creative pulls, one GAQL search per customer.

use adsync_core::{collection_name, DateRange, Platform, SchedulerType};
use adsync_db::{CredentialStore, DocumentStore};
use adsync_platforms::google::{normalize_content, normalize_insight};
use adsync_platforms::GoogleAdsClient;

use super::{platform_id, replace_ops, upsert_batch, SyncWindow};
use crate::runner::{BatchRunner, RunSummary};

const PREFIX: &str = "google_ads";

/// Pull metrics for every bound customer into
/// `google_ads_insights_<level>[_live]`.
///
/// # Errors
///
/// Fails only when the customer list cannot be loaded.
pub async fn sync_insights(
    store: &dyn DocumentStore,
    credentials: &dyn CredentialStore,
    client: &GoogleAdsClient,
    runner: &BatchRunner,
    window: SyncWindow,
) -> anyhow::Result<RunSummary> {
    let platform_id = platform_id(credentials, Platform::GoogleAds).await?;
    let customers = credentials.list_account_tokens(platform_id).await?;
    let collection = collection_name(PREFIX, "insights", Some(window.level), window.scheduler);
    let collection = collection.as_str();
    tracing::info!(customers = customers.len(), collection, "pulling google ads metrics");

    let summary = runner
        .run(
            &customers,
            |customer| async move {
                let rows = client
                    .fetch_metrics(
                        &customer.account_id,
                        &customer.access_token,
                        window.range,
                        window.level,
                        window.scheduler,
                    )
                    .await?;
                replace_ops(
                    &customer.account_id,
                    rows.iter().map(|row| {
                        normalize_insight(&customer.account_id, row, window.scheduler, window.range)
                    }),
                )
            },
            |ops| upsert_batch(store, collection, ops),
        )
        .await;
    Ok(summary)
}

/// Pull the creatives of enabled ads into `google_ads_content`.
///
/// # Errors
///
/// Fails only when the customer list cannot be loaded.
pub async fn sync_content(
    store: &dyn DocumentStore,
    credentials: &dyn CredentialStore,
    client: &GoogleAdsClient,
    runner: &BatchRunner,
    range: DateRange,
) -> anyhow::Result<RunSummary> {
    let platform_id = platform_id(credentials, Platform::GoogleAds).await?;
    let customers = credentials.list_account_tokens(platform_id).await?;
    let collection = collection_name(PREFIX, "content", None, SchedulerType::Daily);
    let collection = collection.as_str();
    tracing::info!(customers = customers.len(), "pulling google ads creatives");

    let summary = runner
        .run(
            &customers,
            |customer| async move {
                let rows = client
                    .fetch_content(&customer.account_id, &customer.access_token, range)
                    .await?;
                replace_ops(
                    &customer.account_id,
                    rows.iter()
                        .map(|row| normalize_content(&customer.account_id, row).map(Some)),
                )
            },
            |ops| upsert_batch(store, collection, ops),
        )
        .await;
    Ok(summary)
}
