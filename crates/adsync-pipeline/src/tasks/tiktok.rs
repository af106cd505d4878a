//! TikTok metrics and creative pulls.

use adsync_core::{collection_name, Platform, SchedulerType};
use adsync_db::{AccountToken, CredentialStore, DocumentStore, WriteOp};
use adsync_platforms::tiktok::{
    normalize_content, normalize_insight, referenced_assets, AssetIndex, AssetKind,
};
use adsync_platforms::TikTokClient;

use super::{platform_id, replace_ops, upsert_batch, SyncWindow};
use crate::runner::{BatchRunner, RunSummary};

const PREFIX: &str = "tiktok";

/// Pull metrics for every bound advertiser into
/// `tiktok_insights_<level>[_live]`.
///
/// # Errors
///
/// Fails only when the advertiser list cannot be loaded.
pub async fn sync_insights(
    store: &dyn DocumentStore,
    credentials: &dyn CredentialStore,
    client: &TikTokClient,
    runner: &BatchRunner,
    window: SyncWindow,
) -> anyhow::Result<RunSummary> {
    let platform_id = platform_id(credentials, Platform::TikTok).await?;
    let advertisers = credentials.list_account_tokens(platform_id).await?;
    let collection = collection_name(PREFIX, "insights", Some(window.level), window.scheduler);
    let collection = collection.as_str();
    tracing::info!(advertisers = advertisers.len(), collection, "pulling tiktok metrics");

    let summary = runner
        .run(
            &advertisers,
            |advertiser| async move {
                let rows = client
                    .fetch_metrics(
                        &advertiser.account_id,
                        &advertiser.access_token,
                        window.range,
                        window.level,
                        window.scheduler,
                    )
                    .await?;
                replace_ops(
                    &advertiser.account_id,
                    rows.iter().map(|row| {
                        normalize_insight(
                            &advertiser.account_id,
                            row,
                            window.level,
                            window.scheduler,
                            window.range,
                        )
                    }),
                )
            },
            |ops| upsert_batch(store, collection, ops),
        )
        .await;
    Ok(summary)
}

/// Ads of one advertiser with their video or image creative resolved.
async fn advertiser_content(
    client: &TikTokClient,
    advertiser: &AccountToken,
) -> anyhow::Result<Vec<WriteOp>> {
    let id = advertiser.account_id.as_str();
    let token = advertiser.access_token.as_str();

    let ads = client.fetch_ads(id, token).await?;
    let (video_ids, image_ids) = referenced_assets(&ads);
    let videos = if video_ids.is_empty() {
        Vec::new()
    } else {
        client
            .fetch_content_details(id, token, AssetKind::Video, &video_ids)
            .await?
    };
    let images = if image_ids.is_empty() {
        Vec::new()
    } else {
        client
            .fetch_content_details(id, token, AssetKind::Image, &image_ids)
            .await?
    };
    tracing::debug!(
        advertiser = id,
        ads = ads.len(),
        videos = videos.len(),
        images = images.len(),
        "tiktok assets resolved"
    );

    let assets = AssetIndex::new(videos, images);
    replace_ops(id, ads.iter().map(|ad| normalize_content(id, ad, &assets)))
}

/// Pull ad creatives for every bound advertiser into `tiktok_content`.
///
/// # Errors
///
/// Fails only when the advertiser list cannot be loaded.
pub async fn sync_content(
    store: &dyn DocumentStore,
    credentials: &dyn CredentialStore,
    client: &TikTokClient,
    runner: &BatchRunner,
) -> anyhow::Result<RunSummary> {
    let platform_id = platform_id(credentials, Platform::TikTok).await?;
    let advertisers = credentials.list_account_tokens(platform_id).await?;
    let collection = collection_name(PREFIX, "content", None, SchedulerType::Daily);
    let collection = collection.as_str();
    tracing::info!(advertisers = advertisers.len(), "pulling tiktok creatives");

    let summary = runner
        .run(
            &advertisers,
            |advertiser| advertiser_content(client, advertiser),
            |ops| upsert_batch(store, collection, ops),
        )
        .await;
    Ok(summary)
}
