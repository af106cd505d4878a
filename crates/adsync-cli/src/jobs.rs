//! Task catalogue and dispatch.
//!
//! Each task builds only the clients it needs, so a missing secret for one
//! platform never blocks the jobs of another.

use adsync_core::{AppConfig, Platform};
use adsync_db::{PgCredentialStore, PgDocumentStore, PoolConfig};
use adsync_pipeline::notify::{self, NotifyReport};
use adsync_pipeline::tasks::{google_ads, meta, shopee, tiktok, tokens};
use adsync_pipeline::{BatchRunner, RunSummary, SmtpMailer, SyncWindow};
use adsync_platforms::{
    GoogleAdsClient, GoogleOAuth, HttpFetcher, MetaClient, ShopeeClient, TikTokClient,
    TokenAuthority,
};
use chrono::Utc;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    RefreshToken(Platform),
    CheckTokenValidity(Platform),
    TokenExpiredNotification,
    MetaDailyReferences,
    MetaInsights,
    MetaContent,
    GoogleAdsInsights,
    GoogleAdsContent,
    TikTokMetrics,
    TikTokContent,
    ShopeeOrders,
    Migrate,
}

fn platform_from_slug(slug: &str) -> Option<Platform> {
    Platform::ALL.into_iter().find(|p| p.slug() == slug)
}

impl Task {
    /// Resolve a task from its command-line name.
    pub fn from_name(name: &str) -> Option<Self> {
        let task = match name {
            "token_expired_notification" => Task::TokenExpiredNotification,
            "meta_daily_references" => Task::MetaDailyReferences,
            "meta_insights" => Task::MetaInsights,
            "meta_content" => Task::MetaContent,
            "google_ads_insights" => Task::GoogleAdsInsights,
            "google_ads_content" => Task::GoogleAdsContent,
            "tiktok_metrics" => Task::TikTokMetrics,
            "tiktok_content" => Task::TikTokContent,
            "shopee_orders" => Task::ShopeeOrders,
            "migrate" => Task::Migrate,
            other => {
                if let Some(slug) = other
                    .strip_prefix("refresh_")
                    .and_then(|rest| rest.strip_suffix("_token"))
                {
                    return platform_from_slug(slug).map(Task::RefreshToken);
                }
                if let Some(slug) = other
                    .strip_prefix("check_")
                    .and_then(|rest| rest.strip_suffix("_token_validity"))
                {
                    return platform_from_slug(slug).map(Task::CheckTokenValidity);
                }
                return None;
            }
        };
        Some(task)
    }
}

/// Shared collaborators of one run.
struct Deps {
    credentials: PgCredentialStore,
    documents: PgDocumentStore,
    fetcher: HttpFetcher,
    runner: BatchRunner,
}

async fn connect(config: &AppConfig) -> anyhow::Result<PgPool> {
    let pool_config = PoolConfig::from_app_config(config);
    let pool = adsync_db::connect_pool(&config.database_url, pool_config).await?;
    Ok(pool)
}

/// The token authority serving `platform`.
fn authority(
    config: &AppConfig,
    fetcher: &HttpFetcher,
    platform: Platform,
) -> anyhow::Result<Box<dyn TokenAuthority>> {
    let fetcher = fetcher.clone();
    let authority: Box<dyn TokenAuthority> = match platform {
        Platform::Meta => Box::new(MetaClient::new(fetcher, config.meta()?)),
        Platform::GoogleAds | Platform::GoogleAnalytics => {
            Box::new(GoogleOAuth::new(fetcher, &config.google()?, platform))
        }
        Platform::TikTok => Box::new(TikTokClient::new(fetcher, config.tiktok()?)),
        Platform::Shopee => Box::new(ShopeeClient::new(fetcher, config.shopee()?)),
    };
    Ok(authority)
}

fn log_summary(summary: RunSummary) {
    tracing::info!(
        items = summary.items,
        failed_items = summary.failed_items,
        records = summary.records,
        failed_batches = summary.failed_batches,
        "run summary"
    );
}

/// Run one task to completion.
///
/// # Errors
///
/// Returns an error when configuration for the task is missing or its
/// inputs cannot be loaded. Per-item failures are logged, not returned.
pub async fn run(task: Task, config: &AppConfig, window: SyncWindow) -> anyhow::Result<()> {
    let pool = connect(config).await?;
    if task == Task::Migrate {
        let applied = adsync_db::run_migrations(&pool).await?;
        tracing::info!(applied, "migrations applied");
        return Ok(());
    }

    let deps = Deps {
        credentials: PgCredentialStore::new(pool.clone()),
        documents: PgDocumentStore::new(pool),
        fetcher: HttpFetcher::new(&config.http)?,
        runner: BatchRunner::from_config(&config.runner),
    };
    let Deps {
        credentials,
        documents,
        fetcher,
        runner,
    } = &deps;

    let summary = match task {
        Task::RefreshToken(platform) => {
            let authority = authority(config, fetcher, platform)?;
            let report = tokens::refresh_tokens(credentials, authority.as_ref(), runner).await?;
            tracing::info!(updated = report.updated, "credentials refreshed");
            report.summary
        }
        Task::CheckTokenValidity(platform) => {
            let authority = authority(config, fetcher, platform)?;
            let report =
                tokens::check_tokens(credentials, authority.as_ref(), runner, Utc::now()).await?;
            tracing::info!(updated = report.updated, "credential flags updated");
            report.summary
        }
        Task::TokenExpiredNotification => {
            let report = notify_expired(config, &deps).await?;
            tracing::info!(
                violations = report.violations,
                users = report.users,
                batches = report.batches,
                failed_batches = report.failed_batches,
                "expiry notification finished"
            );
            return Ok(());
        }
        Task::MetaDailyReferences => {
            let client = MetaClient::new(fetcher.clone(), config.meta()?);
            meta::request_reports(documents, credentials, &client, runner, window).await?
        }
        Task::MetaInsights => {
            let client = MetaClient::new(fetcher.clone(), config.meta()?);
            meta::sync_insights(documents, &client, runner, window.level, window.scheduler).await?
        }
        Task::MetaContent => {
            let client = MetaClient::new(fetcher.clone(), config.meta()?);
            meta::sync_content(documents, credentials, &client, runner).await?
        }
        Task::GoogleAdsInsights => {
            let client = GoogleAdsClient::new(fetcher.clone(), config.google()?);
            google_ads::sync_insights(documents, credentials, &client, runner, window).await?
        }
        Task::GoogleAdsContent => {
            let client = GoogleAdsClient::new(fetcher.clone(), config.google()?);
            google_ads::sync_content(documents, credentials, &client, runner, window.range).await?
        }
        Task::TikTokMetrics => {
            let client = TikTokClient::new(fetcher.clone(), config.tiktok()?);
            tiktok::sync_insights(documents, credentials, &client, runner, window).await?
        }
        Task::TikTokContent => {
            let client = TikTokClient::new(fetcher.clone(), config.tiktok()?);
            tiktok::sync_content(documents, credentials, &client, runner).await?
        }
        Task::ShopeeOrders => {
            let client = ShopeeClient::new(fetcher.clone(), config.shopee()?);
            let report =
                shopee::sync_orders(documents, credentials, &client, runner, window.range).await?;
            tracing::info!(renewed = report.renewed, "shopee owners renewed");
            report.summary
        }
        Task::Migrate => return Ok(()),
    };
    log_summary(summary);
    Ok(())
}

async fn notify_expired(config: &AppConfig, deps: &Deps) -> anyhow::Result<NotifyReport> {
    let mailer = SmtpMailer::new(config.smtp()?);

    let mut authorities = Vec::new();
    for platform in Platform::ALL {
        match authority(config, &deps.fetcher, platform) {
            Ok(authority) => authorities.push(authority),
            Err(e) => {
                tracing::warn!(%platform, error = %e, "no probe available, stored flags will be used");
            }
        }
    }
    let authorities: Vec<&dyn TokenAuthority> = authorities.iter().map(Box::as_ref).collect();

    notify::notify_expired_tokens(
        &deps.credentials,
        &authorities,
        &deps.runner,
        &config.binding_links,
        &mailer,
        config.runner.notify_batch_size,
        Utc::now(),
    )
    .await
}
