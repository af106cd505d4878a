//! Meta (Facebook) Graph API adapter.
//!
//! Insights are pulled through the asynchronous report protocol:
//!
//! 1. [`MetaClient::start_async_job`] submits a report and returns its
//!    `report_run_id`, persisted by the caller as a pending reference.
//! 2. [`MetaClient::poll_job_status`] reports whether the job is ready.
//! 3. [`MetaClient::fetch_insights`] follows `paging.next` links through the
//!    finished report's rows.

pub mod attribution;

use adsync_core::{
    DateRange, InsightData, InsightDocument, InsightPeriod, Level, MetaConfig, MetricSet,
    Platform, SchedulerType, ShapeError,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::PlatformError;
use crate::fetch::{HttpFetcher, RawResponse};
use crate::normalize::{as_object, copy_counters, opt_string, require_date, require_string};
use crate::pagination::{fetch_all, Page, MAX_PAGES};
use crate::token::{TokenAuthority, TokenGrant, TokenStatus, TokenSubject};

/// Lifetime Meta grants long-lived tokens when the exchange omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60 * 24 * 60 * 60;

const INSIGHTS_PAGE_LIMIT: u32 = 500;

/// Graph error codes meaning the access token itself is unusable.
const INVALID_TOKEN_CODES: &[i64] = &[102, 190, 463, 467];

/// Scalar counters of a daily pull.
const DAILY_SCALARS: &[&str] = &["spend", "impressions", "clicks", "estimated_ad_recallers"];

/// Scalar counters of a live (cumulative) pull.
const LIVE_SCALARS: &[&str] = &["reach", "frequency"];

/// Every counter a daily insight document declares.
pub const DAILY_COUNTERS: &[&str] = &[
    "spend",
    "impressions",
    "clicks",
    "link_click",
    "landing_page_view",
    "add_to_cart",
    "add_to_cart_value",
    "purchase",
    "purchase_value",
    "initiate_checkout",
    "post_engagement",
    "add_to_cart_shared_item",
    "add_to_cart_value_shared_item",
    "purchase_shared_item",
    "purchase_value_shared_item",
    "content_view_shared_item",
    "content_view_value_shared_item",
    "lead",
    "application_submitted",
    "application_submitted_custom",
    "registration_completed",
    "estimated_ad_recallers",
    "post_saves",
    "post_reaction",
    "post_comment",
    "post_share",
    "outbound_click",
    "thruplays",
    "video_play",
    "video_play_100",
    "messaging_new",
    "messaging_blocked",
    "messaging_conv_started",
];

const DAILY_ACTION_FIELDS: &[&str] = &[
    "actions",
    "action_values",
    "catalog_segment_actions",
    "catalog_segment_value",
    "outbound_clicks",
    "video_15_sec_watched_actions",
    "video_play_actions",
    "video_p100_watched_actions",
    "attribution_setting",
];

/// Report job state as reported by `async_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Completed,
}

/// One rendered ad preview.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdPreview {
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReportRun {
    report_run_id: String,
}

#[derive(Debug, Deserialize)]
struct ReportStatusResponse {
    async_status: String,
    #[serde(default)]
    async_percent_completion: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct DataPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DebugTokenResponse {
    data: DebugTokenData,
}

#[derive(Debug, Deserialize)]
struct DebugTokenData {
    #[serde(default)]
    is_valid: bool,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Graph API client for one app.
#[derive(Clone)]
pub struct MetaClient {
    fetcher: HttpFetcher,
    config: MetaConfig,
}

impl MetaClient {
    #[must_use]
    pub fn new(fetcher: HttpFetcher, config: MetaConfig) -> Self {
        Self { fetcher, config }
    }

    fn root(&self, path: &str) -> String {
        format!("{}/{path}", self.config.graph_url.trim_end_matches('/'))
    }

    fn versioned(&self, path: &str) -> String {
        format!(
            "{}/{}/{path}",
            self.config.graph_url.trim_end_matches('/'),
            self.config.api_version
        )
    }

    fn app_token(&self) -> String {
        format!("{}|{}", self.config.app_id, self.config.app_secret)
    }

    /// Submit an insights report for `account_id` and return its reference.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] on transport failure or a Graph error.
    pub async fn start_async_job(
        &self,
        account_id: &str,
        access_token: &str,
        range: DateRange,
        level: Level,
        scheduler: SchedulerType,
    ) -> Result<String, PlatformError> {
        let context = format!("meta insights job for {account_id}");
        let url = self.versioned(&format!("{}/insights", act_id(account_id)));
        let params = job_params(range, level, scheduler);

        let raw = self
            .fetcher
            .send(&context, |client| {
                client
                    .post(&url)
                    .query(&[("access_token", access_token)])
                    .form(&params)
            })
            .await?;
        let run: ReportRun = graph_json(&context, raw)?;
        Ok(run.report_run_id)
    }

    /// Ask whether report `reference` has finished.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::JobFailed`] when Meta gave up on the job.
    pub async fn poll_job_status(
        &self,
        reference: &str,
        access_token: &str,
    ) -> Result<JobState, PlatformError> {
        let context = format!("meta report {reference}");
        let url = self.versioned(reference);

        let raw = self
            .fetcher
            .send(&context, |client| {
                client.get(&url).query(&[("access_token", access_token)])
            })
            .await?;
        let status: ReportStatusResponse = graph_json(&context, raw)?;

        match status.async_status.as_str() {
            "Job Completed" => Ok(JobState::Completed),
            "Job Failed" | "Job Skipped" => Err(PlatformError::JobFailed {
                reference: reference.to_owned(),
                status: status.async_status,
            }),
            _ => {
                tracing::debug!(
                    reference,
                    status = %status.async_status,
                    percent = status.async_percent_completion.unwrap_or(0),
                    "meta report still running"
                );
                Ok(JobState::Running)
            }
        }
    }

    /// Poll until the job completes or the configured attempts run out.
    ///
    /// Returns `false` when the job is still running after the last attempt.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::poll_job_status`].
    pub async fn wait_for_job(
        &self,
        reference: &str,
        access_token: &str,
    ) -> Result<bool, PlatformError> {
        let attempts = self.config.poll_max_attempts.max(1);
        for attempt in 1..=attempts {
            if self.poll_job_status(reference, access_token).await? == JobState::Completed {
                return Ok(true);
            }
            if attempt < attempts {
                self.fetcher
                    .pause(Duration::from_secs(self.config.poll_interval_secs))
                    .await;
            }
        }
        Ok(false)
    }

    /// Every row of a completed report.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if any page fails.
    pub async fn fetch_insights(
        &self,
        reference: &str,
        access_token: &str,
    ) -> Result<Vec<Value>, PlatformError> {
        let context = format!("meta insights for report {reference}");
        let first_url = self.versioned(&format!("{reference}/insights"));
        let limit = INSIGHTS_PAGE_LIMIT.to_string();

        fetch_all(&context, MAX_PAGES, |next| {
            let context = context.clone();
            let first_url = first_url.clone();
            let limit = limit.clone();
            async move {
                let raw = match next {
                    // `paging.next` already carries the token and cursor.
                    Some(link) => self.fetcher.send(&context, |client| client.get(&link)).await?,
                    None => {
                        self.fetcher
                            .send(&context, |client| {
                                client.get(&first_url).query(&[
                                    ("access_token", access_token),
                                    ("limit", limit.as_str()),
                                ])
                            })
                            .await?
                    }
                };
                let page: DataPage<Value> = graph_json(&context, raw)?;
                Ok(Page {
                    items: page.data,
                    next: page.paging.and_then(|p| p.next),
                })
            }
        })
        .await
    }

    /// Rendered previews of `ad_id` in the format matching its placement.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] on transport failure or a Graph error.
    pub async fn fetch_ad_preview(
        &self,
        ad_id: &str,
        access_token: &str,
        ad_format: &str,
    ) -> Result<Vec<AdPreview>, PlatformError> {
        let context = format!("meta preview for ad {ad_id}");
        let url = self.versioned(&format!("{ad_id}/previews"));

        let raw = self
            .fetcher
            .send(&context, |client| {
                client
                    .get(&url)
                    .query(&[("ad_format", ad_format), ("access_token", access_token)])
            })
            .await?;
        let page: DataPage<AdPreview> = graph_json(&context, raw)?;
        Ok(page.data)
    }
}

#[async_trait]
impl TokenAuthority for MetaClient {
    fn platform(&self) -> Platform {
        Platform::Meta
    }

    /// Exchanges the current token for a fresh long-lived one.
    async fn refresh(&self, subject: &TokenSubject) -> Result<TokenGrant, PlatformError> {
        let context = "meta token exchange";
        let url = self.root("oauth/access_token");

        let exchanged: ExchangeResponse = self
            .fetcher
            .send_json(context, |client| {
                client.get(&url).query(&[
                    ("grant_type", "fb_exchange_token"),
                    ("client_id", self.config.app_id.as_str()),
                    ("client_secret", self.config.app_secret.as_str()),
                    ("fb_exchange_token", subject.access_token.as_str()),
                ])
            })
            .await?;

        Ok(TokenGrant {
            access_token: exchanged.access_token,
            refresh_token: None,
            expires_in: Some(exchanged.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)),
        })
    }

    async fn probe(&self, subject: &TokenSubject) -> Result<TokenStatus, PlatformError> {
        let context = "meta debug_token";
        let url = self.root("debug_token");
        let app_token = self.app_token();

        let raw = self
            .fetcher
            .send(context, |client| {
                client.get(&url).query(&[
                    ("input_token", subject.access_token.as_str()),
                    ("access_token", app_token.as_str()),
                ])
            })
            .await?;

        // Only token errors speak for the input token; app and throttling
        // errors surface as failures.
        if !raw.status.is_success() {
            if let Ok(envelope) = raw.json::<GraphErrorEnvelope>(context) {
                if envelope
                    .error
                    .code
                    .is_some_and(|code| INVALID_TOKEN_CODES.contains(&code))
                {
                    return Ok(TokenStatus::Invalid);
                }
            }
        }
        let debug: DebugTokenResponse = graph_json(context, raw)?;
        Ok(if debug.data.is_valid {
            TokenStatus::Valid
        } else {
            TokenStatus::Invalid
        })
    }
}

/// Parse a Graph response, turning the `{"error": {...}}` envelope into
/// [`PlatformError::Api`].
fn graph_json<T: serde::de::DeserializeOwned>(
    context: &str,
    raw: RawResponse,
) -> Result<T, PlatformError> {
    if raw.status.is_success() {
        return raw.json(context);
    }
    if let Ok(envelope) = raw.json::<GraphErrorEnvelope>(context) {
        let code = envelope
            .error
            .code
            .map_or_else(|| raw.status.as_u16().to_string(), |c| c.to_string());
        return Err(PlatformError::api(context, code, envelope.error.message));
    }
    raw.require_success(context)?.json(context)
}

/// Graph account node id; ad account ids carry an `act_` prefix.
#[must_use]
pub fn act_id(account_id: &str) -> String {
    if account_id.starts_with("act_") {
        account_id.to_owned()
    } else {
        format!("act_{account_id}")
    }
}

fn entity_fields(level: Level) -> &'static [&'static str] {
    match level {
        Level::Account => &[],
        Level::Campaign => &["campaign_id", "campaign_name"],
        Level::Ad => &[
            "campaign_id",
            "campaign_name",
            "adset_id",
            "adset_name",
            "ad_id",
            "ad_name",
        ],
    }
}

/// Form fields of an insights job submission.
#[must_use]
pub fn job_params(range: DateRange, level: Level, scheduler: SchedulerType) -> Vec<(String, String)> {
    let mut fields: Vec<&str> = vec!["account_id", "objective"];
    fields.extend_from_slice(entity_fields(level));
    if scheduler.is_live() {
        fields.extend_from_slice(LIVE_SCALARS);
    } else {
        fields.extend_from_slice(DAILY_SCALARS);
        fields.extend_from_slice(DAILY_ACTION_FIELDS);
    }

    let mut params = vec![
        ("level".to_owned(), level.as_str().to_owned()),
        (
            "time_range".to_owned(),
            json!({"since": range.start_str(), "until": range.end_str()}).to_string(),
        ),
        ("fields".to_owned(), fields.join(",")),
        (
            "action_attribution_windows".to_owned(),
            json!(["7d_click", "1d_view"]).to_string(),
        ),
        ("use_account_attribution_setting".to_owned(), "true".to_owned()),
        ("use_unified_attribution_setting".to_owned(), "true".to_owned()),
    ];
    if !scheduler.is_live() {
        params.push(("time_increment".to_owned(), "1".to_owned()));
    }
    if level == Level::Ad {
        params.push((
            "breakdowns".to_owned(),
            "publisher_platform,platform_position".to_owned(),
        ));
    }
    params
}

/// Turn one report row into an insight document.
///
/// Returns `Ok(None)` for rows whose counters are all zero.
///
/// # Errors
///
/// Returns [`ShapeError`] when a required field is missing or a counter
/// is not numeric.
pub fn normalize_insight(
    row: &Value,
    scheduler: SchedulerType,
) -> Result<Option<InsightDocument>, ShapeError> {
    let row = as_object(row, "meta insight row")?;
    let account_id = act_id(&require_string(row, "account_id")?);
    let date_start = require_date(row, "date_start")?;

    let (counters, period) = if scheduler.is_live() {
        let mut counters = MetricSet::declared(LIVE_SCALARS);
        copy_counters(row, LIVE_SCALARS, &mut counters)?;
        let period = InsightPeriod::Range {
            date_start,
            date_end: require_date(row, "date_stop")?,
        };
        (counters, period)
    } else {
        let mut counters = MetricSet::declared(DAILY_COUNTERS);
        copy_counters(row, DAILY_SCALARS, &mut counters)?;
        attribution::flatten_actions(row, &mut counters);
        (counters, InsightPeriod::Day { date: date_start })
    };

    let data = InsightData {
        objective: opt_string(row, "objective"),
        channel_type: None,
        counters,
    };
    if data.is_empty_event() {
        return Ok(None);
    }

    let mut doc = InsightDocument::new(account_id, period, data);
    doc.campaign_id = opt_string(row, "campaign_id");
    doc.campaign_name = opt_string(row, "campaign_name");
    doc.adset_id = opt_string(row, "adset_id");
    doc.adset_name = opt_string(row, "adset_name");
    doc.ad_id = opt_string(row, "ad_id");
    doc.ad_name = opt_string(row, "ad_name");
    doc.publisher_platform = opt_string(row, "publisher_platform");
    doc.platform_position = opt_string(row, "platform_position");
    Ok(Some(doc))
}

/// Preview `ad_format` matching where the ad was shown.
#[must_use]
pub fn preview_format(publisher_platform: Option<&str>, platform_position: Option<&str>) -> &'static str {
    match (publisher_platform, platform_position) {
        (Some("instagram"), Some("story")) => "INSTAGRAM_STORY",
        (Some("instagram"), Some("reels")) => "INSTAGRAM_REELS",
        (Some("instagram"), Some("explore" | "explore_home")) => "INSTAGRAM_EXPLORE_CONTEXTUAL",
        (Some("instagram"), _) => "INSTAGRAM_STANDARD",
        (Some("facebook"), Some("story")) => "FACEBOOK_STORY_MOBILE",
        (Some("facebook"), Some("facebook_reels")) => "FACEBOOK_REELS_MOBILE",
        (Some("facebook"), Some("marketplace")) => "MARKETPLACE_MOBILE",
        (Some("facebook"), Some("right_hand_column")) => "RIGHT_COLUMN_STANDARD",
        (Some("facebook"), Some("instream_video")) => "INSTREAM_VIDEO_MOBILE",
        (Some("messenger"), _) => "MESSENGER_MOBILE_INBOX_MEDIA",
        (Some("audience_network"), _) => "MOBILE_INTERSTITIAL",
        _ => "MOBILE_FEED_STANDARD",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn act_id_is_prefixed_once() {
        assert_eq!(act_id("123"), "act_123");
        assert_eq!(act_id("act_123"), "act_123");
    }

    #[test]
    fn ad_level_jobs_break_down_by_placement() {
        let range = DateRange::new(day(1), day(2)).unwrap();
        let params = job_params(range, Level::Ad, SchedulerType::Daily);
        let get = |k: &str| params.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());

        assert_eq!(
            get("breakdowns").as_deref(),
            Some("publisher_platform,platform_position")
        );
        assert_eq!(get("time_increment").as_deref(), Some("1"));
        assert!(get("fields").unwrap().contains("ad_id"));
    }

    #[test]
    fn live_jobs_request_cumulative_reach() {
        let range = DateRange::new(day(1), day(30)).unwrap();
        let params = job_params(range, Level::Campaign, SchedulerType::Live);
        let fields = params
            .iter()
            .find(|(k, _)| k == "fields")
            .map(|(_, v)| v.clone())
            .unwrap();

        assert!(fields.contains("reach"));
        assert!(!fields.contains("actions"));
        assert!(!params.iter().any(|(k, _)| k == "time_increment"));
        assert!(!params.iter().any(|(k, _)| k == "breakdowns"));
    }

    #[test]
    fn normalizes_daily_row_with_attribution_window() {
        let row = json!({
            "account_id": "42",
            "campaign_id": "C1",
            "campaign_name": "Launch",
            "objective": "OUTCOME_SALES",
            "spend": "10.50",
            "impressions": "1000",
            "attribution_setting": "7d_click",
            "actions": [{"action_type": "omni_purchase", "7d_click": "5", "value": "9"}],
            "date_start": "2024-01-01",
            "date_stop": "2024-01-01"
        });
        let doc = normalize_insight(&row, SchedulerType::Daily).unwrap().unwrap();

        assert_eq!(doc.account_id, "act_42");
        assert_eq!(doc.campaign_id.as_deref(), Some("C1"));
        assert_eq!(doc.period, InsightPeriod::Day { date: day(1) });
        assert_eq!(doc.data.objective.as_deref(), Some("OUTCOME_SALES"));
        assert_eq!(doc.data.counters.get("purchase"), Some(5.0));
        assert_eq!(doc.data.counters.get("spend"), Some(10.5));
        assert_eq!(doc.data.counters.get("lead"), Some(0.0));
    }

    #[test]
    fn all_zero_row_is_dropped_even_with_objective() {
        let row = json!({
            "account_id": "42",
            "objective": "OUTCOME_SALES",
            "spend": "0",
            "impressions": "0",
            "date_start": "2024-01-01"
        });
        assert!(normalize_insight(&row, SchedulerType::Daily).unwrap().is_none());
    }

    #[test]
    fn live_row_carries_its_window() {
        let row = json!({
            "account_id": "act_42",
            "reach": "300",
            "frequency": "1.5",
            "date_start": "2024-01-01",
            "date_stop": "2024-01-30"
        });
        let doc = normalize_insight(&row, SchedulerType::Live).unwrap().unwrap();
        assert_eq!(
            doc.period,
            InsightPeriod::Range {
                date_start: day(1),
                date_end: day(30)
            }
        );
        assert_eq!(doc.data.counters.len(), 2);
    }

    #[test]
    fn missing_account_is_a_shape_error() {
        let row = json!({"date_start": "2024-01-01", "spend": "1"});
        let err = normalize_insight(&row, SchedulerType::Daily).unwrap_err();
        assert_eq!(err.field, "account_id");
    }

    #[test]
    fn preview_format_follows_placement() {
        assert_eq!(preview_format(Some("instagram"), Some("story")), "INSTAGRAM_STORY");
        assert_eq!(preview_format(Some("facebook"), Some("feed")), "MOBILE_FEED_STANDARD");
        assert_eq!(preview_format(None, None), "MOBILE_FEED_STANDARD");
    }
}
