//! TikTok Marketing API adapter.
//!
//! Every endpoint answers HTTP 200 with a `{code, message, data}` envelope;
//! `code == 0` is success and anything else is a platform error. Throttling
//! arrives as code `40100` rather than HTTP 429 and is retried the same way.

pub mod metrics;

use std::collections::{BTreeSet, HashMap};

use adsync_core::{
    ContentDocument, Creative, DateRange, InsightData, InsightDocument, InsightPeriod, Level,
    MetricSet, Platform, SchedulerType, ShapeError, TikTokConfig,
};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::PlatformError;
use crate::fetch::{HttpFetcher, RawResponse};
use crate::normalize::{opt_string, require_date, require_string};
use crate::pagination::{fetch_all, next_page_number, Page, MAX_PAGES};
use crate::token::{TokenAuthority, TokenGrant, TokenStatus, TokenSubject};

pub use metrics::{merge_chunks, LevelConfig, ReportRow};

const RATE_LIMIT_CODE: i64 = 40100;

/// Envelope codes meaning the access token is unusable.
const AUTH_ERROR_CODES: &[&str] = &["40001", "40102", "40104", "40105"];

const REPORT_PAGE_SIZE: u32 = 1000;
const ADS_PAGE_SIZE: u32 = 1000;

/// Most asset ids the file info endpoints accept per request.
pub const ASSET_CHUNK_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(default)]
    page: u64,
    #[serde(default)]
    total_page: u64,
}

#[derive(Debug, Deserialize)]
struct ListData<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
    #[serde(default)]
    page_info: Option<PageInfo>,
}

impl<T> ListData<T> {
    fn into_page(self) -> Page<T> {
        let next = self
            .page_info
            .and_then(|info| next_page_number(info.page, info.total_page));
        Page {
            items: self.list,
            next,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    access_token_expire_in: Option<i64>,
}

/// Hosted creative asset families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Video,
    Image,
}

impl AssetKind {
    fn endpoint(self) -> &'static str {
        match self {
            AssetKind::Video => "file/video/ad/info/",
            AssetKind::Image => "file/image/ad/info/",
        }
    }

    fn ids_param(self) -> &'static str {
        match self {
            AssetKind::Video => "video_ids",
            AssetKind::Image => "image_ids",
        }
    }
}

#[derive(Clone)]
pub struct TikTokClient {
    fetcher: HttpFetcher,
    config: TikTokConfig,
}

impl TikTokClient {
    #[must_use]
    pub fn new(fetcher: HttpFetcher, config: TikTokConfig) -> Self {
        Self { fetcher, config }
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{endpoint}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_version
        )
    }

    /// GET an endpoint and unwrap its envelope.
    async fn get<T: DeserializeOwned>(
        &self,
        context: &str,
        endpoint: &str,
        access_token: Option<&str>,
        params: &[(&str, String)],
    ) -> Result<T, PlatformError> {
        let url = self.url(endpoint);
        let retry_after_secs = self.fetcher.policy().default_retry_after_secs;

        self.fetcher
            .send_with(
                context,
                |client| {
                    let mut request = client.get(&url).query(params);
                    if let Some(token) = access_token {
                        request = request.header("Access-Token", token);
                    }
                    request
                },
                |raw| open_envelope(context, raw, retry_after_secs),
            )
            .await
    }

    /// One metric chunk of the integrated report, every page.
    async fn fetch_report_chunk(
        &self,
        advertiser_id: &str,
        access_token: &str,
        config: &LevelConfig,
        range: DateRange,
        chunk: &[&str],
    ) -> Result<Vec<ReportRow>, PlatformError> {
        let context = format!("tiktok report for advertiser {advertiser_id}");
        let dimensions = json!(config.dimensions).to_string();
        let metrics = json!(chunk).to_string();

        fetch_all(&context, MAX_PAGES, |page| {
            let context = context.clone();
            let params = vec![
                ("advertiser_id", advertiser_id.to_owned()),
                ("report_type", "BASIC".to_owned()),
                ("dimensions", dimensions.clone()),
                ("data_level", config.data_level.to_owned()),
                ("start_date", range.start_str()),
                ("end_date", range.end_str()),
                ("service_type", "AUCTION".to_owned()),
                ("query_mode", "CHUNK".to_owned()),
                ("metrics", metrics.clone()),
                ("page_size", REPORT_PAGE_SIZE.to_string()),
                ("page", page.unwrap_or_else(|| "1".to_owned())),
            ];
            async move {
                let data: ListData<ReportRow> = self
                    .get(&context, "report/integrated/get/", Some(access_token), &params)
                    .await?;
                Ok(data.into_page())
            }
        })
        .await
    }

    /// Report rows for `advertiser_id` at `level`, all metric chunks merged
    /// per dimension key.
    ///
    /// Chunks are fetched concurrently; one failing chunk fails the call.
    ///
    /// # Errors
    ///
    /// Any envelope, transport or pagination error from a chunk.
    pub async fn fetch_metrics(
        &self,
        advertiser_id: &str,
        access_token: &str,
        range: DateRange,
        level: Level,
        scheduler: SchedulerType,
    ) -> Result<Vec<ReportRow>, PlatformError> {
        let config = LevelConfig::new(level, scheduler);
        let chunks = config.metric_chunks().map(|chunk| {
            self.fetch_report_chunk(advertiser_id, access_token, &config, range, chunk)
        });
        let rows = try_join_all(chunks).await?;

        let merged = merge_chunks(rows.into_iter().flatten(), &config.dimensions);
        tracing::debug!(
            advertiser_id,
            level = level.as_str(),
            rows = merged.len(),
            "tiktok report merged"
        );
        Ok(merged)
    }

    /// Ads created since January 1st of the current year.
    ///
    /// # Errors
    ///
    /// Any envelope, transport or pagination error.
    pub async fn fetch_ads(
        &self,
        advertiser_id: &str,
        access_token: &str,
    ) -> Result<Vec<Value>, PlatformError> {
        let context = format!("tiktok ads for advertiser {advertiser_id}");
        let now = Utc::now().naive_utc();
        let year_start = NaiveDate::from_ymd_opt(now.year(), 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(now);
        let filtering = json!({
            "creation_filter_start_time": year_start.format("%Y-%m-%d %H:%M:%S").to_string(),
            "creation_filter_end_time": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .to_string();

        fetch_all(&context, MAX_PAGES, |page| {
            let context = context.clone();
            let params = vec![
                ("advertiser_id", advertiser_id.to_owned()),
                ("filtering", filtering.clone()),
                ("page_size", ADS_PAGE_SIZE.to_string()),
                ("page", page.unwrap_or_else(|| "1".to_owned())),
            ];
            async move {
                let data: ListData<Value> =
                    self.get(&context, "ad/get/", Some(access_token), &params).await?;
                Ok(data.into_page())
            }
        })
        .await
    }

    /// Asset details for `ids`, requested [`ASSET_CHUNK_SIZE`] at a time.
    ///
    /// # Errors
    ///
    /// Any envelope or transport error.
    pub async fn fetch_content_details(
        &self,
        advertiser_id: &str,
        access_token: &str,
        kind: AssetKind,
        ids: &[String],
    ) -> Result<Vec<Value>, PlatformError> {
        let context = format!("tiktok {} info for advertiser {advertiser_id}", kind.ids_param());
        let mut details = Vec::new();

        for chunk in ids.chunks(ASSET_CHUNK_SIZE) {
            let params = [
                ("advertiser_id", advertiser_id.to_owned()),
                (kind.ids_param(), json!(chunk).to_string()),
            ];
            let data: ListData<Value> = self
                .get(&context, kind.endpoint(), Some(access_token), &params)
                .await?;
            details.extend(data.list);
        }
        Ok(details)
    }
}

#[async_trait]
impl TokenAuthority for TikTokClient {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    async fn refresh(&self, subject: &TokenSubject) -> Result<TokenGrant, PlatformError> {
        let refresh_token = subject.require_refresh_token()?;
        let params = [
            ("app_id", self.config.app_id.clone()),
            ("secret", self.config.secret.clone()),
            ("grant_type", "refresh_token".to_owned()),
            ("refresh_token", refresh_token.to_owned()),
        ];
        let data: RefreshData = self
            .get("tiktok token refresh", "oauth2/refresh_token/", None, &params)
            .await?;

        Ok(TokenGrant {
            access_token: data.access_token,
            refresh_token: data
                .refresh_token
                .or_else(|| Some(refresh_token.to_owned())),
            expires_in: data.access_token_expire_in,
        })
    }

    /// Lists the advertisers the token is authorized for; an auth error
    /// code means the token is no longer usable.
    async fn probe(&self, subject: &TokenSubject) -> Result<TokenStatus, PlatformError> {
        let params = [
            ("app_id", self.config.app_id.clone()),
            ("secret", self.config.secret.clone()),
        ];
        let result: Result<Value, PlatformError> = self
            .get(
                "tiktok advertiser probe",
                "oauth2/advertiser/get/",
                Some(subject.access_token.as_str()),
                &params,
            )
            .await;

        match result {
            Ok(_) => Ok(TokenStatus::Valid),
            Err(PlatformError::Api { code, .. }) if AUTH_ERROR_CODES.contains(&code.as_str()) => {
                Ok(TokenStatus::Invalid)
            }
            Err(err) => Err(err),
        }
    }
}

fn open_envelope<T: DeserializeOwned>(
    context: &str,
    raw: RawResponse,
    retry_after_secs: u64,
) -> Result<T, PlatformError> {
    let envelope: Envelope<T> = raw.require_success(context)?.json(context)?;
    match envelope.code {
        0 => envelope
            .data
            .ok_or_else(|| ShapeError::missing("data").into()),
        RATE_LIMIT_CODE => Err(PlatformError::RateLimited {
            context: context.to_owned(),
            retry_after_secs,
        }),
        code => Err(PlatformError::api(context, code, envelope.message)),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Copy the report's counters, treating TikTok's `"-"` placeholder as absent.
fn report_counters(
    row: &Map<String, Value>,
    counters: impl Iterator<Item = &'static str>,
) -> Result<MetricSet, ShapeError> {
    let mut set = MetricSet::new();
    for field in counters {
        set.set(field, 0.0);
        match row.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.is_empty() || s == "-" => {}
            Some(raw) => {
                if !set.set_raw(field, raw) {
                    return Err(ShapeError::new(field, format!("{raw} is not numeric")));
                }
            }
        }
    }
    Ok(set)
}

/// Turn one merged report row into an insight document.
///
/// Daily rows are keyed by `stat_time_day`; live rows by `range`. Returns
/// `Ok(None)` when every counter is zero.
///
/// # Errors
///
/// Returns [`ShapeError`] when the entity id or day dimension is missing, or
/// a counter is not numeric.
pub fn normalize_insight(
    advertiser_id: &str,
    row: &ReportRow,
    level: Level,
    scheduler: SchedulerType,
    range: DateRange,
) -> Result<Option<InsightDocument>, ShapeError> {
    let config = LevelConfig::new(level, scheduler);
    let counters = report_counters(&row.metrics, config.counters())?;

    let period = if scheduler.is_live() {
        InsightPeriod::Range {
            date_start: range.start,
            date_end: range.end,
        }
    } else {
        InsightPeriod::Day {
            date: require_date(&row.dimensions, "stat_time_day")?,
        }
    };

    let data = InsightData {
        objective: opt_string(&row.metrics, metrics::OBJECTIVE_FIELD),
        channel_type: None,
        counters,
    };
    if data.is_empty_event() {
        return Ok(None);
    }

    let dimension_or_metric =
        |field: &str| opt_string(&row.dimensions, field).or_else(|| opt_string(&row.metrics, field));

    let mut doc = InsightDocument::new(advertiser_id, period, data);
    doc.campaign_id = match level {
        Level::Campaign => Some(require_string(&row.dimensions, "campaign_id")?),
        _ => dimension_or_metric("campaign_id"),
    };
    doc.campaign_name = opt_string(&row.metrics, "campaign_name");
    doc.adset_id = opt_string(&row.metrics, "adgroup_id");
    doc.adset_name = opt_string(&row.metrics, "adgroup_name");
    doc.ad_id = match level {
        Level::Ad => Some(require_string(&row.dimensions, "ad_id")?),
        _ => dimension_or_metric("ad_id"),
    };
    doc.ad_name = opt_string(&row.metrics, "ad_name");
    Ok(Some(doc))
}

/// Ids of the videos and images referenced by `ads`, de-duplicated.
#[must_use]
pub fn referenced_assets(ads: &[Value]) -> (Vec<String>, Vec<String>) {
    let mut videos = BTreeSet::new();
    let mut images = BTreeSet::new();
    for ad in ads.iter().filter_map(Value::as_object) {
        if let Some(video_id) = opt_string(ad, "video_id") {
            videos.insert(video_id);
        }
        if let Some(Value::Array(ids)) = ad.get("image_ids") {
            images.extend(
                ids.iter()
                    .filter_map(|id| match id {
                        Value::String(s) if !s.is_empty() => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    }),
            );
        }
    }
    (videos.into_iter().collect(), images.into_iter().collect())
}

/// Asset details by id, built from the file info responses.
#[derive(Debug, Default)]
pub struct AssetIndex {
    videos: HashMap<String, Map<String, Value>>,
    images: HashMap<String, Map<String, Value>>,
}

impl AssetIndex {
    #[must_use]
    pub fn new(video_details: Vec<Value>, image_details: Vec<Value>) -> Self {
        fn index(details: Vec<Value>, id_fields: &[&str]) -> HashMap<String, Map<String, Value>> {
            details
                .into_iter()
                .filter_map(|detail| match detail {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .filter_map(|map| {
                    let id = id_fields.iter().find_map(|f| opt_string(&map, f))?;
                    Some((id, map))
                })
                .collect()
        }

        Self {
            videos: index(video_details, &["video_id"]),
            images: index(image_details, &["image_id", "id"]),
        }
    }
}

/// Creative of one ad: its video preview if known, else its first known
/// image. Returns `Ok(None)` when neither was found.
///
/// # Errors
///
/// Returns [`ShapeError`] when the ad has no `ad_id`.
pub fn normalize_content(
    advertiser_id: &str,
    ad: &Value,
    assets: &AssetIndex,
) -> Result<Option<ContentDocument>, ShapeError> {
    let ad = ad
        .as_object()
        .ok_or_else(|| ShapeError::new("ad", "expected a JSON object"))?;
    let ad_id = require_string(ad, "ad_id")?;

    let video = opt_string(ad, "video_id").and_then(|id| assets.videos.get(&id));
    let creative = if let Some(video) = video {
        opt_string(video, "preview_url").map(|url| Creative::Media {
            url,
            expires_at: opt_string(video, "preview_url_expire_time"),
        })
    } else {
        ad.get("image_ids")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .find_map(|id| assets.images.get(id))
            .and_then(|image| opt_string(image, "image_url"))
            .map(|url| Creative::Media {
                url,
                expires_at: None,
            })
    };

    Ok(creative.map(|creative| ContentDocument::new(advertiser_id, ad_id, creative)))
}
