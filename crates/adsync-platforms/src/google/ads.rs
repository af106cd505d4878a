//! Google Ads `googleAds:search` client and row normalization.

use adsync_core::{
    ContentDocument, Creative, DateRange, GoogleConfig, InsightData, InsightDocument,
    InsightPeriod, Level, MetricSet, SchedulerType, ShapeError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::gaql;
use crate::error::PlatformError;
use crate::fetch::HttpFetcher;
use crate::normalize::{as_object, opt_string, require_date, require_string, string_list};
use crate::pagination::{fetch_all, Page, MAX_PAGES};

/// Channel types whose creatives are synced.
pub const CHANNEL_TYPES: &[&str] = &["SEARCH", "VIDEO", "DISPLAY"];

/// Counter names of an insight document and the JSON field each is read from.
const COUNTER_SOURCES: &[(&str, &str)] = &[
    ("impressions", "impressions"),
    ("clicks", "clicks"),
    ("cost_micros", "costMicros"),
    ("engagements", "engagements"),
    ("conversions", "conversions"),
    ("all_conversions", "allConversions"),
    ("conversions_value", "conversionsValue"),
    ("all_conversions_value", "allConversionsValue"),
    ("video_views", "videoViews"),
    ("interactions", "interactions"),
];

/// Every counter a Google Ads insight document declares.
pub const COUNTERS: &[&str] = &[
    "impressions",
    "clicks",
    "cost_micros",
    "engagements",
    "conversions",
    "all_conversions",
    "conversions_value",
    "all_conversions_value",
    "video_views",
    "interactions",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct GoogleAdsClient {
    fetcher: HttpFetcher,
    config: GoogleConfig,
}

impl GoogleAdsClient {
    #[must_use]
    pub fn new(fetcher: HttpFetcher, config: GoogleConfig) -> Self {
        Self { fetcher, config }
    }

    /// Run a GAQL query against one customer and return every result row.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Api`] when Google rejects the query, or any
    /// transport/pagination error.
    pub async fn search(
        &self,
        customer_id: &str,
        access_token: &str,
        query: &str,
    ) -> Result<Vec<Value>, PlatformError> {
        let customer_id = customer_id.replace('-', "");
        let context = format!("google ads search for customer {customer_id}");
        let url = format!(
            "{}/{}/customers/{customer_id}/googleAds:search",
            self.config.ads_base_url.trim_end_matches('/'),
            self.config.ads_api_version
        );
        let login_customer_id = self.config.login_customer_id.as_deref().map(|id| id.replace('-', ""));

        fetch_all(&context, MAX_PAGES, |page_token| {
            let context = context.clone();
            let url = url.clone();
            let login_customer_id = login_customer_id.clone();
            async move {
                let body = SearchRequest { query, page_token };
                let raw = self
                    .fetcher
                    .send(&context, |client| {
                        let mut request = client
                            .post(&url)
                            .bearer_auth(access_token)
                            .header("developer-token", &self.config.developer_token)
                            .json(&body);
                        if let Some(login) = &login_customer_id {
                            request = request.header("login-customer-id", login);
                        }
                        request
                    })
                    .await?;

                if !raw.status.is_success() {
                    if let Ok(envelope) = raw.json::<ErrorEnvelope>(&context) {
                        return Err(PlatformError::api(
                            &context,
                            envelope
                                .error
                                .status
                                .unwrap_or_else(|| raw.status.as_u16().to_string()),
                            envelope.error.message,
                        ));
                    }
                }
                let response: SearchResponse = raw.require_success(&context)?.json(&context)?;
                Ok(Page {
                    items: response.results,
                    next: response.next_page_token,
                })
            }
        })
        .await
    }

    /// Metric rows for `customer_id` at `level` over `range`.
    ///
    /// # Errors
    ///
    /// See [`Self::search`].
    pub async fn fetch_metrics(
        &self,
        customer_id: &str,
        access_token: &str,
        range: DateRange,
        level: Level,
        scheduler: SchedulerType,
    ) -> Result<Vec<Value>, PlatformError> {
        let query = gaql::insights_query(level, scheduler, range);
        self.search(customer_id, access_token, &query).await
    }

    /// Creative rows of enabled ads in the synced channel types.
    ///
    /// # Errors
    ///
    /// See [`Self::search`].
    pub async fn fetch_content(
        &self,
        customer_id: &str,
        access_token: &str,
        range: DateRange,
    ) -> Result<Vec<Value>, PlatformError> {
        let query = gaql::content_query(range, CHANNEL_TYPES);
        self.search(customer_id, access_token, &query).await
    }
}

fn object<'a>(row: &'a Map<String, Value>, field: &str) -> Option<&'a Map<String, Value>> {
    row.get(field).and_then(Value::as_object)
}

fn path<'a>(row: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a Map<String, Value>> {
    fields.iter().try_fold(row, |current, field| object(current, field))
}

/// Turn one search result into an insight document.
///
/// Live pulls are keyed by `range`; daily pulls by the row's
/// `segments.date`. Returns `Ok(None)` when every counter is zero.
///
/// # Errors
///
/// Returns [`ShapeError`] when the date is missing or a counter is not numeric.
pub fn normalize_insight(
    customer_id: &str,
    row: &Value,
    scheduler: SchedulerType,
    range: DateRange,
) -> Result<Option<InsightDocument>, ShapeError> {
    let row = as_object(row, "google ads row")?;

    let mut counters = MetricSet::declared(COUNTERS);
    if let Some(metrics) = object(row, "metrics") {
        for (name, source) in COUNTER_SOURCES {
            match metrics.get(*source) {
                None | Some(Value::Null) => {}
                Some(raw) => {
                    if !counters.set_raw(*name, raw) {
                        return Err(ShapeError::new(*name, format!("{raw} is not numeric")));
                    }
                }
            }
        }
    }

    let campaign = object(row, "campaign");
    let data = InsightData {
        objective: None,
        channel_type: campaign.and_then(|c| opt_string(c, "advertisingChannelType")),
        counters,
    };
    if data.is_empty_event() {
        return Ok(None);
    }

    let period = if scheduler.is_live() {
        InsightPeriod::Range {
            date_start: range.start,
            date_end: range.end,
        }
    } else {
        let segments = object(row, "segments").ok_or_else(|| ShapeError::missing("segments.date"))?;
        InsightPeriod::Day {
            date: require_date(segments, "date")?,
        }
    };

    let mut doc = InsightDocument::new(customer_id.replace('-', ""), period, data);
    doc.campaign_id = campaign.and_then(|c| opt_string(c, "id"));
    doc.campaign_name = campaign.and_then(|c| opt_string(c, "name"));
    if let Some(ad_group) = object(row, "adGroup") {
        doc.adset_id = opt_string(ad_group, "id");
        doc.adset_name = opt_string(ad_group, "name");
    }
    if let Some(ad) = path(row, &["adGroupAd", "ad"]) {
        doc.ad_id = opt_string(ad, "id");
        doc.ad_name = opt_string(ad, "name");
    }
    Ok(Some(doc))
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("text").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

/// Turn one creative row into a content document keyed by
/// (account, campaign, ad).
///
/// # Errors
///
/// Returns [`ShapeError`] when the ad id is missing.
pub fn normalize_content(customer_id: &str, row: &Value) -> Result<ContentDocument, ShapeError> {
    let row = as_object(row, "google ads content row")?;
    let ad = path(row, &["adGroupAd", "ad"]).ok_or_else(|| ShapeError::missing("adGroupAd.ad"))?;
    let ad_id = require_string(ad, "id")?;
    let campaign = object(row, "campaign");
    let channel = campaign.and_then(|c| opt_string(c, "advertisingChannelType"));

    let search = object(ad, "responsiveSearchAd");
    let display = object(ad, "responsiveDisplayAd");

    let creative = match (channel.as_deref(), search, display) {
        (Some("DISPLAY"), _, Some(display)) | (_, None, Some(display)) => Creative::Display {
            headlines: string_list(display.get("headlines"), "text"),
            descriptions: string_list(display.get("descriptions"), "text"),
            long_headline: text_of(display.get("longHeadline")),
            business_name: text_of(display.get("businessName")),
            youtube_videos: string_list(display.get("youtubeVideos"), "asset"),
            images: string_list(display.get("marketingImages"), "asset"),
        },
        (Some("VIDEO"), _, _) => {
            let mut videos: Vec<String> = path(ad, &["videoAd", "video"])
                .and_then(|v| opt_string(v, "asset"))
                .into_iter()
                .collect();
            if let Some(responsive) = object(ad, "videoResponsiveAd") {
                videos.extend(string_list(responsive.get("videos"), "asset"));
            }
            Creative::Video { videos }
        }
        (_, search, _) => Creative::Search {
            headlines: string_list(search.and_then(|s| s.get("headlines")), "text"),
            descriptions: string_list(search.and_then(|s| s.get("descriptions")), "text"),
        },
    };

    let mut doc = ContentDocument::new(customer_id.replace('-', ""), ad_id, creative);
    if let Some(campaign_id) = campaign.and_then(|c| opt_string(c, "id")) {
        doc = doc.with_campaign(campaign_id);
    }
    Ok(doc)
}
