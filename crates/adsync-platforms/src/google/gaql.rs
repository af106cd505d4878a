//! Google Ads Query Language builders.
//!
//! Queries are a fixed select list plus a parameterized filter: the date
//! range, the advertising-channel allowlist and the enabled-status filter.

use adsync_core::{DateRange, Level, SchedulerType};

/// `metrics.*` fields selected by every insight query, in select order.
pub const METRIC_FIELDS: &[&str] = &[
    "metrics.impressions",
    "metrics.clicks",
    "metrics.cost_micros",
    "metrics.engagements",
    "metrics.conversions",
    "metrics.all_conversions",
    "metrics.conversions_value",
    "metrics.all_conversions_value",
    "metrics.video_views",
    "metrics.interactions",
];

const CONTENT_FIELDS: &[&str] = &[
    "campaign.id",
    "campaign.name",
    "campaign.advertising_channel_type",
    "ad_group.id",
    "ad_group.name",
    "ad_group_ad.ad.id",
    "ad_group_ad.ad.name",
    "ad_group_ad.ad.responsive_search_ad.headlines",
    "ad_group_ad.ad.responsive_search_ad.descriptions",
    "ad_group_ad.ad.responsive_display_ad.headlines",
    "ad_group_ad.ad.responsive_display_ad.descriptions",
    "ad_group_ad.ad.responsive_display_ad.long_headline",
    "ad_group_ad.ad.responsive_display_ad.business_name",
    "ad_group_ad.ad.responsive_display_ad.youtube_videos",
    "ad_group_ad.ad.responsive_display_ad.marketing_images",
    "ad_group_ad.ad.video_ad.video.asset",
    "ad_group_ad.ad.video_responsive_ad.videos",
];

fn date_filter(range: DateRange) -> String {
    format!(
        "segments.date BETWEEN '{}' AND '{}'",
        range.start_str(),
        range.end_str()
    )
}

fn channel_filter(channel_types: &[&str]) -> String {
    let quoted: Vec<String> = channel_types.iter().map(|c| format!("'{c}'")).collect();
    format!(
        "campaign.advertising_channel_type IN ({})",
        quoted.join(", ")
    )
}

/// Metrics query at `level`. Daily pulls segment by date; live pulls
/// aggregate over the whole range.
#[must_use]
pub fn insights_query(level: Level, scheduler: SchedulerType, range: DateRange) -> String {
    let (resource, mut fields, status_filter): (&str, Vec<&str>, Option<&str>) = match level {
        Level::Account => ("customer", vec!["customer.id"], None),
        Level::Campaign => (
            "campaign",
            vec![
                "campaign.id",
                "campaign.name",
                "campaign.advertising_channel_type",
            ],
            Some("campaign.status = 'ENABLED'"),
        ),
        Level::Ad => (
            "ad_group_ad",
            vec![
                "campaign.id",
                "campaign.name",
                "campaign.advertising_channel_type",
                "ad_group.id",
                "ad_group.name",
                "ad_group_ad.ad.id",
                "ad_group_ad.ad.name",
            ],
            Some("ad_group_ad.status = 'ENABLED'"),
        ),
    };
    if !scheduler.is_live() {
        fields.push("segments.date");
    }
    fields.extend_from_slice(METRIC_FIELDS);

    let mut conditions = vec![date_filter(range)];
    if let Some(status) = status_filter {
        conditions.push(status.to_owned());
    }

    format!(
        "SELECT {} FROM {resource} WHERE {}",
        fields.join(", "),
        conditions.join(" AND ")
    )
}

/// Creative query for enabled ads of the allowed channel types.
#[must_use]
pub fn content_query(range: DateRange, channel_types: &[&str]) -> String {
    format!(
        "SELECT {} FROM ad_group_ad WHERE {} AND {} AND ad_group_ad.status = 'ENABLED'",
        CONTENT_FIELDS.join(", "),
        date_filter(range),
        channel_filter(channel_types)
    )
}
