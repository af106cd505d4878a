//! TikTok report field lists, per-level report shape and chunk merging.
//!
//! The integrated report endpoint caps the number of metrics per request, so
//! the field list is split into chunks that are fetched separately. Every
//! chunk returns the same dimension keys with a disjoint slice of metrics;
//! [`merge_chunks`] stitches them back together.

use std::collections::HashMap;

use adsync_core::{Level, SchedulerType};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Most metrics the report endpoint accepts in one request.
pub const METRIC_CHUNK_SIZE: usize = 50;

/// Carries the campaign objective; stored as the document tag, not a counter.
pub const OBJECTIVE_FIELD: &str = "objective_type";

/// Metrics requested by daily pulls.
pub const DAILY_METRICS: &[&str] = &[
    "objective_type",
    "spend",
    "billed_cost",
    "cash_spend",
    "impressions",
    "gross_impressions",
    "clicks",
    "conversion",
    "real_time_conversion",
    "video_play_actions",
    "video_watched_2s",
    "video_watched_6s",
    "engaged_view",
    "engaged_view_15s",
    "video_views_p25",
    "video_views_p50",
    "video_views_p75",
    "video_views_p100",
    "engagements",
    "follows",
    "likes",
    "comments",
    "shares",
    "profile_visits",
    "clicks_on_music_disc",
    "duet_clicks",
    "stitch_clicks",
    "sound_usage_clicks",
    "anchor_clicks",
    "clicks_on_hashtag_challenge",
    "ix_video_views",
    "ix_video_views_p25",
    "ix_video_views_p50",
    "ix_video_views_p75",
    "ix_video_views_p100",
    "tt_playlist_visit",
    "interactive_add_on_impressions",
    "interactive_add_on_destination_clicks",
    "interactive_add_on_activity_clicks",
    "interactive_add_on_option_a_clicks",
    "interactive_add_on_option_b_clicks",
    "countdown_sticker_recall_clicks",
    "live_views",
    "live_unique_views",
    "live_effective_views",
    "live_product_clicks",
    "real_time_app_install",
    "real_time_app_install_cost",
    "app_install",
    "registration",
    "total_registration",
    "purchase",
    "total_purchase",
    "value_per_total_purchase",
    "total_purchase_value",
    "app_event_add_to_cart",
    "total_app_event_add_to_cart",
    "value_per_total_app_event_add_to_cart",
    "total_app_event_add_to_cart_value",
    "checkout",
    "total_checkout",
    "value_per_checkout",
    "total_checkout_value",
    "view_content",
    "total_view_content",
    "value_per_total_view_content",
    "total_view_content_value",
    "next_day_open",
    "total_next_day_open",
    "add_payment_info",
    "total_add_payment_info",
    "add_to_wishlist",
    "total_add_to_wishlist",
    "value_per_total_add_to_wishlist",
    "total_add_to_wishlist_value",
    "launch_app",
    "total_launch_app",
    "complete_tutorial",
    "total_complete_tutorial",
    "value_per_total_complete_tutorial",
    "total_complete_tutorial_value",
    "create_group",
    "total_create_group",
    "value_per_total_create_group",
    "total_create_group_value",
    "join_group",
    "total_join_group",
    "value_per_total_join_group",
    "total_join_group_value",
    "create_gamerole",
    "total_create_gamerole",
    "value_per_total_create_gamerole",
    "total_create_gamerole_value",
    "spend_credits",
    "total_spend_credits",
    "value_per_total_spend_credits",
    "total_spend_credits_value",
    "achieve_level",
    "total_achieve_level",
    "value_per_total_achieve_level",
    "total_achieve_level_value",
    "unlock_achievement",
    "total_unlock_achievement",
    "value_per_total_unlock_achievement",
    "total_unlock_achievement_value",
    "sales_lead",
    "total_sales_lead",
    "value_per_total_sales_lead",
    "total_sales_lead_value",
    "in_app_ad_click",
    "total_in_app_ad_click",
    "value_per_total_in_app_ad_click",
    "total_in_app_ad_click_value",
    "in_app_ad_impr",
    "total_in_app_ad_impr",
    "value_per_total_in_app_ad_impr",
    "total_in_app_ad_impr_value",
    "loan_apply",
    "total_loan_apply",
    "loan_credit",
    "total_loan_credit",
    "loan_disbursement",
    "total_loan_disbursement",
    "total_login",
    "ratings",
    "total_ratings",
    "value_per_total_ratings",
    "total_ratings_value",
    "search",
    "total_search",
    "start_trial",
    "total_start_trial",
    "subscribe",
    "total_subscribe",
    "value_per_total_subscribe",
    "total_subscribe_value",
    "unique_custom_app_events",
    "custom_app_events",
    "value_per_custom_app_event",
    "custom_app_events_value",
    "unique_ad_impression_events",
    "ads_impression_events",
    "value_per_ad_impression_event",
    "total_ad_impression_events_value",
    "vta_conversion",
    "vta_app_install",
    "vta_registration",
    "vta_purchase",
    "vta_complete_payment",
    "vta_complete_payment_value",
    "cta_conversion",
    "cta_app_install",
    "cta_registration",
    "cta_purchase",
    "engaged_view_through_conversions",
    "evta_app_install",
    "evta_registration",
    "evta_purchase",
    "evta_payments_completed",
    "complete_payment",
    "value_per_complete_payment",
    "total_landing_page_view",
    "total_pageview",
    "total_value_per_pageview",
    "button_click",
    "value_per_button_click",
    "total_button_click_value",
    "online_consult",
    "value_per_online_consult",
    "total_online_consult_value",
    "user_registration",
    "value_per_user_registration",
    "total_user_registration_value",
    "page_content_view_events",
    "value_per_page_content_view_event",
    "total_page_view_content_events_value",
    "product_details_page_browse",
    "value_per_product_details_page_browse",
    "total_product_details_page_browse_value",
    "web_event_add_to_cart",
    "value_per_web_event_add_to_cart",
    "total_web_event_add_to_cart_value",
    "on_web_order",
    "value_per_on_web_order",
    "total_on_web_order_value",
    "initiate_checkout",
    "value_per_initiate_checkout",
    "total_initiate_checkout_value",
    "add_billing",
    "value_per_add_billing",
    "total_add_billing_value",
    "page_event_search",
    "value_per_page_event_search",
    "total_page_event_search_value",
    "form",
    "value_per_form",
    "download_start_rate",
    "value_per_download_start",
    "total_download_start_value",
    "on_web_add_to_wishlist",
    "on_web_add_to_wishlist_per_click",
    "value_per_on_web_add_to_wishlist",
    "total_on_web_add_to_wishlist_value",
    "on_web_subscribe",
    "on_web_subscribe_per_click",
    "value_per_on_web_subscribe",
    "total_on_web_subscribe_value",
    "custom_page_events",
    "value_per_custom_page_event",
    "custom_page_events_value",
    "onsite_add_to_wishlist",
    "value_per_onsite_add_to_wishlist",
    "total_onsite_add_to_wishlist_value",
    "onsite_add_billing",
    "value_per_onsite_add_billing",
    "total_onsite_add_billing_value",
    "onsite_form",
    "value_per_onsite_form",
    "total_onsite_form_value",
    "onsite_download_start",
    "onsite_destination_visits",
    "cost_per_onsite_destination_visit",
    "onsite_destination_visit_rate",
    "ix_page_view_count",
    "ix_button_click_count",
    "ix_product_click_count",
    "onsite_shopping",
    "value_per_onsite_shopping",
    "total_onsite_shopping_value",
    "onsite_initiate_checkout_count",
    "value_per_onsite_initiate_checkout_count",
    "total_onsite_initiate_checkout_count_value",
    "onsite_on_web_detail",
    "value_per_onsite_on_web_detail",
    "total_onsite_on_web_detail_value",
    "onsite_on_web_cart",
    "value_per_onsite_on_web_cart",
    "total_onsite_on_web_cart_value",
];

/// Metrics requested by live pulls: reach-style figures that only make
/// sense over the whole window.
pub const LIVE_METRICS: &[&str] = &[
    "objective_type",
    "reach",
    "frequency",
    "cost_per_1000_reached",
    "average_video_play",
    "average_video_play_per_user",
    "onsite_download_start_rate",
    "ix_page_duration_avg",
    "ix_page_viewrate_avg",
];

/// Report request shape for one level and scheduler type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelConfig {
    pub data_level: &'static str,
    /// Report dimensions; they double as the merge key.
    pub dimensions: Vec<&'static str>,
    pub metrics: &'static [&'static str],
}

impl LevelConfig {
    #[must_use]
    pub fn new(level: Level, scheduler: SchedulerType) -> Self {
        let (data_level, entity) = match level {
            Level::Account => ("AUCTION_ADVERTISER", "advertiser_id"),
            Level::Campaign => ("AUCTION_CAMPAIGN", "campaign_id"),
            Level::Ad => ("AUCTION_AD", "ad_id"),
        };
        let (dimensions, metrics) = if scheduler.is_live() {
            (vec![entity], LIVE_METRICS)
        } else {
            (vec![entity, "stat_time_day"], DAILY_METRICS)
        };
        Self {
            data_level,
            dimensions,
            metrics,
        }
    }

    /// Metric names split into request-sized chunks.
    pub fn metric_chunks(&self) -> impl Iterator<Item = &'static [&'static str]> {
        self.metrics.chunks(METRIC_CHUNK_SIZE)
    }

    /// Every requested metric except the objective tag.
    pub fn counters(&self) -> impl Iterator<Item = &'static str> {
        self.metrics
            .iter()
            .copied()
            .filter(|m| *m != OBJECTIVE_FIELD)
    }
}

/// One row of the integrated report.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReportRow {
    #[serde(default)]
    pub dimensions: Map<String, Value>,
    #[serde(default)]
    pub metrics: Map<String, Value>,
}

fn dimension_key(row: &ReportRow, keys: &[&str]) -> Vec<Option<String>> {
    keys.iter()
        .map(|k| row.dimensions.get(*k).map(Value::to_string))
        .collect()
}

/// Union the metrics of rows that share the same `keys` dimension values.
///
/// Rows keep the order in which their key was first seen. A metric present
/// in several chunks keeps the last value.
#[must_use]
pub fn merge_chunks(rows: impl IntoIterator<Item = ReportRow>, keys: &[&str]) -> Vec<ReportRow> {
    let mut merged: Vec<ReportRow> = Vec::new();
    let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();

    for row in rows {
        let key = dimension_key(&row, keys);
        match index.get(&key) {
            Some(&slot) => {
                let target = &mut merged[slot];
                target.dimensions.extend(row.dimensions);
                target.metrics.extend(row.metrics);
            }
            None => {
                index.insert(key, merged.len());
                merged.push(row);
            }
        }
    }
    merged
}
