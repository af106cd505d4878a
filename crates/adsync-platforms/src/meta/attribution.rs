//! Flattening of Meta action arrays into named counters.
//!
//! Meta reports conversions as arrays keyed by `action_type`, each entry
//! carrying a bare `value` and one sub-value per attribution window:
//!
//! ```json
//! {"action_type": "omni_purchase", "value": "9", "7d_click": "5", "1d_view": "4"}
//! ```
//!
//! The row's `attribution_setting` decides which of those numbers counts.

use adsync_core::MetricSet;
use serde_json::{Map, Value};

/// Settings that already fold several windows into the bare `value`.
const MULTI_WINDOW_SETTINGS: &[&str] = &["multiple", "1d_view_7d_click", "1d_view_1d_click", "skan"];

/// Settings that name one window whose sub-value is used as-is.
const SINGLE_WINDOW_SETTINGS: &[&str] = &["1d_view", "7d_click", "1d_click"];

/// `<array field>_<action_type>` → counter name.
const ACTION_METRICS: &[(&str, &str)] = &[
    ("actions_link_click", "link_click"),
    ("actions_landing_page_view", "landing_page_view"),
    ("actions_omni_add_to_cart", "add_to_cart"),
    ("action_values_omni_add_to_cart", "add_to_cart_value"),
    ("actions_omni_purchase", "purchase"),
    ("action_values_omni_purchase", "purchase_value"),
    ("actions_omni_initiated_checkout", "initiate_checkout"),
    ("actions_post_engagement", "post_engagement"),
    ("catalog_segment_actions_omni_add_to_cart", "add_to_cart_shared_item"),
    ("catalog_segment_value_omni_add_to_cart", "add_to_cart_value_shared_item"),
    ("catalog_segment_actions_omni_purchase", "purchase_shared_item"),
    ("catalog_segment_value_omni_purchase", "purchase_value_shared_item"),
    ("catalog_segment_actions_omni_view_content", "content_view_shared_item"),
    ("catalog_segment_value_omni_view_content", "content_view_value_shared_item"),
    ("actions_lead", "lead"),
    ("actions_submit_application_total", "application_submitted"),
    ("actions_fb_pixel_custom", "application_submitted_custom"),
    ("actions_omni_complete_registration", "registration_completed"),
    ("actions_post_save", "post_saves"),
    ("actions_post_reaction", "post_reaction"),
    ("actions_comment", "post_comment"),
    ("actions_post", "post_share"),
    ("outbound_clicks_outbound_click", "outbound_click"),
    ("video_15_sec_watched_actions_video_view", "thruplays"),
    ("video_play_actions_video_view", "video_play"),
    ("video_p100_watched_actions_video_view", "video_play_100"),
    ("actions_messaging_first_reply", "messaging_new"),
    ("actions_messaging_block", "messaging_blocked"),
    ("actions_messaging_conversation_started_7d", "messaging_conv_started"),
];

/// Which entry key holds the number for a given `attribution_setting`.
#[must_use]
pub fn window_key(attribution_setting: Option<&str>) -> &str {
    match attribution_setting {
        Some(setting) if MULTI_WINDOW_SETTINGS.contains(&setting) => "value",
        Some(setting) if SINGLE_WINDOW_SETTINGS.contains(&setting) => setting,
        _ => "value",
    }
}

/// Plain `purchase` entries, counted only when no omni entry supplied the
/// counter.
const FALLBACK_METRICS: &[(&str, &str)] = &[
    ("actions_purchase", "purchase"),
    ("action_values_purchase", "purchase_value"),
];

fn counter_for(
    table: &[(&str, &'static str)],
    field: &str,
    action_type: &str,
) -> Option<&'static str> {
    let key = format!("{field}_{action_type}");
    table
        .iter()
        .find(|(source, _)| *source == key)
        .map(|(_, counter)| *counter)
}

fn copy_entries(
    row: &Map<String, Value>,
    window: &str,
    table: &[(&str, &'static str)],
    metrics: &mut MetricSet,
    overwrite: bool,
) {
    for (field, value) in row {
        let Value::Array(entries) = value else {
            continue;
        };
        for entry in entries {
            let Some(action_type) = entry.get("action_type").and_then(Value::as_str) else {
                continue;
            };
            let Some(counter) = counter_for(table, field, action_type) else {
                continue;
            };
            if !overwrite && metrics.get(counter).is_some_and(|v| v != 0.0) {
                continue;
            }
            let Some(raw) = entry.get(window) else {
                continue;
            };
            if adsync_core::metric_value(raw).is_some_and(|v| v != 0.0) {
                metrics.set_raw(counter, raw);
            }
        }
    }
}

/// Copy every recognised action entry of `row` into `metrics`.
///
/// Entries whose selected value is missing, non-numeric or zero leave the
/// counter untouched.
pub fn flatten_actions(row: &Map<String, Value>, metrics: &mut MetricSet) {
    let window = window_key(row.get("attribution_setting").and_then(Value::as_str));
    copy_entries(row, window, ACTION_METRICS, metrics, true);
    copy_entries(row, window, FALLBACK_METRICS, metrics, false);
}
