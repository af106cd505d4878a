//! Typed records written to the document store.
//!
//! Every record knows its own idempotency key ([`KeyedDocument::key`]); a
//! replace-upsert filtered on that key overwrites the previous run's copy.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::window::Level;

/// A record with a natural idempotency key.
pub trait KeyedDocument: Serialize {
    /// Fields (and their values) that identify this record within its collection.
    fn key(&self) -> Map<String, Value>;
}

/// Parse a platform metric value that may arrive as a JSON number or a
/// numeric string (`"12.50"`).
#[must_use]
pub fn metric_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Named numeric counters of an insight row.
///
/// Declared counters default to zero so that a row reporting nothing is
/// recognisable by [`MetricSet::is_all_zero`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(BTreeMap<String, f64>);

impl MetricSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A set with every name in `fields` present and zero.
    #[must_use]
    pub fn declared(fields: &[&str]) -> Self {
        Self(fields.iter().map(|f| ((*f).to_string(), 0.0)).collect())
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    /// Set `name` from a raw JSON value. Returns `false` (and leaves the set
    /// untouched) when the value is not numeric.
    pub fn set_raw(&mut self, name: impl Into<String>, raw: &Value) -> bool {
        match metric_value(raw) {
            Some(v) => {
                self.0.insert(name.into(), v);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0.0)
    }

    /// Per-key union; values from `other` win on collision.
    pub fn merge(&mut self, other: MetricSet) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for MetricSet {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Embedded metrics sub-document: the descriptive tag plus the counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    #[serde(flatten)]
    pub counters: MetricSet,
}

impl InsightData {
    /// True when every counter is zero. The objective/channel tag is not a counter.
    #[must_use]
    pub fn is_empty_event(&self) -> bool {
        self.counters.is_all_zero()
    }
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

/// Daily rows carry one date; live rows carry the window they cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsightPeriod {
    Range {
        date_start: NaiveDate,
        date_end: NaiveDate,
    },
    Day {
        date: NaiveDate,
    },
}

impl InsightPeriod {
    fn insert_into(&self, map: &mut Map<String, Value>) {
        match self {
            InsightPeriod::Day { date } => {
                map.insert("date".into(), Value::String(date.to_string()));
            }
            InsightPeriod::Range {
                date_start,
                date_end,
            } => {
                map.insert("date_start".into(), Value::String(date_start.to_string()));
                map.insert("date_end".into(), Value::String(date_end.to_string()));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightDocument {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adset_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ad_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_position: Option<String>,
    #[serde(flatten)]
    pub period: InsightPeriod,
    pub data: InsightData,
    pub date_inserted: DateTime<Utc>,
}

impl InsightDocument {
    #[must_use]
    pub fn new(account_id: impl Into<String>, period: InsightPeriod, data: InsightData) -> Self {
        Self {
            account_id: account_id.into(),
            campaign_id: None,
            campaign_name: None,
            adset_id: None,
            adset_name: None,
            ad_id: None,
            ad_name: None,
            publisher_platform: None,
            platform_position: None,
            period,
            data,
            date_inserted: Utc::now(),
        }
    }

    /// Identifier of the entity this row aggregates at `level`.
    #[must_use]
    pub fn entity_id(&self, level: Level) -> Option<&str> {
        match level {
            Level::Account => Some(self.account_id.as_str()),
            Level::Campaign => self.campaign_id.as_deref(),
            Level::Ad => self.ad_id.as_deref(),
        }
    }
}

impl KeyedDocument for InsightDocument {
    fn key(&self) -> Map<String, Value> {
        let mut key = Map::new();
        key.insert("account_id".into(), Value::String(self.account_id.clone()));
        let ids = [
            ("campaign_id", &self.campaign_id),
            ("adset_id", &self.adset_id),
            ("ad_id", &self.ad_id),
            ("publisher_platform", &self.publisher_platform),
            ("platform_position", &self.platform_position),
        ];
        for (field, value) in ids {
            if let Some(v) = value {
                key.insert(field.into(), Value::String(v.clone()));
            }
        }
        self.period.insert_into(&mut key);
        key
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Creative payload, one variant per platform/creative family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Creative {
    /// Rendered Meta ad preview.
    Preview {
        ad_format: String,
        body: Option<String>,
    },
    /// Hosted media with an optional URL expiry (TikTok).
    Media {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<String>,
    },
    Search {
        headlines: Vec<String>,
        descriptions: Vec<String>,
    },
    Display {
        headlines: Vec<String>,
        descriptions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        long_headline: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        business_name: Option<String>,
        youtube_videos: Vec<String>,
        images: Vec<String>,
    },
    Video {
        videos: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDocument {
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub ad_id: String,
    pub data: Creative,
    pub date_inserted: DateTime<Utc>,
}

impl ContentDocument {
    #[must_use]
    pub fn new(account_id: impl Into<String>, ad_id: impl Into<String>, data: Creative) -> Self {
        Self {
            account_id: account_id.into(),
            campaign_id: None,
            ad_id: ad_id.into(),
            data,
            date_inserted: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }
}

impl KeyedDocument for ContentDocument {
    fn key(&self) -> Map<String, Value> {
        let mut key = Map::new();
        key.insert("account_id".into(), Value::String(self.account_id.clone()));
        if let Some(campaign_id) = &self.campaign_id {
            key.insert("campaign_id".into(), Value::String(campaign_id.clone()));
        }
        key.insert("ad_id".into(), Value::String(self.ad_id.clone()));
        key
    }
}

// ---------------------------------------------------------------------------
// Report references
// ---------------------------------------------------------------------------

/// Lifecycle of an asynchronous Meta report job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportStatus {
    Pending,
    Completed,
    Failed,
}

impl ReportStatus {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            ReportStatus::Pending => 0,
            ReportStatus::Completed => 1,
            ReportStatus::Failed => 2,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReportStatus::Pending),
            1 => Some(ReportStatus::Completed),
            2 => Some(ReportStatus::Failed),
            _ => None,
        }
    }
}

impl Serialize for ReportStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for ReportStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        ReportStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown report status {code}")))
    }
}

/// Queued handle to a Meta async insights job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportReference {
    pub account_id: String,
    pub access_token: String,
    pub level: Level,
    pub reference: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub status: ReportStatus,
}

impl KeyedDocument for ReportReference {
    fn key(&self) -> Map<String, Value> {
        let mut key = Map::new();
        key.insert("account_id".into(), Value::String(self.account_id.clone()));
        key.insert("reference".into(), Value::String(self.reference.clone()));
        key
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Full Shopee order payload keyed by order serial number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDocument {
    pub order_sn: String,
    pub shop_id: i64,
    pub detail: Value,
    pub updated_at: DateTime<Utc>,
}

impl KeyedDocument for OrderDocument {
    fn key(&self) -> Map<String, Value> {
        let mut key = Map::new();
        key.insert("order_sn".into(), Value::String(self.order_sn.clone()));
        key
    }
}
