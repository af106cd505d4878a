use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Inclusive calendar date range a sync task pulls data for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvVar`] if `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidEnvVar {
                var: "date range".to_string(),
                reason: format!("start {start} is after end {end}"),
            });
        }
        Ok(Self { start, end })
    }

    /// Default daily window: yesterday through today.
    #[must_use]
    pub fn daily(today: NaiveDate) -> Self {
        Self {
            start: today.checked_sub_days(Days::new(1)).unwrap_or(today),
            end: today,
        }
    }

    /// Rolling cumulative window ending today.
    #[must_use]
    pub fn live(today: NaiveDate, window_days: u32) -> Self {
        Self {
            start: today
                .checked_sub_days(Days::new(u64::from(window_days)))
                .unwrap_or(today),
            end: today,
        }
    }

    /// Number of calendar days covered, counting both ends.
    #[must_use]
    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Split into consecutive windows no longer than `max_days` each.
    #[must_use]
    pub fn split(&self, max_days: u32) -> Vec<DateRange> {
        let step = u64::from(max_days.max(1));
        let mut windows = Vec::new();
        let mut cursor = self.start;
        while cursor <= self.end {
            let last = cursor
                .checked_add_days(Days::new(step - 1))
                .map_or(self.end, |d| d.min(self.end));
            windows.push(DateRange {
                start: cursor,
                end: last,
            });
            match last.checked_add_days(Days::new(1)) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        windows
    }

    #[must_use]
    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    #[must_use]
    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

/// Entity tier a metrics pull aggregates at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Account,
    #[default]
    Campaign,
    Ad,
}

impl Level {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Account => "account",
            Level::Campaign => "campaign",
            Level::Ad => "ad",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "account" => Ok(Level::Account),
            "campaign" => Ok(Level::Campaign),
            "ad" => Ok(Level::Ad),
            other => Err(ConfigError::InvalidEnvVar {
                var: "level".to_string(),
                reason: format!("expected account, campaign or ad, got `{other}`"),
            }),
        }
    }
}

/// Daily incremental pull or cumulative live pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerType {
    #[default]
    Daily,
    Live,
}

impl SchedulerType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerType::Daily => "daily",
            SchedulerType::Live => "live",
        }
    }

    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, SchedulerType::Live)
    }

    /// Window a task should pull when no explicit dates were given.
    #[must_use]
    pub fn default_range(self, today: NaiveDate, live_window_days: u32) -> DateRange {
        match self {
            SchedulerType::Daily => DateRange::daily(today),
            SchedulerType::Live => DateRange::live(today, live_window_days),
        }
    }
}

impl std::fmt::Display for SchedulerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SchedulerType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "daily" => Ok(SchedulerType::Daily),
            "live" => Ok(SchedulerType::Live),
            other => Err(ConfigError::InvalidEnvVar {
                var: "scheduler_type".to_string(),
                reason: format!("expected daily or live, got `{other}`"),
            }),
        }
    }
}

/// Document collection name: `<prefix>_<kind>[_<level>][_<scheduler>]`.
///
/// The daily scheduler adds no suffix.
#[must_use]
pub fn collection_name(
    prefix: &str,
    kind: &str,
    level: Option<Level>,
    scheduler: SchedulerType,
) -> String {
    let mut name = format!("{prefix}_{kind}");
    if let Some(level) = level {
        name.push('_');
        name.push_str(level.as_str());
    }
    if scheduler.is_live() {
        name.push('_');
        name.push_str(scheduler.as_str());
    }
    name
}
