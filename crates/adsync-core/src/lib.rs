pub mod app_config;
pub mod config;
pub mod documents;
pub mod platform;
pub mod window;

use thiserror::Error;

pub use app_config::{
    AppConfig, BindingLinks, Environment, GoogleConfig, HttpConfig, MetaConfig, RunnerConfig,
    ShopeeConfig, ShopeeCredentials, ShopeeEnv, SmtpConfig, TikTokConfig,
};
pub use config::{load_app_config, load_app_config_from_env};
pub use documents::{
    metric_value, ContentDocument, Creative, InsightData, InsightDocument, InsightPeriod,
    KeyedDocument, MetricSet, OrderDocument, ReportReference, ReportStatus,
};
pub use platform::Platform;
pub use window::{collection_name, DateRange, Level, SchedulerType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}

/// A platform response could not be mapped onto a document record.
///
/// Raised per record; callers log it with the offending identifier and skip
/// the record instead of abandoning the whole account.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("shape error at `{field}`: {reason}")]
pub struct ShapeError {
    pub field: String,
    pub reason: String,
}

impl ShapeError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a required field that is absent or null.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "missing")
    }
}
