use crate::app_config::{
    AppConfig, BindingLinks, Environment, HttpConfig, RunnerConfig, ShopeeCredentials, ShopeeEnv,
};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Platform secrets are optional here; the per-platform accessors on
/// [`AppConfig`] report them as missing when a task actually needs them.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let optional = |var: &str| -> Option<String> { lookup(var).ok().filter(|v| !v.is_empty()) };

    let or_default = |var: &str, default: &str| -> String {
        optional(var).unwrap_or_else(|| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u16 = |var: &str, default: &str| -> Result<u16, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u16>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_positive = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        match raw.parse::<usize>() {
            Ok(0) => Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: "must be greater than zero".to_string(),
            }),
            Ok(n) => Ok(n),
            Err(e) => Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        }
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("ADSYNC_ENV", "development"))?;
    let log_level = or_default("ADSYNC_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("ADSYNC_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("ADSYNC_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("ADSYNC_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let http = HttpConfig {
        timeout_secs: parse_u64("ADSYNC_HTTP_TIMEOUT_SECS", "30")?,
        user_agent: or_default("ADSYNC_HTTP_USER_AGENT", "adsync/0.1 (ads-sync)"),
        max_retries: parse_u32("ADSYNC_HTTP_MAX_RETRIES", "3")?,
        backoff_base_secs: parse_u64("ADSYNC_HTTP_BACKOFF_BASE_SECS", "1")?,
        default_retry_after_secs: parse_u64("ADSYNC_HTTP_DEFAULT_RETRY_AFTER_SECS", "10")?,
    };

    let runner = RunnerConfig {
        batch_size: parse_positive("ADSYNC_BATCH_SIZE", "10")?,
        max_concurrency: parse_positive("ADSYNC_MAX_CONCURRENCY", "5")?,
        notify_batch_size: parse_positive("ADSYNC_NOTIFY_BATCH_SIZE", "100")?,
        live_window_days: parse_u32("ADSYNC_LIVE_WINDOW_DAYS", "30")?,
    };

    let shopee_env = parse_shopee_env(&or_default("SHOPEE_ENV", "production"))?;
    let shopee_production = ShopeeCredentials {
        base_url: or_default("SHOPEE_BASE_URL", "https://partner.shopeemobile.com"),
        partner_id: optional("SHOPEE_PARTNER_ID"),
        secret_key: optional("SHOPEE_SECRET_KEY"),
    };
    let shopee_testing = ShopeeCredentials {
        base_url: or_default(
            "SHOPEE_BASE_URL_TEST",
            "https://partner.test-stable.shopeemobile.com",
        ),
        partner_id: optional("SHOPEE_PARTNER_ID_TEST"),
        secret_key: optional("SHOPEE_SECRET_KEY_TEST"),
    };

    let binding_links = BindingLinks {
        meta: or_default("META_BINDING_URL", ""),
        google_ads: or_default("GOOGLE_ADS_BINDING_URL", ""),
        google_analytics: or_default("GOOGLE_ANALYTICS_BINDING_URL", ""),
        tiktok: or_default("TIKTOK_BINDING_URL", ""),
        shopee: or_default("SHOPEE_BINDING_URL", ""),
    };

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        http,
        runner,
        meta_graph_url: or_default("META_GRAPH_URL", "https://graph.facebook.com"),
        meta_api_version: or_default("META_API_VERSION", "v21.0"),
        meta_app_id: optional("META_APP_ID"),
        meta_app_secret: optional("META_APP_SECRET"),
        meta_poll_max_attempts: parse_u32("META_POLL_MAX_ATTEMPTS", "30")?,
        meta_poll_interval_secs: parse_u64("META_POLL_INTERVAL_SECS", "10")?,
        google_ads_base_url: or_default("GOOGLE_ADS_BASE_URL", "https://googleads.googleapis.com"),
        google_ads_api_version: or_default("GOOGLE_ADS_API_VERSION", "v18"),
        google_auth_url: or_default("GOOGLE_AUTH_URL", "https://oauth2.googleapis.com"),
        google_client_id: optional("GOOGLE_CLIENT_ID"),
        google_client_secret: optional("GOOGLE_CLIENT_SECRET"),
        google_developer_token: optional("GOOGLE_DEVELOPER_TOKEN"),
        google_login_customer_id: optional("GOOGLE_LOGIN_CUSTOMER_ID"),
        tiktok_base_url: or_default(
            "TIKTOK_BASE_URL",
            "https://business-api.tiktok.com/open_api",
        ),
        tiktok_api_version: or_default("TIKTOK_API_VERSION", "v1.3"),
        tiktok_app_id: optional("TIKTOK_APP_ID"),
        tiktok_secret: optional("TIKTOK_SECRET"),
        shopee_env,
        shopee_api_version: or_default("SHOPEE_API_VERSION", "v2"),
        shopee_production,
        shopee_testing,
        binding_links,
        smtp_host: or_default("SMTP_HOST", "smtp.gmail.com"),
        smtp_port: parse_u16("SMTP_PORT", "587")?,
        smtp_user: optional("SMTP_USER"),
        smtp_password: optional("SMTP_PASSWORD"),
        smtp_from: optional("SMTP_FROM"),
    })
}

fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "ADSYNC_ENV".to_string(),
            reason: format!("unknown environment `{other}`"),
        }),
    }
}

fn parse_shopee_env(s: &str) -> Result<ShopeeEnv, ConfigError> {
    match s {
        "production" => Ok(ShopeeEnv::Production),
        "testing" | "test" => Ok(ShopeeEnv::Testing),
        other => Err(ConfigError::InvalidEnvVar {
            var: "SHOPEE_ENV".to_string(),
            reason: format!("expected `production` or `testing`, got `{other}`"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
