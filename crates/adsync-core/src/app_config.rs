use crate::platform::Platform;
use crate::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Which Shopee partner environment requests are signed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShopeeEnv {
    Testing,
    Production,
}

impl std::fmt::Display for ShopeeEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShopeeEnv::Testing => write!(f, "testing"),
            ShopeeEnv::Production => write!(f, "production"),
        }
    }
}

/// Outbound HTTP settings shared by every platform adapter.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub default_retry_after_secs: u64,
}

/// Batch sizes and worker-pool width for the sync tasks.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
    pub notify_batch_size: usize,
    pub live_window_days: u32,
}

#[derive(Clone)]
pub struct MetaConfig {
    pub graph_url: String,
    pub api_version: String,
    pub app_id: String,
    pub app_secret: String,
    pub poll_max_attempts: u32,
    pub poll_interval_secs: u64,
}

#[derive(Clone)]
pub struct GoogleConfig {
    pub ads_base_url: String,
    pub ads_api_version: String,
    pub auth_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub developer_token: String,
    pub login_customer_id: Option<String>,
}

#[derive(Clone)]
pub struct TikTokConfig {
    pub base_url: String,
    pub api_version: String,
    pub app_id: String,
    pub secret: String,
}

#[derive(Clone)]
pub struct ShopeeConfig {
    pub env: ShopeeEnv,
    pub base_url: String,
    pub partner_id: i64,
    pub secret_key: String,
    pub api_version: String,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from: String,
}

/// Renewal links included in the token-expiry email, one per platform.
#[derive(Debug, Clone, Default)]
pub struct BindingLinks {
    pub meta: String,
    pub google_ads: String,
    pub google_analytics: String,
    pub tiktok: String,
    pub shopee: String,
}

impl BindingLinks {
    #[must_use]
    pub fn for_platform(&self, platform: Platform) -> &str {
        match platform {
            Platform::Meta => &self.meta,
            Platform::GoogleAds => &self.google_ads,
            Platform::GoogleAnalytics => &self.google_analytics,
            Platform::TikTok => &self.tiktok,
            Platform::Shopee => &self.shopee,
        }
    }
}

/// Raw Shopee partner credentials for both environments; the active pair is
/// picked by [`AppConfig::shopee`].
#[derive(Clone, Default)]
pub struct ShopeeCredentials {
    pub base_url: String,
    pub partner_id: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub http: HttpConfig,
    pub runner: RunnerConfig,
    pub meta_graph_url: String,
    pub meta_api_version: String,
    pub meta_app_id: Option<String>,
    pub meta_app_secret: Option<String>,
    pub meta_poll_max_attempts: u32,
    pub meta_poll_interval_secs: u64,
    pub google_ads_base_url: String,
    pub google_ads_api_version: String,
    pub google_auth_url: String,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_developer_token: Option<String>,
    pub google_login_customer_id: Option<String>,
    pub tiktok_base_url: String,
    pub tiktok_api_version: String,
    pub tiktok_app_id: Option<String>,
    pub tiktok_secret: Option<String>,
    pub shopee_env: ShopeeEnv,
    pub shopee_api_version: String,
    pub shopee_production: ShopeeCredentials,
    pub shopee_testing: ShopeeCredentials,
    pub binding_links: BindingLinks,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
}

fn required(value: Option<&String>, var: &str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
}

impl AppConfig {
    /// Meta Graph API settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if the app id or secret is unset.
    pub fn meta(&self) -> Result<MetaConfig, ConfigError> {
        Ok(MetaConfig {
            graph_url: self.meta_graph_url.clone(),
            api_version: self.meta_api_version.clone(),
            app_id: required(self.meta_app_id.as_ref(), "META_APP_ID")?,
            app_secret: required(self.meta_app_secret.as_ref(), "META_APP_SECRET")?,
            poll_max_attempts: self.meta_poll_max_attempts,
            poll_interval_secs: self.meta_poll_interval_secs,
        })
    }

    /// Google Ads and Google OAuth settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if the OAuth client or the
    /// developer token is unset.
    pub fn google(&self) -> Result<GoogleConfig, ConfigError> {
        Ok(GoogleConfig {
            ads_base_url: self.google_ads_base_url.clone(),
            ads_api_version: self.google_ads_api_version.clone(),
            auth_url: self.google_auth_url.clone(),
            client_id: required(self.google_client_id.as_ref(), "GOOGLE_CLIENT_ID")?,
            client_secret: required(self.google_client_secret.as_ref(), "GOOGLE_CLIENT_SECRET")?,
            developer_token: required(
                self.google_developer_token.as_ref(),
                "GOOGLE_DEVELOPER_TOKEN",
            )?,
            login_customer_id: self.google_login_customer_id.clone(),
        })
    }

    /// TikTok Business API settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if the app id or secret is unset.
    pub fn tiktok(&self) -> Result<TikTokConfig, ConfigError> {
        Ok(TikTokConfig {
            base_url: self.tiktok_base_url.clone(),
            api_version: self.tiktok_api_version.clone(),
            app_id: required(self.tiktok_app_id.as_ref(), "TIKTOK_APP_ID")?,
            secret: required(self.tiktok_secret.as_ref(), "TIKTOK_SECRET")?,
        })
    }

    /// Shopee partner settings for the environment selected by `SHOPEE_ENV`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if the partner id or key for the
    /// active environment is unset, or [`ConfigError::InvalidEnvVar`] if the
    /// partner id is not an integer.
    pub fn shopee(&self) -> Result<ShopeeConfig, ConfigError> {
        let (creds, suffix) = match self.shopee_env {
            ShopeeEnv::Production => (&self.shopee_production, ""),
            ShopeeEnv::Testing => (&self.shopee_testing, "_TEST"),
        };
        let partner_var = format!("SHOPEE_PARTNER_ID{suffix}");
        let partner_raw = required(creds.partner_id.as_ref(), &partner_var)?;
        let partner_id =
            partner_raw
                .parse::<i64>()
                .map_err(|e| ConfigError::InvalidEnvVar {
                    var: partner_var.clone(),
                    reason: e.to_string(),
                })?;
        Ok(ShopeeConfig {
            env: self.shopee_env,
            base_url: creds.base_url.clone(),
            partner_id,
            secret_key: required(
                creds.secret_key.as_ref(),
                &format!("SHOPEE_SECRET_KEY{suffix}"),
            )?,
            api_version: self.shopee_api_version.clone(),
        })
    }

    /// SMTP settings for the expiry notifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if the SMTP user or password is unset.
    pub fn smtp(&self) -> Result<SmtpConfig, ConfigError> {
        let user = required(self.smtp_user.as_ref(), "SMTP_USER")?;
        Ok(SmtpConfig {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            password: required(self.smtp_password.as_ref(), "SMTP_PASSWORD")?,
            from: self.smtp_from.clone().unwrap_or_else(|| user.clone()),
            user,
        })
    }
}

fn redact(value: Option<&String>) -> Option<&'static str> {
    value.map(|_| "[redacted]")
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("http", &self.http)
            .field("runner", &self.runner)
            .field("meta_graph_url", &self.meta_graph_url)
            .field("meta_api_version", &self.meta_api_version)
            .field("meta_app_id", &self.meta_app_id)
            .field("meta_app_secret", &redact(self.meta_app_secret.as_ref()))
            .field("meta_poll_max_attempts", &self.meta_poll_max_attempts)
            .field("meta_poll_interval_secs", &self.meta_poll_interval_secs)
            .field("google_ads_base_url", &self.google_ads_base_url)
            .field("google_ads_api_version", &self.google_ads_api_version)
            .field("google_auth_url", &self.google_auth_url)
            .field("google_client_id", &self.google_client_id)
            .field(
                "google_client_secret",
                &redact(self.google_client_secret.as_ref()),
            )
            .field(
                "google_developer_token",
                &redact(self.google_developer_token.as_ref()),
            )
            .field("google_login_customer_id", &self.google_login_customer_id)
            .field("tiktok_base_url", &self.tiktok_base_url)
            .field("tiktok_api_version", &self.tiktok_api_version)
            .field("tiktok_app_id", &self.tiktok_app_id)
            .field("tiktok_secret", &redact(self.tiktok_secret.as_ref()))
            .field("shopee_env", &self.shopee_env)
            .field("shopee_api_version", &self.shopee_api_version)
            .field("shopee_base_url", &self.shopee_production.base_url)
            .field(
                "shopee_secret_key",
                &redact(self.shopee_production.secret_key.as_ref()),
            )
            .field("shopee_base_url_test", &self.shopee_testing.base_url)
            .field(
                "shopee_secret_key_test",
                &redact(self.shopee_testing.secret_key.as_ref()),
            )
            .field("binding_links", &self.binding_links)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_password", &redact(self.smtp_password.as_ref()))
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for MetaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaConfig")
            .field("graph_url", &self.graph_url)
            .field("api_version", &self.api_version)
            .field("app_id", &self.app_id)
            .field("app_secret", &"[redacted]")
            .field("poll_max_attempts", &self.poll_max_attempts)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}

impl std::fmt::Debug for ShopeeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopeeConfig")
            .field("env", &self.env)
            .field("base_url", &self.base_url)
            .field("partner_id", &self.partner_id)
            .field("secret_key", &"[redacted]")
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[redacted]")
            .field("from", &self.from)
            .finish()
    }
}
