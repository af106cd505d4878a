use serde::{Deserialize, Serialize};

/// Every advertising/commerce platform whose credentials the pipeline manages.
///
/// The relational store names platforms differently from how they are shown
/// to users, so both spellings are carried here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Meta,
    GoogleAds,
    GoogleAnalytics,
    TikTok,
    Shopee,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Meta,
        Platform::GoogleAds,
        Platform::GoogleAnalytics,
        Platform::TikTok,
        Platform::Shopee,
    ];

    /// Name used in the `account_platform` table.
    #[must_use]
    pub fn store_name(self) -> &'static str {
        match self {
            Platform::Meta => "facebook",
            Platform::GoogleAds => "gadwords",
            Platform::GoogleAnalytics => "ganalytics",
            Platform::TikTok => "tiktok",
            Platform::Shopee => "shopee",
        }
    }

    /// Name shown in notifications.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Meta => "meta",
            Platform::GoogleAds => "googleAds",
            Platform::GoogleAnalytics => "googleAnalytics",
            Platform::TikTok => "tiktok",
            Platform::Shopee => "shopee",
        }
    }

    /// Prefix used for CLI task names (`refresh_<slug>_token`).
    #[must_use]
    pub fn slug(self) -> &'static str {
        match self {
            Platform::Meta => "meta",
            Platform::GoogleAds => "google_ads",
            Platform::GoogleAnalytics => "google_analytics",
            Platform::TikTok => "tiktok",
            Platform::Shopee => "shopee",
        }
    }

    #[must_use]
    pub fn from_store_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.store_name() == name)
    }

    /// Resolve any accepted spelling: store name, display name, slug, or a
    /// short alias. Case-insensitive.
    #[must_use]
    pub fn from_alias(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "meta" | "facebook" | "fb" => Some(Platform::Meta),
            "googleads" | "google_ads" | "gadwords" | "gads" => Some(Platform::GoogleAds),
            "googleanalytics" | "google_analytics" | "ganalytics" | "ga" => {
                Some(Platform::GoogleAnalytics)
            }
            "tiktok" => Some(Platform::TikTok),
            "shopee" => Some(Platform::Shopee),
            _ => None,
        }
    }

    /// True for platforms that only carry OAuth credentials and have no
    /// sync tasks of their own.
    #[must_use]
    pub fn is_token_only(self) -> bool {
        matches!(self, Platform::GoogleAnalytics)
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
