//! Google adapters: the shared OAuth authority (Google Ads and Google
//! Analytics credentials) and the Google Ads search API.

pub mod ads;
pub mod gaql;
pub mod oauth;

pub use ads::{normalize_content, normalize_insight, GoogleAdsClient, CHANNEL_TYPES, COUNTERS};
pub use oauth::GoogleOAuth;
