pub mod error;
pub mod fetch;
pub mod google;
pub mod meta;
pub mod normalize;
pub mod pagination;
pub mod shopee;
pub mod tiktok;
pub mod token;

pub use error::PlatformError;
pub use fetch::{HttpFetcher, RawResponse, RetryPolicy, Sleeper, TokioSleeper};
pub use google::{GoogleAdsClient, GoogleOAuth};
pub use meta::MetaClient;
pub use pagination::{fetch_all, Page, MAX_PAGES};
pub use shopee::ShopeeClient;
pub use tiktok::TikTokClient;
pub use token::{TokenAuthority, TokenGrant, TokenStatus, TokenSubject};
