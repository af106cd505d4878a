use adsync_core::{GoogleConfig, Platform};
use async_trait::async_trait;

use crate::error::PlatformError;
use crate::fetch::HttpFetcher;
use crate::token::{TokenAuthority, TokenGrant, TokenStatus, TokenSubject};

/// Google OAuth token endpoints, shared by every Google product credential.
#[derive(Clone)]
pub struct GoogleOAuth {
    fetcher: HttpFetcher,
    auth_url: String,
    client_id: String,
    client_secret: String,
    platform: Platform,
}

impl GoogleOAuth {
    /// `platform` is [`Platform::GoogleAds`] or [`Platform::GoogleAnalytics`];
    /// both use the same endpoints and app credentials.
    #[must_use]
    pub fn new(fetcher: HttpFetcher, config: &GoogleConfig, platform: Platform) -> Self {
        Self {
            fetcher,
            auth_url: config.auth_url.trim_end_matches('/').to_owned(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            platform,
        }
    }
}

#[async_trait]
impl TokenAuthority for GoogleOAuth {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn refresh(&self, subject: &TokenSubject) -> Result<TokenGrant, PlatformError> {
        let context = "google token refresh";
        let refresh_token = subject.require_refresh_token()?;
        let url = format!("{}/token", self.auth_url);

        let grant: TokenGrant = self
            .fetcher
            .send_json(context, |client| {
                client.post(&url).form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ])
            })
            .await?;

        // Google only rotates the refresh token occasionally.
        Ok(TokenGrant {
            refresh_token: grant
                .refresh_token
                .or_else(|| Some(refresh_token.to_owned())),
            ..grant
        })
    }

    /// `tokeninfo` answers 200 for a live token and 400 otherwise.
    async fn probe(&self, subject: &TokenSubject) -> Result<TokenStatus, PlatformError> {
        let url = format!("{}/tokeninfo", self.auth_url);
        let raw = self
            .fetcher
            .send("google tokeninfo", |client| {
                client
                    .get(&url)
                    .query(&[("access_token", subject.access_token.as_str())])
            })
            .await?;

        Ok(if raw.status.is_success() {
            TokenStatus::Valid
        } else {
            TokenStatus::Invalid
        })
    }
}
