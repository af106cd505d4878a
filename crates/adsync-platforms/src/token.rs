//! OAuth renewal and liveness probing, one implementation per platform.

use adsync_core::Platform;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::PlatformError;

/// A freshly issued access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` when the platform keeps the previous refresh token valid.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds from the moment of issue; `None` when the
    /// platform did not state one and the stored expiry stands.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    #[must_use]
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| now + Duration::seconds(secs))
    }
}

/// Outcome of a liveness probe that reached the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Valid,
    Invalid,
}

impl TokenStatus {
    #[must_use]
    pub fn is_valid(self) -> bool {
        self == TokenStatus::Valid
    }

    /// Combine per-account probes of one credential.
    ///
    /// Any invalid account invalidates the credential; otherwise one valid
    /// account is enough. Returns `None` when nothing was probed.
    #[must_use]
    pub fn combine(statuses: impl IntoIterator<Item = TokenStatus>) -> Option<TokenStatus> {
        let mut combined = None;
        for status in statuses {
            if status == TokenStatus::Invalid {
                return Some(TokenStatus::Invalid);
            }
            combined = Some(TokenStatus::Valid);
        }
        combined
    }
}

/// The token material a refresh or probe acts on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenSubject {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Platform account the probe is scoped to (Shopee shop id).
    pub account_id: Option<String>,
}

impl TokenSubject {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<String>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    #[must_use]
    pub fn for_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub(crate) fn require_refresh_token(&self) -> Result<&str, PlatformError> {
        self.refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| adsync_core::ShapeError::missing("refresh_token").into())
    }

    pub(crate) fn require_account(&self) -> Result<&str, PlatformError> {
        self.account_id
            .as_deref()
            .ok_or_else(|| adsync_core::ShapeError::missing("account_id").into())
    }
}

/// Token renewal and validity probing for one platform.
///
/// `probe` must report an expected "this token is no good" answer as
/// [`TokenStatus::Invalid`]; only transport or protocol failures are errors.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    fn platform(&self) -> Platform;

    async fn refresh(&self, subject: &TokenSubject) -> Result<TokenGrant, PlatformError>;

    async fn probe(&self, subject: &TokenSubject) -> Result<TokenStatus, PlatformError>;

    /// Whether probes must be scoped to each account bound to the credential.
    fn per_account(&self) -> bool {
        false
    }
}
