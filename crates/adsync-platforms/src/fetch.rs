//! Rate-limited HTTP fetcher shared by every platform adapter.
//!
//! Each logical request is built by the adapter and sent through
//! [`HttpFetcher::send`], which retries transient failures:
//!
//! - HTTP 429 sleeps for the `Retry-After` hint (or the configured default).
//! - Network failures and 5xx responses sleep `backoff_base_secs * 2^attempt`.
//!
//! Once retries are exhausted the last error is returned. A failed call is
//! never turned into an empty result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use adsync_core::HttpConfig;
use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::PlatformError;

/// Longest response body excerpt carried in an error.
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Base delay for exponential backoff: `backoff_base_secs * 2^attempt`.
    pub backoff_base_secs: u64,
    /// Used when a 429 response carries no usable `Retry-After` header.
    pub default_retry_after_secs: u64,
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base_secs: config.backoff_base_secs,
            default_retry_after_secs: config.default_retry_after_secs,
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, err: &PlatformError, attempt: u32) -> u64 {
        match err {
            PlatformError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => self
                .backoff_base_secs
                .saturating_mul(1u64 << attempt.min(62)),
        }
    }
}

/// Suspends the current task between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Status and body of a response that was not retried away.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    /// Parse the body as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Deserialize`] when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self, context: &str) -> Result<T, PlatformError> {
        serde_json::from_str::<T>(&self.body).map_err(|e| PlatformError::deserialize(context, e))
    }

    /// Fail with [`PlatformError::UnexpectedStatus`] unless the status is 2xx.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn require_success(self, context: &str) -> Result<Self, PlatformError> {
        if self.status.is_success() {
            return Ok(self);
        }
        let mut body = self.body;
        if body.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(PlatformError::UnexpectedStatus {
            status: self.status.as_u16(),
            context: context.to_owned(),
            body,
        })
    }
}

/// HTTP client with a shared retry policy.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    /// Creates a fetcher with the configured timeout, `User-Agent` and retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(config: &HttpConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self {
            client,
            policy: RetryPolicy::from(config),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Suspend for `duration` through the configured sleeper.
    pub async fn pause(&self, duration: Duration) {
        self.sleeper.sleep(duration).await;
    }

    /// Runs `operation` until it succeeds, fails with a non-retriable
    /// error, or `max_retries` additional attempts have been spent.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `operation`.
    pub async fn retry<T, F, Fut>(&self, context: &str, mut operation: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let mut attempt = 0u32;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retriable() || attempt >= self.policy.max_retries {
                return Err(err);
            }

            let delay_secs = self.policy.delay_for(&err, attempt);
            tracing::warn!(
                context,
                attempt,
                max_retries = self.policy.max_retries,
                delay_secs,
                error = %err,
                "transient platform error, retrying after backoff"
            );
            self.sleeper.sleep(Duration::from_secs(delay_secs)).await;
            attempt += 1;
        }
    }

    /// Sends the request produced by `build`, retrying 429, 5xx and
    /// transport failures. Any other status is handed back to the caller.
    ///
    /// # Errors
    ///
    /// - [`PlatformError::RateLimited`]: still 429 after all retries.
    /// - [`PlatformError::ServerError`]: still 5xx after all retries.
    /// - [`PlatformError::Http`]: network or TLS failure.
    pub async fn send<F>(&self, context: &str, build: F) -> Result<RawResponse, PlatformError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.send_with(context, build, Ok).await
    }

    /// Like [`send`](Self::send), but `decode` runs inside the retry loop so
    /// platforms that signal throttling in the body can return
    /// [`PlatformError::RateLimited`] and be retried.
    ///
    /// # Errors
    ///
    /// Any error from the request or from `decode`.
    pub async fn send_with<T, F, D>(
        &self,
        context: &str,
        build: F,
        decode: D,
    ) -> Result<T, PlatformError>
    where
        F: Fn(&Client) -> RequestBuilder,
        D: Fn(RawResponse) -> Result<T, PlatformError>,
    {
        let client = &self.client;
        let build = &build;
        let decode = &decode;
        let default_retry_after = self.policy.default_retry_after_secs;

        self.retry(context, move || {
            let request = build(client);
            async move {
                let response = request.send().await?;
                let status = response.status();

                if status == StatusCode::TOO_MANY_REQUESTS {
                    let retry_after_secs = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.trim().parse::<u64>().ok())
                        .unwrap_or(default_retry_after);
                    return Err(PlatformError::RateLimited {
                        context: context.to_owned(),
                        retry_after_secs,
                    });
                }

                if status.is_server_error() {
                    return Err(PlatformError::ServerError {
                        status: status.as_u16(),
                        context: context.to_owned(),
                    });
                }

                let body = response.text().await?;
                decode(RawResponse { status, body })
            }
        })
        .await
    }

    /// [`send`](Self::send), then require 2xx and parse the body as `T`.
    ///
    /// # Errors
    ///
    /// Any error from [`send`](Self::send), plus
    /// [`PlatformError::UnexpectedStatus`] and [`PlatformError::Deserialize`].
    pub async fn send_json<T, F>(&self, context: &str, build: F) -> Result<T, PlatformError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        self.send(context, build)
            .await?
            .require_success(context)?
            .json(context)
    }
}
