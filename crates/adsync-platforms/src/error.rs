use adsync_core::ShapeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {context} (retry after {retry_after_secs}s)")]
    RateLimited {
        context: String,
        retry_after_secs: u64,
    },

    #[error("server error {status} from {context}")]
    ServerError { status: u16, context: String },

    #[error("unexpected HTTP status {status} from {context}: {body}")]
    UnexpectedStatus {
        status: u16,
        context: String,
        body: String,
    },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context} returned error {code}: {message}")]
    Api {
        context: String,
        code: String,
        message: String,
    },

    #[error("pagination limit reached for {context}: exceeded {max_pages} pages")]
    PaginationLimit { context: String, max_pages: usize },

    #[error("{context} returned cursor \"{cursor}\" twice")]
    RepeatedCursor { context: String, cursor: String },

    #[error("report job {reference} finished with status \"{status}\"")]
    JobFailed { reference: String, status: String },

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl PlatformError {
    /// Transient conditions worth another attempt after a backoff delay.
    ///
    /// Parse failures, 4xx statuses and platform error codes are returned
    /// immediately; retrying would produce the same answer.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            PlatformError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            PlatformError::RateLimited { .. } | PlatformError::ServerError { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn deserialize(context: &str, source: serde_json::Error) -> Self {
        PlatformError::Deserialize {
            context: context.to_owned(),
            source,
        }
    }

    pub(crate) fn api(context: &str, code: impl ToString, message: impl Into<String>) -> Self {
        PlatformError::Api {
            context: context.to_owned(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}
