//! Shared helpers for the adapter integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use adsync_core::HttpConfig;
use adsync_platforms::{HttpFetcher, Sleeper};
use futures::future::BoxFuture;
use wiremock::Request;

/// Records requested sleeps instead of waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.slept.lock().unwrap().push(duration);
        Box::pin(async {})
    }
}

pub fn http_config(max_retries: u32) -> HttpConfig {
    HttpConfig {
        timeout_secs: 5,
        user_agent: "adsync-test/0.1".to_owned(),
        max_retries,
        backoff_base_secs: 1,
        default_retry_after_secs: 10,
    }
}

/// A fetcher whose sleeps are recorded, never awaited.
pub fn test_fetcher(max_retries: u32) -> (HttpFetcher, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let fetcher = HttpFetcher::new(&http_config(max_retries))
        .expect("failed to build test fetcher")
        .with_sleeper(sleeper.clone());
    (fetcher, sleeper)
}

/// Value of query parameter `name` on a received request.
pub fn query_value(request: &Request, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
