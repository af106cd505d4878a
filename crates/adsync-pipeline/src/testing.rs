//! In-memory collaborators for the task tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adsync_core::{HttpConfig, Platform};
use adsync_db::{
    AccountToken, CredentialRow, CredentialStore, CredentialUpdate, CredentialWithUser, DbError,
    OwnerCredentialUpdate, PlatformRow,
};
use adsync_platforms::{
    HttpFetcher, PlatformError, Sleeper, TokenAuthority, TokenGrant, TokenStatus, TokenSubject,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;

pub(crate) fn platform_row_id(platform: Platform) -> i64 {
    let position = Platform::ALL
        .iter()
        .position(|p| *p == platform)
        .unwrap_or_default();
    i64::try_from(position).unwrap_or_default() + 1
}

/// A valid credential expiring in thirty days.
pub(crate) fn credential(id: i64, user_id: i64, platform: Platform, token: &str) -> CredentialRow {
    let now = Utc::now();
    CredentialRow {
        id,
        user_id,
        platform_id: platform_row_id(platform),
        flag: true,
        access_token: Some(token.to_owned()),
        refresh_token: Some(format!("{token}-refresh")),
        token_expires_at: Some(now + ChronoDuration::days(30)),
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeCredentialStore {
    platforms: Vec<PlatformRow>,
    credentials: Vec<CredentialRow>,
    accounts: HashMap<i64, Vec<String>>,
    updates: Mutex<Vec<CredentialUpdate>>,
    owner_updates: Mutex<Vec<(i64, OwnerCredentialUpdate)>>,
    writes: AtomicUsize,
}

impl FakeCredentialStore {
    /// Every platform registered, no credentials.
    pub(crate) fn new() -> Self {
        let platforms = Platform::ALL
            .iter()
            .map(|p| PlatformRow {
                id: platform_row_id(*p),
                name: p.store_name().to_owned(),
            })
            .collect();
        Self {
            platforms,
            ..Self::default()
        }
    }

    /// No platforms at all.
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn with_credential(mut self, row: CredentialRow) -> Self {
        self.credentials.push(row);
        self
    }

    pub(crate) fn with_accounts(mut self, user_id: i64, accounts: &[&str]) -> Self {
        self.accounts
            .entry(user_id)
            .or_default()
            .extend(accounts.iter().map(|a| (*a).to_owned()));
        self
    }

    pub(crate) fn applied_updates(&self) -> Vec<CredentialUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub(crate) fn owner_updates(&self) -> Vec<(i64, OwnerCredentialUpdate)> {
        self.owner_updates.lock().unwrap().clone()
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for FakeCredentialStore {
    async fn platform_by_name(&self, name: &str) -> Result<Option<PlatformRow>, DbError> {
        Ok(self.platforms.iter().find(|p| p.name == name).cloned())
    }

    async fn platform_by_id(&self, id: i64) -> Result<Option<PlatformRow>, DbError> {
        Ok(self.platforms.iter().find(|p| p.id == id).cloned())
    }

    async fn list_credentials(&self, platform_id: i64) -> Result<Vec<CredentialRow>, DbError> {
        Ok(self
            .credentials
            .iter()
            .filter(|c| c.platform_id == platform_id)
            .cloned()
            .collect())
    }

    async fn list_credentials_with_users(&self) -> Result<Vec<CredentialWithUser>, DbError> {
        Ok(self
            .credentials
            .iter()
            .map(|c| CredentialWithUser {
                credential: c.clone(),
                user_name: format!("User {}", c.user_id),
                user_email: format!("user{}@example.com", c.user_id),
            })
            .collect())
    }

    async fn list_account_tokens(&self, platform_id: i64) -> Result<Vec<AccountToken>, DbError> {
        let mut seen = HashSet::new();
        let mut tokens = Vec::new();
        for c in self
            .credentials
            .iter()
            .filter(|c| c.platform_id == platform_id && c.flag)
        {
            let Some(access_token) = &c.access_token else {
                continue;
            };
            for account in self.accounts.get(&c.user_id).into_iter().flatten() {
                if seen.insert(account.clone()) {
                    tokens.push(AccountToken {
                        account_id: account.clone(),
                        user_id: c.user_id,
                        access_token: access_token.clone(),
                        refresh_token: c.refresh_token.clone(),
                    });
                }
            }
        }
        Ok(tokens)
    }

    async fn list_account_ids(
        &self,
        _platform_id: i64,
        user_id: i64,
    ) -> Result<Vec<String>, DbError> {
        Ok(self.accounts.get(&user_id).cloned().unwrap_or_default())
    }

    async fn apply_credential_updates(&self, updates: &[CredentialUpdate]) -> Result<u64, DbError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.updates.lock().unwrap().extend_from_slice(updates);
        Ok(updates.len() as u64)
    }

    async fn apply_owner_updates(
        &self,
        platform_id: i64,
        updates: &[OwnerCredentialUpdate],
    ) -> Result<u64, DbError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.owner_updates
            .lock()
            .unwrap()
            .extend(updates.iter().cloned().map(|u| (platform_id, u)));
        Ok(updates.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Token authority
// ---------------------------------------------------------------------------

/// Answers probes from fixed token/account lists and refreshes by
/// appending `-renewed` to the access token.
pub(crate) struct FakeAuthority {
    platform: Platform,
    per_account: bool,
    invalid_tokens: HashSet<String>,
    invalid_accounts: HashSet<String>,
    failing_tokens: HashSet<String>,
    probes: AtomicUsize,
    refreshed: Mutex<Vec<Option<String>>>,
}

impl FakeAuthority {
    pub(crate) fn new(platform: Platform) -> Self {
        Self {
            platform,
            per_account: false,
            invalid_tokens: HashSet::new(),
            invalid_accounts: HashSet::new(),
            failing_tokens: HashSet::new(),
            probes: AtomicUsize::new(0),
            refreshed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn per_account(mut self) -> Self {
        self.per_account = true;
        self
    }

    pub(crate) fn invalid(mut self, token: &str) -> Self {
        self.invalid_tokens.insert(token.to_owned());
        self
    }

    pub(crate) fn invalid_account(mut self, account: &str) -> Self {
        self.invalid_accounts.insert(account.to_owned());
        self
    }

    /// Probes and refreshes of `token` fail outright.
    pub(crate) fn failing(mut self, token: &str) -> Self {
        self.failing_tokens.insert(token.to_owned());
        self
    }

    pub(crate) fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn refreshed_accounts(&self) -> Vec<Option<String>> {
        self.refreshed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenAuthority for FakeAuthority {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn refresh(&self, subject: &TokenSubject) -> Result<TokenGrant, PlatformError> {
        if self.failing_tokens.contains(&subject.access_token) {
            return Err(PlatformError::Api {
                context: "fake refresh".to_owned(),
                code: "invalid_grant".to_owned(),
                message: "refresh token revoked".to_owned(),
            });
        }
        self.refreshed.lock().unwrap().push(subject.account_id.clone());
        Ok(TokenGrant {
            access_token: format!("{}-renewed", subject.access_token),
            refresh_token: None,
            expires_in: Some(3600),
        })
    }

    async fn probe(&self, subject: &TokenSubject) -> Result<TokenStatus, PlatformError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.failing_tokens.contains(&subject.access_token) {
            return Err(PlatformError::ServerError {
                status: 503,
                context: "fake probe".to_owned(),
            });
        }
        let bad_account = subject
            .account_id
            .as_ref()
            .is_some_and(|a| self.invalid_accounts.contains(a));
        if bad_account || self.invalid_tokens.contains(&subject.access_token) {
            return Ok(TokenStatus::Invalid);
        }
        Ok(TokenStatus::Valid)
    }

    fn per_account(&self) -> bool {
        self.per_account
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

/// A fetcher that never waits between retries.
pub(crate) fn test_fetcher() -> HttpFetcher {
    let config = HttpConfig {
        timeout_secs: 5,
        user_agent: "adsync-test/0.1".to_owned(),
        max_retries: 1,
        backoff_base_secs: 1,
        default_retry_after_secs: 1,
    };
    HttpFetcher::new(&config)
        .expect("failed to build test fetcher")
        .with_sleeper(Arc::new(NoSleep))
}
