//! Token Lifecycle Tasks: refresh every credential of a platform, or
//! re-validate every credential and flip its validity flag.
//!
//! Changes are accumulated across the whole run and written back in one
//! transaction at the end. A credential whose refresh or probe failed is
//! left out of the write-back so its stored state is untouched.

use adsync_core::Platform;
use adsync_db::{CredentialRow, CredentialStore, CredentialUpdate};
use adsync_platforms::{TokenAuthority, TokenStatus, TokenSubject};
use anyhow::Context;
use chrono::{DateTime, Utc};

use super::platform_id;
use crate::runner::{BatchRunner, RunSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenReport {
    pub summary: RunSummary,
    /// Rows changed by the final write-back.
    pub updated: u64,
}

fn subject_for(row: &CredentialRow) -> Option<TokenSubject> {
    row.access_token
        .as_deref()
        .filter(|token| !token.is_empty())
        .map(|token| TokenSubject::new(token).with_refresh_token(row.refresh_token.clone()))
}

/// Probe one credential. Platforms whose probes are scoped to an account
/// are probed once per bound account; `None` means nothing was bound.
pub(crate) async fn probe_credential(
    credentials: &dyn CredentialStore,
    authority: &dyn TokenAuthority,
    platform_id: i64,
    user_id: i64,
    subject: &TokenSubject,
) -> anyhow::Result<Option<TokenStatus>> {
    if !authority.per_account() {
        return Ok(Some(authority.probe(subject).await?));
    }

    let accounts = credentials.list_account_ids(platform_id, user_id).await?;
    let mut statuses = Vec::with_capacity(accounts.len());
    for account in accounts {
        let scoped = subject.clone().for_account(account.as_str());
        let status = authority
            .probe(&scoped)
            .await
            .with_context(|| format!("probing account {account}"))?;
        statuses.push(status);
    }
    Ok(TokenStatus::combine(statuses))
}

async fn refresh_one(
    credentials: &dyn CredentialStore,
    authority: &dyn TokenAuthority,
    platform_id: i64,
    row: &CredentialRow,
) -> anyhow::Result<Vec<CredentialUpdate>> {
    let Some(mut subject) = subject_for(row) else {
        tracing::warn!(credential = row.id, "credential has no access token, skipping refresh");
        return Ok(Vec::new());
    };

    if authority.per_account() {
        let accounts = credentials.list_account_ids(platform_id, row.user_id).await?;
        let Some(account) = accounts.into_iter().next() else {
            tracing::warn!(credential = row.id, "no account bound to credential, skipping refresh");
            return Ok(Vec::new());
        };
        subject = subject.for_account(account);
    }

    let grant = authority
        .refresh(&subject)
        .await
        .with_context(|| format!("refreshing {} credential {}", authority.platform(), row.id))?;

    Ok(vec![CredentialUpdate::refreshed(
        row.id,
        grant.access_token.clone(),
        grant.refresh_token.clone(),
        grant.expires_at(Utc::now()),
    )])
}

async fn check_one(
    credentials: &dyn CredentialStore,
    authority: &dyn TokenAuthority,
    platform_id: i64,
    row: &CredentialRow,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<CredentialUpdate>> {
    // Expiry alone decides; no probe is spent on a token known to be dead.
    if row.is_expired_at(now) {
        return Ok(vec![CredentialUpdate::flag(row.id, false)]);
    }
    let Some(subject) = subject_for(row) else {
        return Ok(vec![CredentialUpdate::flag(row.id, false)]);
    };

    let status = probe_credential(credentials, authority, platform_id, row.user_id, &subject)
        .await
        .with_context(|| format!("checking {} credential {}", authority.platform(), row.id))?;

    match status {
        Some(status) => Ok(vec![CredentialUpdate::flag(row.id, status.is_valid())]),
        None => {
            tracing::debug!(credential = row.id, "no account bound to credential, flag unchanged");
            Ok(Vec::new())
        }
    }
}

async fn write_back(
    credentials: &dyn CredentialStore,
    platform: Platform,
    updates: &[CredentialUpdate],
) -> anyhow::Result<u64> {
    if updates.is_empty() {
        tracing::info!(%platform, "no credential changes to write");
        return Ok(0);
    }
    let updated = credentials
        .apply_credential_updates(updates)
        .await
        .with_context(|| format!("writing back {} {platform} credentials", updates.len()))?;
    tracing::info!(%platform, updated, "credential changes written");
    Ok(updated)
}

/// Renew every credential of `authority`'s platform.
///
/// # Errors
///
/// Fails when the platform is unknown or the store cannot be read or
/// written; per-credential refresh failures are only logged.
pub async fn refresh_tokens(
    credentials: &dyn CredentialStore,
    authority: &dyn TokenAuthority,
    runner: &BatchRunner,
) -> anyhow::Result<TokenReport> {
    let platform = authority.platform();
    let platform_id = platform_id(credentials, platform).await?;
    let rows = credentials.list_credentials(platform_id).await?;
    tracing::info!(%platform, credentials = rows.len(), "refreshing tokens");

    let (updates, summary) = runner
        .collect(&rows, |row| refresh_one(credentials, authority, platform_id, row))
        .await;
    let updated = write_back(credentials, platform, &updates).await?;
    Ok(TokenReport { summary, updated })
}

/// Re-validate every credential of `authority`'s platform as of `now`.
///
/// # Errors
///
/// Fails when the platform is unknown or the store cannot be read or
/// written; per-credential probe failures are only logged.
pub async fn check_tokens(
    credentials: &dyn CredentialStore,
    authority: &dyn TokenAuthority,
    runner: &BatchRunner,
    now: DateTime<Utc>,
) -> anyhow::Result<TokenReport> {
    let platform = authority.platform();
    let platform_id = platform_id(credentials, platform).await?;
    let rows = credentials.list_credentials(platform_id).await?;
    tracing::info!(%platform, credentials = rows.len(), "checking token validity");

    let (updates, summary) = runner
        .collect(&rows, |row| check_one(credentials, authority, platform_id, row, now))
        .await;
    let updated = write_back(credentials, platform, &updates).await?;
    Ok(TokenReport { summary, updated })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tracing_test::traced_test;

    use super::*;
    use crate::testing::{credential, FakeAuthority, FakeCredentialStore};

    fn runner() -> BatchRunner {
        BatchRunner::new(10, 5)
    }

    // -----------------------------------------------------------------------
    // check_tokens
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn expired_token_is_flagged_without_a_probe() {
        let now = Utc::now();
        let mut row = credential(7, 1, Platform::TikTok, "tok-7");
        row.token_expires_at = Some(now - Duration::days(1));
        let store = FakeCredentialStore::new().with_credential(row);
        let authority = FakeAuthority::new(Platform::TikTok);

        let report = check_tokens(&store, &authority, &runner(), now).await.unwrap();

        assert_eq!(authority.probe_calls(), 0);
        assert_eq!(store.applied_updates(), vec![CredentialUpdate::flag(7, false)]);
        assert_eq!(report.updated, 1);
    }

    #[tokio::test]
    async fn probe_result_sets_the_flag() {
        let store = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::Meta, "good"))
            .with_credential(credential(2, 2, Platform::Meta, "bad"));
        let authority = FakeAuthority::new(Platform::Meta).invalid("bad");

        check_tokens(&store, &authority, &runner(), Utc::now()).await.unwrap();

        let mut updates = store.applied_updates();
        updates.sort_by_key(|u| u.id);
        assert_eq!(
            updates,
            vec![CredentialUpdate::flag(1, true), CredentialUpdate::flag(2, false)]
        );
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn probe_failure_leaves_the_credential_out_of_the_write_back() {
        let store = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::GoogleAds, "good"))
            .with_credential(credential(2, 2, Platform::GoogleAds, "unreachable"));
        let authority = FakeAuthority::new(Platform::GoogleAds).failing("unreachable");

        let report = check_tokens(&store, &authority, &runner(), Utc::now()).await.unwrap();

        assert_eq!(store.applied_updates(), vec![CredentialUpdate::flag(1, true)]);
        assert_eq!(report.summary.failed_items, 1);
        assert!(logs_contain("credential 2"));
    }

    #[tokio::test]
    async fn per_account_probes_cover_every_bound_shop() {
        let store = FakeCredentialStore::new()
            .with_credential(credential(5, 9, Platform::Shopee, "shop-token"))
            .with_accounts(9, &["1001", "1002"]);
        let authority = FakeAuthority::new(Platform::Shopee)
            .per_account()
            .invalid_account("1002");

        check_tokens(&store, &authority, &runner(), Utc::now()).await.unwrap();

        assert_eq!(authority.probe_calls(), 2);
        assert_eq!(store.applied_updates(), vec![CredentialUpdate::flag(5, false)]);
    }

    #[tokio::test]
    async fn credential_without_bound_shops_is_left_alone() {
        let store = FakeCredentialStore::new()
            .with_credential(credential(5, 9, Platform::Shopee, "shop-token"));
        let authority = FakeAuthority::new(Platform::Shopee).per_account();

        let report = check_tokens(&store, &authority, &runner(), Utc::now()).await.unwrap();

        assert_eq!(authority.probe_calls(), 0);
        assert!(store.applied_updates().is_empty());
        assert_eq!(store.write_calls(), 0);
        assert_eq!(report.updated, 0);
    }

    #[tokio::test]
    async fn unknown_platform_is_an_error() {
        let store = FakeCredentialStore::empty();
        let authority = FakeAuthority::new(Platform::TikTok);
        assert!(check_tokens(&store, &authority, &runner(), Utc::now())
            .await
            .is_err());
    }

    // -----------------------------------------------------------------------
    // refresh_tokens
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn refreshed_tokens_are_written_in_one_batch() {
        let store = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::TikTok, "a"))
            .with_credential(credential(2, 2, Platform::TikTok, "b"));
        let authority = FakeAuthority::new(Platform::TikTok);

        let report = refresh_tokens(&store, &authority, &runner()).await.unwrap();

        let mut updates = store.applied_updates();
        updates.sort_by_key(|u| u.id);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].access_token.as_deref(), Some("a-renewed"));
        assert_eq!(updates[0].flag, Some(true));
        assert!(updates[0].token_expires_at.is_some());
        assert_eq!(store.write_calls(), 1);
        assert_eq!(report.updated, 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_refresh_keeps_the_existing_record() {
        let store = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::Meta, "a"))
            .with_credential(credential(2, 2, Platform::Meta, "revoked"));
        let authority = FakeAuthority::new(Platform::Meta).failing("revoked");

        refresh_tokens(&store, &authority, &runner()).await.unwrap();

        let updates = store.applied_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id, 1);
        assert!(logs_contain("refreshing meta credential 2"));
    }

    #[tokio::test]
    async fn shopee_refresh_is_scoped_to_the_first_bound_shop() {
        let store = FakeCredentialStore::new()
            .with_credential(credential(3, 4, Platform::Shopee, "s"))
            .with_accounts(4, &["777"]);
        let authority = FakeAuthority::new(Platform::Shopee).per_account();

        refresh_tokens(&store, &authority, &runner()).await.unwrap();

        assert_eq!(authority.refreshed_accounts(), vec![Some("777".to_owned())]);
        assert_eq!(store.applied_updates().len(), 1);
    }
}
