//! Expiry Notifier: finds credentials that expired or no longer pass their
//! platform's probe and emails each affected user one list of renewal
//! links.

use std::collections::{BTreeMap, HashMap};

use adsync_core::{BindingLinks, Platform, SmtpConfig};
use adsync_db::{CredentialStore, CredentialWithUser};
use adsync_platforms::{TokenAuthority, TokenSubject};
use askama::Template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::runner::{BatchRunner, WorkItem};
use crate::tasks::tokens::probe_credential;

pub const SUBJECT: &str = "Token Expiration Notification";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("invalid mailbox \"{address}\": {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("failed to render notice: {0}")]
    Render(#[from] askama::Error),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// One (user, platform) pair whose credential needs renewing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub platform: Platform,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalEntry {
    pub platform: Platform,
    pub link: String,
}

/// Everything one user is told in a single email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub entries: Vec<RenewalEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub violations: usize,
    pub users: usize,
    pub batches: usize,
    pub failed_batches: usize,
}

impl WorkItem for CredentialWithUser {
    fn key(&self) -> String {
        format!("credential {} of user {}", self.credential.id, self.credential.user_id)
    }
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

/// Delivers one batch of notices.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// # Errors
    ///
    /// Returns [`NotifyError`] when any message of the batch cannot be built
    /// or sent.
    async fn send_batch(&self, notices: &[UserNotice]) -> Result<(), NotifyError>;
}

/// STARTTLS SMTP mailer; a new transport is built for every batch.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: SmtpConfig,
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_owned(),
        source,
    })
}

impl SmtpMailer {
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)?
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ))
            .build();
        Ok(transport)
    }

    fn message(&self, notice: &UserNotice) -> Result<Message, NotifyError> {
        let message = Message::builder()
            .from(mailbox(&self.config.from)?)
            .to(mailbox(&notice.email)?)
            .subject(SUBJECT)
            .header(ContentType::TEXT_HTML)
            .body(render_notice(notice)?)?;
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_batch(&self, notices: &[UserNotice]) -> Result<(), NotifyError> {
        let transport = self.transport()?;
        for notice in notices {
            transport.send(self.message(notice)?).await?;
            tracing::debug!(user_id = notice.user_id, "expiry notice sent");
        }
        Ok(())
    }
}

#[derive(Template)]
#[template(path = "expiry_notice.html", escape = "html")]
struct NoticeTemplate<'a> {
    name: &'a str,
    entries: &'a [RenewalEntry],
}

/// HTML body listing each platform with its renewal link.
///
/// # Errors
///
/// Returns [`NotifyError::Render`] if the template fails to render.
pub fn render_notice(notice: &UserNotice) -> Result<String, NotifyError> {
    let template = NoticeTemplate {
        name: &notice.name,
        entries: &notice.entries,
    };
    Ok(template.render()?)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

async fn classify(
    credentials: &dyn CredentialStore,
    authorities: &HashMap<Platform, &dyn TokenAuthority>,
    platforms: &HashMap<i64, Platform>,
    now: DateTime<Utc>,
    record: &CredentialWithUser,
) -> anyhow::Result<Vec<Violation>> {
    let row = &record.credential;
    let Some(&platform) = platforms.get(&row.platform_id) else {
        tracing::warn!(credential = row.id, platform_id = row.platform_id, "unknown platform, skipping");
        return Ok(Vec::new());
    };

    let valid = if row.is_expired_at(now) {
        false
    } else {
        match (authorities.get(&platform), row.access_token.as_deref()) {
            (_, None | Some("")) => false,
            (None, Some(_)) => row.flag,
            (Some(authority), Some(token)) => {
                let subject = TokenSubject::new(token);
                match probe_credential(credentials, *authority, row.platform_id, row.user_id, &subject).await {
                    Ok(Some(status)) => status.is_valid(),
                    Ok(None) => row.flag,
                    Err(e) => {
                        tracing::warn!(
                            credential = row.id,
                            error = %format!("{e:#}"),
                            "probe failed, using stored flag"
                        );
                        row.flag
                    }
                }
            }
        }
    };

    if valid {
        return Ok(Vec::new());
    }
    Ok(vec![Violation {
        user_id: row.user_id,
        user_name: record.user_name.clone(),
        user_email: record.user_email.clone(),
        platform,
    }])
}

/// Every (user, platform) whose credential expired or failed its probe.
///
/// A probe that errors falls back to the stored validity flag, as does a
/// platform with no authority configured.
///
/// # Errors
///
/// Fails when the credentials or the platform catalogue cannot be read.
pub async fn find_violations(
    credentials: &dyn CredentialStore,
    authorities: &[&dyn TokenAuthority],
    runner: &BatchRunner,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Violation>> {
    let records = credentials.list_credentials_with_users().await?;

    let mut platforms = HashMap::new();
    for platform in Platform::ALL {
        if let Some(row) = credentials.platform_by_name(platform.store_name()).await? {
            platforms.insert(row.id, platform);
        }
    }
    let authorities: HashMap<Platform, &dyn TokenAuthority> =
        authorities.iter().map(|a| (a.platform(), *a)).collect();

    let platforms = &platforms;
    let authorities = &authorities;
    let (violations, summary) = runner
        .collect(&records, |record| {
            classify(credentials, authorities, platforms, now, record)
        })
        .await;
    tracing::info!(
        credentials = summary.items,
        violations = violations.len(),
        "credentials classified"
    );
    Ok(violations)
}

/// One notice per user, entries in the order the violations were found.
#[must_use]
pub fn group_by_user(violations: Vec<Violation>, links: &BindingLinks) -> Vec<UserNotice> {
    let mut notices: BTreeMap<i64, UserNotice> = BTreeMap::new();
    for violation in violations {
        let notice = notices
            .entry(violation.user_id)
            .or_insert_with(|| UserNotice {
                user_id: violation.user_id,
                name: violation.user_name.clone(),
                email: violation.user_email.clone(),
                entries: Vec::new(),
            });
        if notice.entries.iter().any(|e| e.platform == violation.platform) {
            continue;
        }
        notice.entries.push(RenewalEntry {
            platform: violation.platform,
            link: links.for_platform(violation.platform).to_owned(),
        });
    }
    notices.into_values().collect()
}

/// Find violations, group them per user and mail them `batch_size` users at
/// a time. A failed batch is logged and the remaining batches still go out.
///
/// # Errors
///
/// Fails only when the violations cannot be determined.
pub async fn notify_expired_tokens(
    credentials: &dyn CredentialStore,
    authorities: &[&dyn TokenAuthority],
    runner: &BatchRunner,
    links: &BindingLinks,
    mailer: &dyn Mailer,
    batch_size: usize,
    now: DateTime<Utc>,
) -> anyhow::Result<NotifyReport> {
    let violations = find_violations(credentials, authorities, runner, now).await?;
    let mut report = NotifyReport {
        violations: violations.len(),
        ..NotifyReport::default()
    };
    let notices = group_by_user(violations, links);
    report.users = notices.len();

    for (index, batch) in notices.chunks(batch_size.max(1)).enumerate() {
        report.batches += 1;
        match mailer.send_batch(batch).await {
            Ok(()) => tracing::info!(batch = index, users = batch.len(), "expiry notices sent"),
            Err(e) => {
                report.failed_batches += 1;
                tracing::error!(batch = index, users = batch.len(), error = %e, "expiry notice batch failed");
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Duration;
    use tracing_test::traced_test;

    use super::*;
    use crate::testing::{credential, FakeAuthority, FakeCredentialStore};

    #[derive(Default)]
    struct RecordingMailer {
        batches: Mutex<Vec<Vec<UserNotice>>>,
        fail_first: bool,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_batch(&self, notices: &[UserNotice]) -> Result<(), NotifyError> {
            let mut batches = self.batches.lock().unwrap();
            batches.push(notices.to_vec());
            if self.fail_first && batches.len() == 1 {
                return Err(NotifyError::Address {
                    address: "broken".to_owned(),
                    source: "broken".parse::<Mailbox>().unwrap_err(),
                });
            }
            Ok(())
        }
    }

    fn links() -> BindingLinks {
        BindingLinks {
            meta: "https://bind.example/meta".to_owned(),
            google_ads: "https://bind.example/gads".to_owned(),
            google_analytics: "https://bind.example/ga".to_owned(),
            tiktok: "https://bind.example/tiktok".to_owned(),
            shopee: "https://bind.example/shopee".to_owned(),
        }
    }

    fn runner() -> BatchRunner {
        BatchRunner::new(10, 5)
    }

    // ---------------------------------------------------------------------------
    // find_violations
    // ---------------------------------------------------------------------------

    #[tokio::test]
    async fn expired_credential_is_reported_without_probing() {
        let mut expired = credential(1, 1, Platform::Meta, "old");
        expired.token_expires_at = Some(Utc::now() - Duration::hours(1));
        let credentials = FakeCredentialStore::new().with_credential(expired);
        let meta = FakeAuthority::new(Platform::Meta);

        let violations = find_violations(&credentials, &[&meta], &runner(), Utc::now())
            .await
            .unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].platform, Platform::Meta);
        assert_eq!(violations[0].user_email, "user1@example.com");
        assert_eq!(meta.probe_calls(), 0);
    }

    #[tokio::test]
    async fn probe_decides_for_live_credentials() {
        let credentials = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::Meta, "good"))
            .with_credential(credential(2, 2, Platform::Meta, "bad"));
        let meta = FakeAuthority::new(Platform::Meta).invalid("bad");

        let violations = find_violations(&credentials, &[&meta], &runner(), Utc::now())
            .await
            .unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].user_id, 2);
        assert_eq!(meta.probe_calls(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn probe_error_falls_back_to_the_stored_flag() {
        let mut flagged = credential(2, 2, Platform::TikTok, "flaky-b");
        flagged.flag = false;
        let credentials = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::TikTok, "flaky-a"))
            .with_credential(flagged);
        let tiktok = FakeAuthority::new(Platform::TikTok)
            .failing("flaky-a")
            .failing("flaky-b");

        let violations = find_violations(&credentials, &[&tiktok], &runner(), Utc::now())
            .await
            .unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].user_id, 2);
        assert!(logs_contain("probe failed, using stored flag"));
    }

    #[tokio::test]
    async fn platform_without_authority_uses_the_stored_flag() {
        let mut flagged = credential(1, 1, Platform::GoogleAnalytics, "ga");
        flagged.flag = false;
        let credentials = FakeCredentialStore::new().with_credential(flagged);

        let violations = find_violations(&credentials, &[], &runner(), Utc::now())
            .await
            .unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].platform, Platform::GoogleAnalytics);
    }

    #[tokio::test]
    async fn shop_probes_run_per_bound_shop() {
        let credentials = FakeCredentialStore::new()
            .with_credential(credential(1, 1, Platform::Shopee, "shop-token"))
            .with_accounts(1, &["10", "11"]);
        let shopee = FakeAuthority::new(Platform::Shopee)
            .per_account()
            .invalid_account("11");

        let violations = find_violations(&credentials, &[&shopee], &runner(), Utc::now())
            .await
            .unwrap();

        assert_eq!(shopee.probe_calls(), 2);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].platform, Platform::Shopee);
    }

    // ---------------------------------------------------------------------------
    // Grouping and delivery
    // ---------------------------------------------------------------------------

    fn violation(user_id: i64, platform: Platform) -> Violation {
        Violation {
            user_id,
            user_name: format!("User {user_id}"),
            user_email: format!("user{user_id}@example.com"),
            platform,
        }
    }

    #[test]
    fn violations_group_into_one_notice_per_user() {
        let notices = group_by_user(
            vec![
                violation(1, Platform::Meta),
                violation(2, Platform::Shopee),
                violation(1, Platform::GoogleAds),
                violation(1, Platform::Meta),
            ],
            &links(),
        );

        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].user_id, 1);
        assert_eq!(
            notices[0].entries,
            vec![
                RenewalEntry {
                    platform: Platform::Meta,
                    link: "https://bind.example/meta".to_owned()
                },
                RenewalEntry {
                    platform: Platform::GoogleAds,
                    link: "https://bind.example/gads".to_owned()
                },
            ]
        );
        assert_eq!(notices[1].entries[0].link, "https://bind.example/shopee");
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_batch_does_not_stop_the_next_one() {
        let mut credentials = FakeCredentialStore::new();
        for id in 1..=3 {
            let mut row = credential(id, id, Platform::Meta, "t");
            row.token_expires_at = Some(Utc::now() - Duration::days(1));
            credentials = credentials.with_credential(row);
        }
        let mailer = RecordingMailer {
            fail_first: true,
            ..RecordingMailer::default()
        };

        let report = notify_expired_tokens(
            &credentials,
            &[],
            &runner(),
            &links(),
            &mailer,
            2,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(
            report,
            NotifyReport {
                violations: 3,
                users: 3,
                batches: 2,
                failed_batches: 1
            }
        );
        let batches = mailer.batches.lock().unwrap();
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
        assert!(logs_contain("expiry notice batch failed"));
    }

    #[tokio::test]
    async fn nothing_is_sent_when_every_token_is_healthy() {
        let credentials =
            FakeCredentialStore::new().with_credential(credential(1, 1, Platform::Meta, "ok"));
        let meta = FakeAuthority::new(Platform::Meta);
        let mailer = RecordingMailer::default();

        let report = notify_expired_tokens(
            &credentials,
            &[&meta],
            &runner(),
            &links(),
            &mailer,
            100,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(report, NotifyReport::default());
        assert!(mailer.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn notice_html_escapes_user_text() {
        let notice = UserNotice {
            user_id: 1,
            name: "<Ann & Co>".to_owned(),
            email: "ann@example.com".to_owned(),
            entries: vec![RenewalEntry {
                platform: Platform::GoogleAds,
                link: "https://bind.example/gads?a=1&b=2".to_owned(),
            }],
        };

        let html = render_notice(&notice).unwrap();

        assert!(html.contains("Hi &lt;Ann &amp; Co&gt;,"));
        assert!(html.contains("<strong>googleAds</strong>"));
        assert!(html.contains("href=\"https://bind.example/gads?a=1&amp;b=2\""));
        assert!(!html.contains("<Ann"));
    }

    #[test]
    fn notice_lists_every_platform_in_order() {
        let notice = UserNotice {
            user_id: 1,
            name: "Ann".to_owned(),
            email: "ann@example.com".to_owned(),
            entries: vec![
                RenewalEntry {
                    platform: Platform::Meta,
                    link: "https://bind.example/meta".to_owned(),
                },
                RenewalEntry {
                    platform: Platform::Shopee,
                    link: "https://bind.example/shopee".to_owned(),
                },
            ],
        };

        let html = render_notice(&notice).unwrap();

        assert_eq!(html.matches("<li>").count(), 2);
        let meta = html.find("https://bind.example/meta").unwrap();
        let shopee = html.find("https://bind.example/shopee").unwrap();
        assert!(meta < shopee);
    }

    #[test]
    fn smtp_message_rejects_a_bad_recipient() {
        let mailer = SmtpMailer::new(SmtpConfig {
            host: "smtp.example.com".to_owned(),
            port: 587,
            user: "robot@example.com".to_owned(),
            password: "secret".to_owned(),
            from: "robot@example.com".to_owned(),
        });
        let notice = UserNotice {
            user_id: 1,
            name: "Ann".to_owned(),
            email: "not an address".to_owned(),
            entries: Vec::new(),
        };

        assert!(matches!(
            mailer.message(&notice),
            Err(NotifyError::Address { address, .. }) if address == "not an address"
        ));
        assert!(mailer.message(&UserNotice {
            email: "ann@example.com".to_owned(),
            ..notice
        })
        .is_ok());
    }
}
