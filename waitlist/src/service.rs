//! Double opt-in workflow: signup, confirm and resend.
//!
//! Each operation acquires one pool connection for its storage work and releases it before
//! any email goes out, so a slow mail transport never holds a connection. State transitions
//! are single statements in [`WaitlistEntries`]; nothing here reads a row and then writes it.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

use crate::{
    config::Config,
    db::{
        handlers::WaitlistEntries,
        models::waitlist::{EntryState, NewWaitlistEntry},
    },
    email::{self, Mailer},
    errors::{Error, Result},
    tokens::ConfirmationToken,
    types::{EmailAddress, abbrev_uuid},
};

/// A signup that passed validation, with defaults applied and empty fields dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupForm {
    pub email: EmailAddress,
    pub username: Option<String>,
    pub role: String,
    pub source: String,
    pub country: Option<String>,
    pub age_text: String,
    pub consent_text: String,
}

/// Where the request came from. Recorded with the entry, never used for decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignupOutcome {
    pub stored: bool,
    pub email_sent: bool,
}

/// Result of following a confirmation link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStatus {
    Ok,
    Expired,
    Invalid,
    ServerError,
}

impl ConfirmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmStatus::Ok => "ok",
            ConfirmStatus::Expired => "expired",
            ConfirmStatus::Invalid => "invalid",
            ConfirmStatus::ServerError => "server_error",
        }
    }

    /// Parse a status query value; anything unrecognized reads as `Invalid`
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("ok") => ConfirmStatus::Ok,
            Some("expired") => ConfirmStatus::Expired,
            Some("server_error") => ConfirmStatus::ServerError,
            _ => ConfirmStatus::Invalid,
        }
    }
}

impl fmt::Display for ConfirmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resend never reports what happened; this is all a caller gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendAccepted;

/// When a token issued at `now` stops being honoured
fn token_expiry(ttl: Duration, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| Error::Internal {
            operation: format!("compute token expiry for a ttl of {ttl:?}"),
        })
}

pub struct WaitlistService<'a> {
    db: &'a PgPool,
    config: &'a Config,
    mailer: &'a Arc<dyn Mailer>,
}

impl<'a> WaitlistService<'a> {
    pub fn new(db: &'a PgPool, config: &'a Config, mailer: &'a Arc<dyn Mailer>) -> Self {
        Self { db, config, mailer }
    }

    /// Store (or replace) a pending entry and send the confirmation email.
    ///
    /// An address that is already confirmed is left untouched: the outcome reports it as
    /// stored, and no token is issued and no email is sent.
    #[instrument(skip_all, fields(email = %form.email.masked()), err)]
    pub async fn signup(&self, form: SignupForm, metadata: RequestMetadata) -> Result<SignupOutcome> {
        let token = ConfirmationToken::generate();
        let token_expires_at = token_expiry(self.config.waitlist.token_ttl, Utc::now())?;

        let request = NewWaitlistEntry {
            email: form.email.clone(),
            username: form.username,
            role: Some(form.role),
            source: Some(form.source),
            country: form.country,
            age_text: form.age_text,
            consent_text: form.consent_text,
            ip: metadata.ip,
            user_agent: metadata.user_agent,
            token_hash: token.hash(),
            token_expires_at,
        };

        let stored = {
            let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            WaitlistEntries::new(&mut conn).upsert_pending(&request).await?
        };

        let Some(entry) = stored else {
            info!("Signup for an already confirmed address, leaving it untouched");
            return Ok(SignupOutcome {
                stored: true,
                email_sent: false,
            });
        };

        info!(entry_id = %abbrev_uuid(&entry.id), "Waitlist entry pending confirmation");

        let email_sent = self.send_confirmation(&form.email, &token).await;
        Ok(SignupOutcome { stored: true, email_sent })
    }

    /// Follow a confirmation link. Never fails: storage errors become `ServerError`.
    #[instrument(skip_all, fields(status))]
    pub async fn confirm(&self, raw_token: Option<&str>) -> ConfirmStatus {
        let status = match raw_token.and_then(ConfirmationToken::parse) {
            None => ConfirmStatus::Invalid,
            Some(token) => match self.try_confirm(&token).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::error!(error = %e, "Confirmation failed");
                    ConfirmStatus::ServerError
                }
            },
        };

        tracing::Span::current().record("status", status.as_str());
        status
    }

    async fn try_confirm(&self, token: &ConfirmationToken) -> Result<ConfirmStatus> {
        let token_hash = token.hash();
        let now = Utc::now();

        let (confirmed, holder) = {
            let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let mut repo = WaitlistEntries::new(&mut conn);

            let confirmed = repo.confirm_by_token_hash(&token_hash, now).await?;
            let holder = match confirmed {
                Some(_) => None,
                // Lost the update: the hash either belongs to a dead token or to nothing
                None => repo.get_by_token_hash(&token_hash).await?,
            };
            (confirmed, holder)
        };

        let Some(entry) = confirmed else {
            return Ok(match holder.map(|entry| entry.state_at(now)) {
                Some(EntryState::Expired) => ConfirmStatus::Expired,
                _ => ConfirmStatus::Invalid,
            });
        };

        info!(entry_id = %abbrev_uuid(&entry.id), "Waitlist entry confirmed");

        match EmailAddress::parse(&entry.email) {
            Some(address) => {
                let welcome = email::welcome_email(&self.config.waitlist.product_name, &address, self.config.public_base());
                if let Err(e) = self.mailer.send(&welcome).await {
                    warn!(error = %e, email = %address.masked(), "Failed to send welcome email");
                }
            }
            None => warn!(entry_id = %abbrev_uuid(&entry.id), "Confirmed entry has an unusable address, skipping welcome email"),
        }

        Ok(ConfirmStatus::Ok)
    }

    /// Issue a fresh token to a pending address and email it. Unknown, confirmed and
    /// malformed addresses are ignored, and failures are only logged.
    #[instrument(skip_all)]
    pub async fn resend(&self, raw_email: Option<&str>) -> ResendAccepted {
        let Some(address) = raw_email.and_then(EmailAddress::parse) else {
            tracing::debug!("Resend with a malformed address, ignoring");
            return ResendAccepted;
        };

        if let Err(e) = self.try_resend(&address).await {
            warn!(error = %e, email = %address.masked(), "Resend failed");
        }

        ResendAccepted
    }

    async fn try_resend(&self, address: &EmailAddress) -> Result<()> {
        let token = ConfirmationToken::generate();
        let expires_at = token_expiry(self.config.waitlist.token_ttl, Utc::now())?;

        let reissued = {
            let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            WaitlistEntries::new(&mut conn)
                .reissue_token(address, &token.hash(), expires_at)
                .await?
        };

        match reissued {
            Some(entry) => {
                info!(entry_id = %abbrev_uuid(&entry.id), "Confirmation token reissued");
                self.send_confirmation(address, &token).await;
            }
            None => tracing::debug!(email = %address.masked(), "No pending entry for resend"),
        }

        Ok(())
    }

    /// Returns whether the transport accepted the message
    async fn send_confirmation(&self, to: &EmailAddress, token: &ConfirmationToken) -> bool {
        let link = self.config.confirmation_link(token.expose());
        let message = email::confirmation_email(&self.config.waitlist, to, &link);

        match self.mailer.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, email = %to.masked(), "Failed to send confirmation email");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{RecordingMailer, create_test_config, token_from_link};
    use chrono::Duration;
    use sqlx::PgPool;

    fn form(email: &str) -> SignupForm {
        SignupForm {
            email: EmailAddress::parse(email).unwrap(),
            username: Some("alice".to_string()),
            role: "Viewer".to_string(),
            source: "landing".to_string(),
            country: Some("NZ".to_string()),
            age_text: "I confirm I am at least 16 years old.".to_string(),
            consent_text: "I agree to receive early-access updates.".to_string(),
        }
    }

    async fn entry(pool: &PgPool, email: &str) -> crate::db::models::waitlist::WaitlistEntry {
        let mut conn = pool.acquire().await.unwrap();
        WaitlistEntries::new(&mut conn)
            .get_by_email(&EmailAddress::parse(email).unwrap())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_status_from_query() {
        assert_eq!(ConfirmStatus::from_query(Some("ok")), ConfirmStatus::Ok);
        assert_eq!(ConfirmStatus::from_query(Some("expired")), ConfirmStatus::Expired);
        assert_eq!(ConfirmStatus::from_query(Some("server_error")), ConfirmStatus::ServerError);
        assert_eq!(ConfirmStatus::from_query(Some("bogus")), ConfirmStatus::Invalid);
        assert_eq!(ConfirmStatus::from_query(None), ConfirmStatus::Invalid);
    }

    #[test]
    fn test_token_expiry_out_of_range_is_an_error() {
        let now = Utc::now();
        assert_eq!(
            token_expiry(std::time::Duration::from_secs(60 * 60), now).unwrap(),
            now + Duration::hours(1)
        );

        // Past the last representable timestamp
        let million_years = std::time::Duration::from_secs(1_000_000 * 365 * 24 * 60 * 60);
        assert!(matches!(token_expiry(million_years, now), Err(Error::Internal { .. })));
        // Not representable as a signed duration at all
        assert!(matches!(token_expiry(std::time::Duration::MAX, now), Err(Error::Internal { .. })));
    }

    #[sqlx::test]
    async fn test_out_of_range_ttl_fails_signup_without_storing(pool: PgPool) {
        let mut config = create_test_config();
        config.waitlist.token_ttl = std::time::Duration::from_secs(1_000_000 * 365 * 24 * 60 * 60);
        let recorder = Arc::new(RecordingMailer::default());
        let mailer: Arc<dyn Mailer> = recorder.clone();
        let service = WaitlistService::new(&pool, &config, &mailer);

        let result = service.signup(form("a@b.com"), RequestMetadata::default()).await;
        assert!(matches!(result, Err(Error::Internal { .. })));
        assert_eq!(service.resend(Some("a@b.com")).await, ResendAccepted);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM waitlist").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
        assert!(recorder.sent().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_signup_then_confirm(pool: PgPool) {
        let config = create_test_config();
        let recorder = Arc::new(RecordingMailer::default());
        let mailer: Arc<dyn Mailer> = recorder.clone();
        let service = WaitlistService::new(&pool, &config, &mailer);

        let outcome = service
            .signup(
                form("a@b.com"),
                RequestMetadata {
                    ip: Some("198.51.100.4".to_string()),
                    user_agent: Some("curl/8".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, SignupOutcome { stored: true, email_sent: true });

        let pending = entry(&pool, "a@b.com").await;
        assert!(pending.token_hash.is_some());
        assert!(pending.confirmed_at.is_none());
        assert_eq!(pending.ip.as_deref(), Some("198.51.100.4"));

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        let token = token_from_link(&sent[0]);
        assert_eq!(pending.token_hash.as_deref(), Some(crate::tokens::TokenHash::of(&token).as_str()));

        assert_eq!(service.confirm(Some(&token)).await, ConfirmStatus::Ok);

        let confirmed = entry(&pool, "a@b.com").await;
        assert!(confirmed.confirmed_at.is_some());
        assert!(confirmed.token_hash.is_none());
        assert_eq!(recorder.sent().len(), 2);

        // Replays change nothing and send nothing
        assert_eq!(service.confirm(Some(&token)).await, ConfirmStatus::Invalid);
        assert_eq!(entry(&pool, "a@b.com").await.confirmed_at, confirmed.confirmed_at);
        assert_eq!(recorder.sent().len(), 2);
    }

    #[sqlx::test]
    async fn test_confirm_expired_token(pool: PgPool) {
        let config = create_test_config();
        let recorder = Arc::new(RecordingMailer::default());
        let mailer: Arc<dyn Mailer> = recorder.clone();
        let service = WaitlistService::new(&pool, &config, &mailer);

        service.signup(form("a@b.com"), RequestMetadata::default()).await.unwrap();
        let token = token_from_link(&recorder.sent()[0]);

        sqlx::query("UPDATE waitlist SET token_expires_at = $1")
            .bind(Utc::now() - Duration::minutes(5))
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(service.confirm(Some(&token)).await, ConfirmStatus::Expired);
        assert!(entry(&pool, "a@b.com").await.confirmed_at.is_none());
        assert_eq!(recorder.sent().len(), 1);
    }

    #[sqlx::test]
    async fn test_confirm_rejects_garbage(pool: PgPool) {
        let config = create_test_config();
        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::default());
        let service = WaitlistService::new(&pool, &config, &mailer);

        assert_eq!(service.confirm(None).await, ConfirmStatus::Invalid);
        assert_eq!(service.confirm(Some("")).await, ConfirmStatus::Invalid);
        assert_eq!(service.confirm(Some("short")).await, ConfirmStatus::Invalid);
        let unknown = ConfirmationToken::generate();
        assert_eq!(service.confirm(Some(unknown.expose())).await, ConfirmStatus::Invalid);
    }

    #[sqlx::test]
    async fn test_signup_on_confirmed_address_is_noop(pool: PgPool) {
        let config = create_test_config();
        let recorder = Arc::new(RecordingMailer::default());
        let mailer: Arc<dyn Mailer> = recorder.clone();
        let service = WaitlistService::new(&pool, &config, &mailer);

        service.signup(form("a@b.com"), RequestMetadata::default()).await.unwrap();
        let token = token_from_link(&recorder.sent()[0]);
        assert_eq!(service.confirm(Some(&token)).await, ConfirmStatus::Ok);
        let before = entry(&pool, "a@b.com").await;
        let sent_before = recorder.sent().len();

        let mut again = form("A@B.com");
        again.username = Some("mallory".to_string());
        let outcome = service.signup(again, RequestMetadata::default()).await.unwrap();

        assert_eq!(outcome, SignupOutcome { stored: true, email_sent: false });
        let after = entry(&pool, "a@b.com").await;
        assert_eq!(after.confirmed_at, before.confirmed_at);
        assert_eq!(after.username.as_deref(), Some("alice"));
        assert!(after.token_hash.is_none());
        assert_eq!(recorder.sent().len(), sent_before);
    }

    #[sqlx::test]
    async fn test_email_failure_still_stores(pool: PgPool) {
        let config = create_test_config();
        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::failing());
        let service = WaitlistService::new(&pool, &config, &mailer);

        let outcome = service.signup(form("a@b.com"), RequestMetadata::default()).await.unwrap();

        assert_eq!(outcome, SignupOutcome { stored: true, email_sent: false });
        assert!(entry(&pool, "a@b.com").await.token_hash.is_some());
    }

    #[sqlx::test]
    async fn test_resend_rotates_token(pool: PgPool) {
        let config = create_test_config();
        let recorder = Arc::new(RecordingMailer::default());
        let mailer: Arc<dyn Mailer> = recorder.clone();
        let service = WaitlistService::new(&pool, &config, &mailer);

        service.signup(form("a@b.com"), RequestMetadata::default()).await.unwrap();
        let first = token_from_link(&recorder.sent()[0]);

        assert_eq!(service.resend(Some(" A@B.COM ")).await, ResendAccepted);
        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        let second = token_from_link(&sent[1]);
        assert_ne!(first, second);

        assert_eq!(service.confirm(Some(&first)).await, ConfirmStatus::Invalid);
        assert_eq!(service.confirm(Some(&second)).await, ConfirmStatus::Ok);
    }

    #[sqlx::test]
    async fn test_resend_revives_expired_entry(pool: PgPool) {
        let config = create_test_config();
        let recorder = Arc::new(RecordingMailer::default());
        let mailer: Arc<dyn Mailer> = recorder.clone();
        let service = WaitlistService::new(&pool, &config, &mailer);

        service.signup(form("a@b.com"), RequestMetadata::default()).await.unwrap();
        sqlx::query("UPDATE waitlist SET token_expires_at = $1")
            .bind(Utc::now() - Duration::hours(1))
            .execute(&pool)
            .await
            .unwrap();

        service.resend(Some("a@b.com")).await;
        let fresh = token_from_link(&recorder.sent()[1]);
        assert_eq!(service.confirm(Some(&fresh)).await, ConfirmStatus::Ok);
    }

    #[sqlx::test]
    async fn test_resend_ignores_unknown_and_confirmed(pool: PgPool) {
        let config = create_test_config();
        let recorder = Arc::new(RecordingMailer::default());
        let mailer: Arc<dyn Mailer> = recorder.clone();
        let service = WaitlistService::new(&pool, &config, &mailer);

        service.signup(form("a@b.com"), RequestMetadata::default()).await.unwrap();
        let token = token_from_link(&recorder.sent()[0]);
        service.confirm(Some(&token)).await;
        let sent = recorder.sent().len();

        service.resend(Some("a@b.com")).await;
        service.resend(Some("nobody@b.com")).await;
        service.resend(Some("not-an-email")).await;
        service.resend(None).await;

        assert_eq!(recorder.sent().len(), sent);
        assert!(entry(&pool, "a@b.com").await.token_hash.is_none());
    }
}
