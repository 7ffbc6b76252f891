//! Database repository for waitlist entries.
//!
//! Every state transition is a single statement so that concurrent requests are settled by
//! Postgres row locking rather than by read-then-write in the application.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::{
    db::{
        errors::Result,
        models::waitlist::{NewWaitlistEntry, WaitlistEntry},
    },
    tokens::TokenHash,
    types::{EmailAddress, abbrev_uuid},
};

pub struct WaitlistEntries<'c> {
    db: &'c mut PgConnection,
}

impl<'c> WaitlistEntries<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Insert a pending entry, or replace the existing one for this email if it is still
    /// unconfirmed (expired or not). `created_at` of a replaced entry is preserved.
    ///
    /// Returns `None` when the email belongs to a confirmed entry; that row is not touched.
    #[instrument(skip(self, request), fields(email = %request.email.masked()), err)]
    pub async fn upsert_pending(&mut self, request: &NewWaitlistEntry) -> Result<Option<WaitlistEntry>> {
        let entry = sqlx::query_as!(
            WaitlistEntry,
            r#"
            INSERT INTO waitlist (
                email, username, role, source, country,
                age_confirmed, age_text, consent, consent_text,
                ip, user_agent, token_hash, token_expires_at
            )
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, TRUE, $7, $8, $9, $10, $11)
            ON CONFLICT (email) DO UPDATE SET
                username = EXCLUDED.username,
                role = EXCLUDED.role,
                source = EXCLUDED.source,
                country = EXCLUDED.country,
                age_confirmed = EXCLUDED.age_confirmed,
                age_text = EXCLUDED.age_text,
                consent = EXCLUDED.consent,
                consent_text = EXCLUDED.consent_text,
                ip = EXCLUDED.ip,
                user_agent = EXCLUDED.user_agent,
                token_hash = EXCLUDED.token_hash,
                token_expires_at = EXCLUDED.token_expires_at
            WHERE waitlist.confirmed_at IS NULL
            RETURNING id, email, username, role, source, country, age_confirmed, age_text, consent, consent_text,
                      ip, user_agent, token_hash, token_expires_at, confirmed_at, created_at
            "#,
            request.email.as_str(),
            request.username.as_deref(),
            request.role.as_deref(),
            request.source.as_deref(),
            request.country.as_deref(),
            &request.age_text,
            &request.consent_text,
            request.ip.as_deref(),
            request.user_agent.as_deref(),
            request.token_hash.as_str(),
            request.token_expires_at,
        )
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(entry)
    }

    /// Confirm the entry holding this token hash, if the token is still live.
    ///
    /// This is the compare-and-set for the confirm race: the hash must match, the entry must
    /// be unconfirmed, and the expiry (if any) must be after `now`. Of any number of
    /// concurrent callers with the same hash, at most one gets `Some`.
    #[instrument(skip(self, token_hash), err)]
    pub async fn confirm_by_token_hash(&mut self, token_hash: &TokenHash, now: DateTime<Utc>) -> Result<Option<WaitlistEntry>> {
        let entry = sqlx::query_as!(
            WaitlistEntry,
            r#"
            UPDATE waitlist
            SET confirmed_at = $2,
                token_hash = NULL,
                token_expires_at = NULL
            WHERE token_hash = $1
              AND confirmed_at IS NULL
              AND (token_expires_at IS NULL OR token_expires_at > $2)
            RETURNING id, email, username, role, source, country, age_confirmed, age_text, consent, consent_text,
                      ip, user_agent, token_hash, token_expires_at, confirmed_at, created_at
            "#,
            token_hash.as_str(),
            now,
        )
        .fetch_optional(&mut *self.db)
        .await?;

        if let Some(entry) = &entry {
            tracing::debug!(entry_id = %abbrev_uuid(&entry.id), "Waitlist entry confirmed");
        }

        Ok(entry)
    }

    /// Replace the token on an unconfirmed entry. Returns `None` if the email is unknown or
    /// already confirmed.
    #[instrument(skip(self, email, token_hash), fields(email = %email.masked()), err)]
    pub async fn reissue_token(
        &mut self,
        email: &EmailAddress,
        token_hash: &TokenHash,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<WaitlistEntry>> {
        let entry = sqlx::query_as!(
            WaitlistEntry,
            r#"
            UPDATE waitlist
            SET token_hash = $2,
                token_expires_at = $3
            WHERE email = $1 AND confirmed_at IS NULL
            RETURNING id, email, username, role, source, country, age_confirmed, age_text, consent, consent_text,
                      ip, user_agent, token_hash, token_expires_at, confirmed_at, created_at
            "#,
            email.as_str(),
            token_hash.as_str(),
            expires_at,
        )
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(entry)
    }

    #[instrument(skip(self, email), fields(email = %email.masked()), err)]
    pub async fn get_by_email(&mut self, email: &EmailAddress) -> Result<Option<WaitlistEntry>> {
        let entry = sqlx::query_as!(
            WaitlistEntry,
            r#"
            SELECT id, email, username, role, source, country, age_confirmed, age_text, consent, consent_text,
                   ip, user_agent, token_hash, token_expires_at, confirmed_at, created_at
            FROM waitlist
            WHERE email = $1
            "#,
            email.as_str(),
        )
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(entry)
    }

    #[instrument(skip(self, token_hash), err)]
    pub async fn get_by_token_hash(&mut self, token_hash: &TokenHash) -> Result<Option<WaitlistEntry>> {
        let entry = sqlx::query_as!(
            WaitlistEntry,
            r#"
            SELECT id, email, username, role, source, country, age_confirmed, age_text, consent, consent_text,
                   ip, user_agent, token_hash, token_expires_at, confirmed_at, created_at
            FROM waitlist
            WHERE token_hash = $1
            "#,
            token_hash.as_str(),
        )
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(entry)
    }
}
