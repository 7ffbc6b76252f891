//! Database models for waitlist entries.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::tokens::TokenHash;
use crate::types::{EmailAddress, EntryId};

/// Database entity model
#[derive(Debug, Clone, FromRow)]
pub struct WaitlistEntry {
    pub id: EntryId,
    pub email: String,
    pub username: Option<String>,
    pub role: Option<String>,
    pub source: Option<String>,
    pub country: Option<String>,
    pub age_confirmed: bool,
    pub age_text: String,
    pub consent: bool,
    pub consent_text: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub token_hash: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Where an entry sits in the double opt-in lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Token issued and still honoured
    Pending,
    /// Token issued but past its expiry; dead until a new token replaces it
    Expired,
    Confirmed,
}

impl WaitlistEntry {
    pub fn state_at(&self, now: DateTime<Utc>) -> EntryState {
        if self.confirmed_at.is_some() {
            return EntryState::Confirmed;
        }
        match self.token_expires_at {
            Some(expires_at) if expires_at <= now => EntryState::Expired,
            _ => EntryState::Pending,
        }
    }
}

/// Insert-or-replace request for a pending entry
#[derive(Debug, Clone)]
pub struct NewWaitlistEntry {
    pub email: EmailAddress,
    pub username: Option<String>,
    pub role: Option<String>,
    pub source: Option<String>,
    pub country: Option<String>,
    pub age_text: String,
    pub consent_text: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub token_hash: TokenHash,
    pub token_expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn entry(token_expires_at: Option<DateTime<Utc>>, confirmed_at: Option<DateTime<Utc>>) -> WaitlistEntry {
        WaitlistEntry {
            id: Uuid::new_v4(),
            email: "a@b.com".to_string(),
            username: None,
            role: None,
            source: None,
            country: None,
            age_confirmed: true,
            age_text: "I am at least 16".to_string(),
            consent: true,
            consent_text: "I agree".to_string(),
            ip: None,
            user_agent: None,
            token_hash: confirmed_at.is_none().then(|| "hash".to_string()),
            token_expires_at,
            confirmed_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_at() {
        let now = Utc::now();

        assert_eq!(entry(Some(now + Duration::hours(1)), None).state_at(now), EntryState::Pending);
        assert_eq!(entry(Some(now - Duration::seconds(1)), None).state_at(now), EntryState::Expired);
        assert_eq!(entry(Some(now), None).state_at(now), EntryState::Expired);
        assert_eq!(entry(None, None).state_at(now), EntryState::Pending);
        assert_eq!(entry(None, Some(now)).state_at(now), EntryState::Confirmed);
    }
}
