//! Common type definitions.
//!
//! - [`EntryId`]: waitlist entry identifier
//! - [`EmailAddress`]: canonical (trimmed, lowercased, shape-checked) email address
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging
//! - [`mask_email`]: Redact the local part of an address for logging

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

pub type EntryId = Uuid;

/// Longest address accepted (RFC 5321 path limit).
pub const MAX_EMAIL_LEN: usize = 254;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Redact an email address for logs: "alice@example.com" -> "a***@example.com"
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

/// A canonical email address: surrounding whitespace stripped, lowercased, and shaped like
/// `local@domain.tld` with no whitespace anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Normalize and validate a raw address. Returns `None` if it isn't email-shaped.
    pub fn parse(raw: &str) -> Option<Self> {
        let email = raw.trim().to_lowercase();
        if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
            return None;
        }

        let (local, domain) = email.split_once('@')?;
        if local.is_empty() || domain.contains('@') {
            return None;
        }

        // Domain needs at least one dot with non-empty labels on both sides of the last one
        let (host, tld) = domain.rsplit_once('.')?;
        if host.is_empty() || tld.is_empty() || host.starts_with('.') || host.ends_with('.') {
            return None;
        }

        Some(Self(email))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn masked(&self) -> String {
        mask_email(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
