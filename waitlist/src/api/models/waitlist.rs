use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    config::WaitlistConfig,
    errors::Error,
    service::{ConfirmStatus, SignupForm},
    types::EmailAddress,
};

/// Longest accepted username
pub const MAX_USERNAME_LEN: usize = 30;
/// Longest accepted value for the other free-form profile fields
pub const MAX_FIELD_LEN: usize = 200;
/// Longest accepted disclosure text for an attestation
pub const MAX_ATTESTATION_LEN: usize = 2000;

/// Signup form submission.
///
/// Both attestations must be accepted, and each carries the exact disclosure text the user
/// was shown so it can be stored alongside the signup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct SignupRequest {
    #[schema(example = "alice@example.com")]
    pub email: String,
    pub username: Option<String>,
    /// Defaults to `Viewer`
    pub role: Option<String>,
    pub country: Option<String>,
    /// Where the signup came from; defaults to `landing`
    pub source: Option<String>,
    /// User attests to meeting the minimum age
    pub age_confirmed: bool,
    /// Age attestation wording shown to the user
    pub age_text: String,
    /// User agrees to receive early-access updates
    pub consent: bool,
    /// Consent wording shown to the user
    pub consent_text: String,
}

fn optional_field(name: &str, value: Option<String>, max_len: usize) -> Result<Option<String>, Error> {
    let Some(value) = value else { return Ok(None) };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > max_len {
        return Err(Error::validation(format!("{name} must be at most {max_len} characters")));
    }
    Ok(Some(value.to_string()))
}

fn attestation(name: &str, accepted: bool, text: &str) -> Result<String, Error> {
    if !accepted {
        return Err(Error::validation(format!("{name} is required")));
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::validation(format!("{name} text is required")));
    }
    if text.chars().count() > MAX_ATTESTATION_LEN {
        return Err(Error::validation(format!(
            "{name} text must be at most {MAX_ATTESTATION_LEN} characters"
        )));
    }
    Ok(text.to_string())
}

impl SignupRequest {
    /// Check the submission and normalize it into a [`SignupForm`].
    pub fn validate(self, defaults: &WaitlistConfig) -> Result<SignupForm, Error> {
        let email = EmailAddress::parse(&self.email).ok_or_else(|| Error::validation("Invalid email"))?;

        let username = optional_field("Username", self.username, MAX_USERNAME_LEN)?;
        let role = optional_field("Role", self.role, MAX_FIELD_LEN)?.unwrap_or_else(|| defaults.default_role.clone());
        let source = optional_field("Source", self.source, MAX_FIELD_LEN)?.unwrap_or_else(|| defaults.default_source.clone());
        let country = optional_field("Country", self.country, MAX_FIELD_LEN)?;

        let age_text = attestation("Age confirmation", self.age_confirmed, &self.age_text)?;
        let consent_text = attestation("Consent", self.consent, &self.consent_text)?;

        Ok(SignupForm {
            email,
            username,
            role,
            source,
            country,
            age_text,
            consent_text,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub ok: bool,
    /// The address is on the list, either newly pending or already confirmed
    pub stored: bool,
    /// Whether the confirmation email was accepted by the mail transport
    pub email_sent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ResendRequest {
    pub email: Option<String>,
}

/// Always `{ok: true}`, whatever happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResendResponse {
    pub ok: bool,
}

/// Query parameters of a confirmation link
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConfirmQuery {
    /// Raw confirmation token from the email
    pub token: Option<String>,
}

/// Query parameters of the confirmation status page
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    /// One of `ok`, `expired`, `invalid`, `server_error`
    pub status: Option<String>,
}

impl StatusQuery {
    pub fn status(&self) -> ConfirmStatus {
        ConfirmStatus::from_query(self.status.as_deref())
    }
}
