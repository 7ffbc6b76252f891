//! Outbound email: the [`Mailer`] abstraction, the lettre-backed [`EmailService`], and the
//! confirmation and welcome messages.
//!
//! Delivery failures are reported as [`EmailError`] and never abort the operation that
//! triggered them; callers log them and carry on.

use async_trait::async_trait;
use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::{path::Path, sync::Arc, time::Duration};

use crate::{
    config::{Config, EmailTransportConfig, WaitlistConfig},
    errors::Error,
    types::EmailAddress,
};

/// A message ready to hand to a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: EmailAddress,
    pub subject: String,
    pub html: String,
    /// Plain-text alternative, sent alongside the HTML part when present
    pub text: Option<String>,
}

/// Why a message was not accepted for delivery
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("could not build message: {0}")]
    Build(String),

    #[error("transport rejected message: {0}")]
    Transport(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Transactional mail delivery.
///
/// `Ok(())` means the transport accepted the message.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError>;
}

/// Create the mailer described by configuration
pub fn create_mailer(config: &Config) -> Result<Arc<dyn Mailer>, Error> {
    Ok(Arc::new(EmailService::new(config)?))
}

pub struct EmailService {
    transport: EmailTransport,
    from: Mailbox,
    reply_to: Option<Mailbox>,
    send_timeout: Duration,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if host.is_empty() || username.is_empty() || password.is_empty() {
                    return Err(Error::NotConfigured {
                        what: "SMTP transport".to_string(),
                    });
                }
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let relay = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                };
                let smtp_builder = relay
                    .map_err(|e| Error::Internal {
                        operation: format!("create SMTP transport: {e}"),
                    })?
                    .port(*port)
                    .timeout(Some(email_config.send_timeout))
                    .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        let from = format!("{} <{}>", email_config.from_name, email_config.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::NotConfigured {
                what: format!("email sender address: {e}"),
            })?;

        let reply_to = email_config
            .reply_to
            .as_deref()
            .map(|addr| addr.parse::<Mailbox>())
            .transpose()
            .map_err(|e| Error::NotConfigured {
                what: format!("email reply-to address: {e}"),
            })?;

        Ok(Self {
            transport,
            from,
            reply_to,
            send_timeout: email_config.send_timeout,
        })
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, EmailError> {
        let to = email
            .to
            .as_str()
            .parse::<Mailbox>()
            .map_err(|e| EmailError::Address(e.to_string()))?;

        let mut builder = Message::builder().from(self.from.clone()).to(to).subject(&email.subject);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        match &email.text {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(text.clone(), email.html.clone())),
            None => builder.header(ContentType::TEXT_HTML).body(email.html.clone()),
        }
        .map_err(|e| EmailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for EmailService {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
        let message = self.build_message(email)?;

        let delivery = async {
            match &self.transport {
                EmailTransport::Smtp(smtp) => smtp.send(message).await.map(|_| ()).map_err(|e| EmailError::Transport(e.to_string())),
                EmailTransport::File(file) => file.send(message).await.map(|_| ()).map_err(|e| EmailError::Transport(e.to_string())),
            }
        };

        tokio::time::timeout(self.send_timeout, delivery)
            .await
            .map_err(|_| EmailError::Timeout(self.send_timeout))?
    }
}

/// Human phrasing for a link lifetime, e.g. "24 hours" or "30 minutes"
pub(crate) fn describe_ttl(ttl: Duration) -> String {
    let minutes = ttl.as_secs() / 60;
    match minutes {
        m if m >= 60 && m % 60 == 0 => {
            let hours = m / 60;
            if hours == 1 { "1 hour".to_string() } else { format!("{hours} hours") }
        }
        0 | 1 => "1 minute".to_string(),
        m => format!("{m} minutes"),
    }
}

/// The double opt-in email carrying the confirmation link
pub fn confirmation_email(waitlist: &WaitlistConfig, to: &EmailAddress, confirm_link: &str) -> OutboundEmail {
    let product_name = &waitlist.product_name;
    let minimum_age = waitlist.minimum_age;
    let expiry = describe_ttl(waitlist.token_ttl);

    let text = format!(
        "Confirm your email to join the {product_name} early access list:\n\n{confirm_link}\n\n\
         Early access is open to people aged {minimum_age} and over.\n\n\
         If you didn't request this, you can ignore this email. This link expires in {expiry}."
    );

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Confirm your email</title>
</head>
<body>
    <div style="font-family:system-ui,Segoe UI,Arial,sans-serif;line-height:1.5">
        <h2>Confirm your email</h2>
        <p>Click the button below to confirm your {product_name} early access signup.</p>
        <p style="margin:18px 0">
            <a href="{confirm_link}"
               style="display:inline-block;padding:10px 14px;border-radius:10px;background:#ffffff;color:#000;text-decoration:none;font-weight:600">
                Confirm email
            </a>
        </p>
        <p>Or copy and paste this link into your browser:</p>
        <p>{confirm_link}</p>
        <p>Early access is open to people aged {minimum_age} and over.</p>
        <p style="font-size:12px;opacity:0.7">
            If you didn't request this, ignore this email. This link expires in {expiry}.
        </p>
    </div>
</body>
</html>"#
    );

    OutboundEmail {
        to: to.clone(),
        subject: format!("Confirm your {product_name} early access"),
        html,
        text: Some(text),
    }
}

/// Sent once an address has been confirmed
pub fn welcome_email(product_name: &str, to: &EmailAddress, public_url: &str) -> OutboundEmail {
    let text = format!(
        "You're confirmed. Thanks for joining {product_name} early access.\n\n\
         We'll email you when your access is ready.\n\n{public_url}\n"
    );

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>You're confirmed</title>
</head>
<body>
    <div style="font-family:system-ui,Segoe UI,Arial,sans-serif;line-height:1.5">
        <h2>You're confirmed</h2>
        <p>Thanks for joining {product_name} early access.</p>
        <p>We'll email you when your access is ready.</p>
        <p style="margin-top:16px">
            <a href="{public_url}" style="color:#000;text-decoration:underline;font-weight:600">Visit {product_name}</a>
        </p>
    </div>
</body>
</html>"#
    );

    OutboundEmail {
        to: to.clone(),
        subject: format!("You're confirmed - {product_name} Early Access"),
        html,
        text: Some(text),
    }
}
