//! Test utilities shared by unit and handler tests.

use async_trait::async_trait;
use axum_test::TestServer;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};

use crate::{
    AppState,
    config::{Config, DatabaseConfig, EmailTransportConfig, PoolSettings},
    email::{EmailError, Mailer, OutboundEmail},
};

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("waitlist-test-emails-{}", std::process::id()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        public_url: "https://omniamus.test".to_string(),
        database: DatabaseConfig {
            // Tests get their pool from sqlx::test
            url: Some("postgres://localhost/waitlist_test".to_string()),
            pool: PoolSettings {
                max_connections: 4,
                min_connections: 0,
                ..Default::default()
            },
        },
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    config
}

/// Mailer that keeps every message in memory instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
    fail: bool,
}

impl RecordingMailer {
    /// A mailer whose transport rejects everything
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), EmailError> {
        if self.fail {
            return Err(EmailError::Transport("recording mailer set to fail".to_string()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Pull the raw token out of the confirmation link in an email's plain-text body
pub fn token_from_link(email: &OutboundEmail) -> String {
    let text = email.text.as_deref().expect("confirmation email has a text part");
    let start = text.find("token=").expect("email contains a confirmation link") + "token=".len();
    text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

pub fn create_test_state(pool: PgPool, mailer: Arc<dyn Mailer>) -> AppState {
    AppState::builder().db(pool).config(create_test_config()).mailer(mailer).build()
}

/// Full router over a fresh recording mailer
pub fn create_test_app(pool: PgPool) -> (TestServer, Arc<RecordingMailer>) {
    let recorder = Arc::new(RecordingMailer::default());
    let state = create_test_state(pool, recorder.clone());
    let router = crate::build_router(state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, recorder)
}
