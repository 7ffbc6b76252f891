//! # waitlist: double opt-in early access signup
//!
//! `waitlist` is the backend behind an early access landing page. Visitors submit the signup
//! form, receive an email with a confirmation link, and are on the list once they follow it.
//!
//! ## Overview
//!
//! Every signup is one row in the `waitlist` table, keyed by its lowercased email address. A row
//! moves through a small lifecycle:
//!
//! - **pending**: a confirmation token has been issued and is still live
//! - **expired**: the token's lifetime has passed; the row is dead until a new signup or a
//!   resend issues a fresh token
//! - **confirmed**: the link was followed; the token is gone and the row never changes again
//!   through this service
//!
//! Only the SHA-256 digest of a token is stored. The raw token exists in the outbound email and
//! in the link the recipient follows, nowhere else.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! uses PostgreSQL for persistence.
//!
//! - The **API layer** ([`api`]) extracts and validates requests and shapes responses.
//! - The **service layer** ([`service`]) runs the signup, confirm and resend workflows.
//! - The **database layer** ([`db`]) holds the [`db::handlers::WaitlistEntries`] repository.
//!   Each state transition is a single SQL statement, so concurrent confirms of the same link
//!   are settled by PostgreSQL and exactly one of them succeeds.
//! - The **mail layer** ([`email`]) sends through SMTP or writes messages to a directory. Mail
//!   failures are logged and never undo a stored signup.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use waitlist::{Application, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = waitlist::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     waitlist::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run automatically on startup. To run them by hand:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! waitlist::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
mod openapi;
pub mod service;
pub mod telemetry;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use anyhow::Context;
use axum::{
    Json, Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    config::{Config, CorsOrigin},
    email::Mailer,
};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .mailer(mailer)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub mailer: Arc<dyn Mailer>,
}

/// Get the waitlist database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect the pool described by `database` settings and run migrations
#[instrument(skip_all)]
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let database_url = config
        .database
        .url
        .as_deref()
        .context("database url is not configured (set DATABASE_URL or database.url)")?;
    let settings = &config.database.pool;

    let mut options = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs));
    // Zero means never
    if settings.idle_timeout_secs > 0 {
        options = options.idle_timeout(Duration::from_secs(settings.idle_timeout_secs));
    }
    if settings.max_lifetime_secs > 0 {
        options = options.max_lifetime(Duration::from_secs(settings.max_lifetime_secs));
    }

    let pool = options.connect(database_url).await.context("failed to connect to database")?;
    migrator().run(&pool).await.context("failed to run migrations")?;
    info!("Database ready (max {} connections)", settings.max_connections);

    Ok(pool)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            // Origins never carry a trailing slash, Url always renders one
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// Resend lives in its own router, throttled to `waitlist.resend_max_in_flight` concurrent
/// requests, since each one may hit the mail transport.
///
/// # Errors
///
/// Returns an error if the CORS configuration is invalid.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let resend_routes = Router::new()
        .route("/waitlist/resend", post(api::handlers::waitlist::resend))
        .layer(ConcurrencyLimitLayer::new(state.config.waitlist.resend_max_in_flight))
        .with_state(state.clone());

    let cors_layer = create_cors_layer(&state.config)?;
    let api_doc = openapi::api_doc(&state.config.waitlist);

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .route("/waitlist", post(api::handlers::waitlist::signup))
        .route("/confirm", get(api::handlers::waitlist::confirm))
        .route("/confirmed", get(api::handlers::waitlist::status_page))
        .route("/openapi.json", get({
            let doc = api_doc.clone();
            move || async move { Json(doc) }
        }))
        .with_state(state)
        .merge(resend_routes)
        .merge(Scalar::with_url("/docs", api_doc))
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting waitlist with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;
        let mailer = email::create_mailer(&config)?;

        let app_state = AppState::builder().db(pool.clone()).config(config.clone()).mailer(mailer).build();
        let router = build_router(app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Waitlist listening on http://{}, public at {}",
            bind_addr,
            self.config.public_base()
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
