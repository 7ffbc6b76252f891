//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # Routes
//!
//! - `POST /waitlist`: sign up
//! - `GET /confirm?token=...`: confirm an address (redirects to the status page)
//! - `POST /waitlist/resend`: request a new confirmation link
//! - `GET /confirmed?status=...`: confirmation status page
//!
//! The OpenAPI document is served at `/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
