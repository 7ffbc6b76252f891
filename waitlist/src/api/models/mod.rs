//! API request and response data models.
//!
//! These are the JSON shapes of the public HTTP contract and are kept apart from the
//! database models in [`crate::db::models`]. All of them derive `utoipa::ToSchema` so they
//! show up in the generated OpenAPI document.
//!
//! - [`waitlist`]: signup, resend and confirmation payloads

pub mod waitlist;
