//! HTTP request handlers.
//!
//! Handlers extract and validate input, call into [`crate::service::WaitlistService`],
//! and shape the response. Failures that reach the client are [`crate::errors::Error`],
//! which renders as a JSON `{ok: false, error}` body.
//!
//! - [`waitlist`]: signup, confirm, resend and the confirmation status page

pub mod waitlist;
