//! Database record models matching table schemas.
//!
//! These structs correspond directly to table rows and derive `sqlx::FromRow`. They are
//! kept separate from the API models in [`crate::api::models`] so that storage and wire
//! representations can evolve independently.
//!
//! - [`waitlist`]: Waitlist entries and their double opt-in lifecycle state

pub mod waitlist;
