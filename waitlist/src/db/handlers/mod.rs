//! Repository implementations for database access.
//!
//! Each repository:
//! - Wraps a SQLx connection or transaction
//! - Provides strongly-typed operations
//! - Returns domain models from [`crate::db::models`]
//!
//! # Available Repositories
//!
//! - [`WaitlistEntries`]: Waitlist signup, confirmation and token reissue
//!
//! # Common Pattern
//!
//! ```ignore
//! use waitlist::db::handlers::WaitlistEntries;
//!
//! async fn example(pool: &sqlx::PgPool, email: &EmailAddress) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = pool.acquire().await?;
//!     let mut repo = WaitlistEntries::new(&mut conn);
//!
//!     if let Some(entry) = repo.get_by_email(email).await? {
//!         println!("{} confirmed: {}", entry.email, entry.confirmed_at.is_some());
//!     }
//!     Ok(())
//! }
//! ```

pub mod waitlist;

pub use waitlist::WaitlistEntries;
