//! Shared types and database helpers for FileForge services.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{PlanId, SubscriptionStatus};
