//! # doorbell-store
//!
//! Persistent state for Doorbell: a single JSON aggregate holding the weekly
//! schedule, calendar subscriptions, and role assignments.

pub mod data;
pub mod store;

pub use data::{Data, DaySchedule, Subscription, WeeklySchedule};
pub use store::Store;
