//! # doorbell-calendar
//!
//! Calendar service implementations for Doorbell.

pub mod google;

pub use google::GoogleCalendar;
