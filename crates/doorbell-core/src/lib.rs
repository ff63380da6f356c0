//! # doorbell-core
//!
//! Core types, traits, configuration, and error handling for the Doorbell bot.

pub mod calendar;
pub mod config;
pub mod error;
pub mod message;
pub mod traits;

pub use config::shellexpand;
