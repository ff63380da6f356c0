//! # doorbell-channels
//!
//! Slack Socket Mode channel and the local music player relay.

pub mod player;
pub mod slack;
