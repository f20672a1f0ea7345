//! Core domain + application logic for the Twitch follower gate.
//!
//! Framework-agnostic: Telegram, Twitch Helix and the HTTP callback surface
//! live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod followers;
pub mod formatting;
pub mod logging;
pub mod ports;
pub mod security;
pub mod sessions;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
