//! Core domain + application logic for the DM relay bot.
//!
//! This crate is framework-agnostic. Telegram and the AI backends live behind
//! ports (traits) implemented in adapter crates.

pub mod ai;
pub mod autoreply;
pub mod blacklist;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod moderation;
pub mod notices;
pub mod pipeline;
pub mod rate_limit;
pub mod review;
pub mod store;
pub mod threads;
pub mod verification;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
