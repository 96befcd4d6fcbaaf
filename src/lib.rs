//! Timed application core for a municipal rental-housing portal.
//!
//! Logs in once through a real browser, reuses the resulting cookies for
//! plain HTTP calls, finds and classifies listings, waits for the daily
//! application window and submits application forms in parallel.

pub mod bot;
pub mod config;
pub mod error;
pub mod models;
pub mod portal;
pub mod status;
pub mod telemetry;

pub use bot::{select_targets, Bot, Selection};
pub use error::{BotError, Result};
