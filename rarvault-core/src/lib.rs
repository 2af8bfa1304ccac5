//! Core library for rarvault: archive reading, the duplicate index, the
//! directory watcher, the processing queue, and the three materialization
//! strategies. `rarvault-server` owns configuration parsing, the HTTP range
//! server, and process wiring; this crate knows nothing about TOML or axum.

pub mod archive;
pub mod config;
pub mod disposer;
pub mod dupe_index;
pub mod error;
pub mod fingerprint;
pub mod fsutil;
pub mod notifier;
pub mod queue;
pub mod sanitize;
pub mod strategy;
pub mod token_registry;
pub mod types;
pub mod watch;

pub use error::{RarvaultError, Result};
