//! Command implementations for the CLI
//!
//! - start: Run the collector and HTTP API
//! - config: Configuration display and validation
//! - query: Offline reads of the metric stores
//! - sync: Per-application sync flags

pub mod config;
pub mod query;
pub mod start;
pub mod sync;
