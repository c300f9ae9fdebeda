//! takeover: leveraged position engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod amount;
pub mod api;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod pricing;
pub mod types;
