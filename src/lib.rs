//! COINHOP: autonomous ratio-jumping trading engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod market;
pub mod exchange;
pub mod execution;
pub mod engine;
pub mod storage;
