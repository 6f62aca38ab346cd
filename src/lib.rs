//! VIGIL — Resilient autonomous trading decision loop
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod resilience;
pub mod data;
pub mod broker;
pub mod strategy;
pub mod engine;
pub mod storage;
