//! legis-sync - Legislative data synchronization and change-detection engine
//!
//! This crate keeps a local store of Congress.gov bills, members and hearings
//! current, detects meaningful bill changes, and records every sync in an
//! auditable ledger.

pub mod changes;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod otel;
pub mod queue;
pub mod resources;
pub mod sync;
pub mod upstream;
