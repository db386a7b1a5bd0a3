//! Appview core: event ingestion, two-phase writes, RBAC-gated routing.
//!
//! The binary in `main.rs` wires these modules together; integration
//! tests drive them directly.

pub mod config;
pub mod cursor;
pub mod ingest;
pub mod notify;
pub mod patch;
pub mod reconcile;
pub mod resolve;
pub mod sources;
pub mod state;
pub mod web;
pub mod writes;
