//! Shared library modules for the courtside projection engine.
//!
//! Re-exports everything the standalone binaries (`courtside`, `backfill`)
//! need without duplicating code between them.

pub mod alias;
pub mod chain;
pub mod config;
pub mod finality;
pub mod model;
pub mod odds;
pub mod reconcile;
pub mod store;
pub mod webhook;
