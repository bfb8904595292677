//! Database module for echowatch.
//!
//! Provides SQLite storage for per-service health state and the
//! notification preference.

mod models;
mod store;

pub use models::*;
pub use store::*;
