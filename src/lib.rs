//! Genshin Data Sync - game wiki scraping and incremental reconciliation
//!
//! Pulls character and weapon pages from a public wiki, recovers typed
//! attributes from their tables, resolves the bilingual vocabulary to
//! canonical enumerations and reconciles the result into SQLite, writing
//! only what changed.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod test_utils;

// Re-export the entry points for easier access
pub use application::{Orchestrator, ScraperApi};
pub use infrastructure::config::AppConfig;
