//! Output module for reporting catalog progress
//!
//! This module handles:
//! - Loading progress counts from the catalog
//! - Printing them for the `stats` command and the status digest

pub mod stats;

pub use stats::{load_statistics, print_statistics, CatalogStatistics};
