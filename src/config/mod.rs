//! Configuration module for Choral-Ripper
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use choral_ripper::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ripper.toml")).unwrap();
//! println!("Fuzzing between {}ms and {}ms", config.requester.fuzz_min_ms, config.requester.fuzz_max_ms);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CatalogConfig, Config, DownloadConfig, NotifyConfig, RequesterConfig, SiteConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
