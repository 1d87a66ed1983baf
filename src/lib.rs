//! Choral-Ripper: a resumable catalog crawler
//!
//! This crate crawls a composer → piece → score hierarchy on a single
//! rate-limited wiki, persisting every discovered entity so that a crawl
//! spanning days can be interrupted and resumed at the next unit of work.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod notify;
pub mod output;
pub mod request;

use thiserror::Error;

/// Main error type for Choral-Ripper operations
#[derive(Debug, Error)]
pub enum RipperError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The site served its anti-scraping page. Never recoverable.
    #[error(transparent)]
    Blocked(#[from] request::BlockDetected),

    #[error("Catalog error: {0}")]
    Catalog(#[from] catalog::CatalogError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RipperError {
    /// Returns true if this error means the crawler has been detected
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Choral-Ripper operations
pub type Result<T> = std::result::Result<T, RipperError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{Catalog, SqliteCatalog};
pub use config::Config;
pub use crawler::{CrawlOrchestrator, RunOutcome};
pub use request::RequestGate;
