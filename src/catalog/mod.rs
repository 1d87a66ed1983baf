//! Catalog of discovered composers, pieces and scores
//!
//! This module persists every entity the crawl discovers, including:
//! - Unique-by-URL insertion of composers, pieces and scores
//! - Per-entity progress flags driving each crawl stage
//! - Buffered writes applied atomically at each checkpoint
//! - Run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteCatalog;
pub use traits::{Catalog, CatalogError, CatalogResult};

use crate::extract::{DownloadLink, FieldMap};
use std::path::Path;

/// Opens (or creates) the catalog database at `path`
pub fn open_catalog(path: &Path) -> CatalogResult<SqliteCatalog> {
    SqliteCatalog::new(path)
}

/// A composer row
#[derive(Debug, Clone, PartialEq)]
pub struct ComposerRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub all_scraped: bool,
    pub all_downloaded: bool,
    pub failed_scrape: bool,
}

/// A piece row, without its page snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct PieceRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub composer_id: i64,
    pub json_metadata: Option<String>,
    pub scraped: bool,
    pub all_downloaded: bool,
    pub failed_scrape: bool,
}

impl PieceRecord {
    /// Parsed general metadata, empty when the piece has none yet
    pub fn metadata(&self) -> CatalogResult<FieldMap> {
        match &self.json_metadata {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(FieldMap::new()),
        }
    }
}

/// A score row
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub composer_id: i64,
    pub piece_id: i64,
    pub downloaded: bool,
    pub failed_scrape: bool,
    pub file_path: Option<String>,
    pub rating: Option<f64>,
    pub rating_count: Option<i64>,
    pub file_format: Option<String>,
    pub download_links: Vec<DownloadLink>,
    pub fields: FieldMap,
}

/// A composer about to be inserted
#[derive(Debug, Clone)]
pub struct NewComposer {
    pub name: String,
    pub url: String,
}

/// A piece about to be inserted
#[derive(Debug, Clone)]
pub struct NewPiece {
    pub name: String,
    pub url: String,
    pub composer_id: i64,
}

/// A score about to be inserted
#[derive(Debug, Clone)]
pub struct NewScore {
    pub name: String,
    pub url: String,
    pub composer_id: i64,
    pub piece_id: i64,
    pub rating: Option<f64>,
    pub rating_count: Option<i64>,
    pub file_format: Option<String>,
    pub download_links: Vec<DownloadLink>,
    pub fields: FieldMap,
}

/// Aggregate counts the catalog can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tally {
    Composers,
    ComposersScraped,
    ComposersFailed,
    Pieces,
    PiecesScraped,
    PiecesFailed,
    PiecesDownloaded,
    Scores,
    ScoresDownloaded,
}

/// Rows changed by an administrative reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetCounts {
    pub composers: u64,
    pub pieces: u64,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Blocked,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "blocked" => Some(Self::Blocked),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
