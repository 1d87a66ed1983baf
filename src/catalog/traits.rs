//! Catalog trait and error types
//!
//! This module defines the trait interface for catalog backends and
//! associated error types.

use crate::catalog::{
    ComposerRecord, NewComposer, NewPiece, NewScore, PieceRecord, ResetCounts, RunRecord,
    RunStatus, ScoreRecord, Tally,
};
use thiserror::Error;

/// Errors that can occur during catalog operations
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run not found: {0}")]
    RunNotFound(i64),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Persisted store of crawl entities
///
/// Writes are staged: `stage_*` and `mark_*` calls only buffer the change,
/// and nothing reaches the database until [`Catalog::commit`] applies the
/// whole buffer atomically. Existence checks see both committed rows and
/// staged inserts.
pub trait Catalog {
    // ===== Run Management =====

    /// Records the start of a run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> CatalogResult<i64>;

    /// Records how a run ended
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> CatalogResult<()>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> CatalogResult<Option<RunRecord>>;

    // ===== Composers =====

    /// Returns true if a composer with this URL is stored or staged
    fn composer_exists(&self, url: &str) -> CatalogResult<bool>;

    /// Stages a composer unless its URL is already known
    ///
    /// Returns true if the composer was staged.
    fn stage_composer(&mut self, composer: NewComposer) -> CatalogResult<bool>;

    fn get_composer(&self, composer_id: i64) -> CatalogResult<Option<ComposerRecord>>;

    /// Composers whose piece listing has not been enumerated or failed
    fn composers_to_expand(&self) -> CatalogResult<Vec<ComposerRecord>>;

    fn mark_composer_scraped(&mut self, composer_id: i64);

    fn mark_composer_failed(&mut self, composer_id: i64);

    // ===== Pieces =====

    /// Returns true if a piece with this URL is stored or staged
    fn piece_exists(&self, url: &str) -> CatalogResult<bool>;

    /// Stages a piece unless its URL is already known
    fn stage_piece(&mut self, piece: NewPiece) -> CatalogResult<bool>;

    /// Pieces not yet scraped and not failed, in insertion order
    fn pieces_to_scrape(&self) -> CatalogResult<Vec<PieceRecord>>;

    /// Pieces scraped, not failed, and not fully downloaded
    fn pieces_to_download(&self) -> CatalogResult<Vec<PieceRecord>>;

    /// Stages the extracted metadata and page snapshot and sets `scraped`
    fn mark_piece_scraped(&mut self, piece_id: i64, json_metadata: String, html_dump: String);

    fn mark_piece_failed(&mut self, piece_id: i64);

    fn mark_piece_downloaded(&mut self, piece_id: i64);

    // ===== Scores =====

    /// Returns true if a score with this URL is stored or staged
    fn score_exists(&self, url: &str) -> CatalogResult<bool>;

    /// Stages a score unless its URL is already known
    fn stage_score(&mut self, score: NewScore) -> CatalogResult<bool>;

    fn scores_for_piece(&self, piece_id: i64) -> CatalogResult<Vec<ScoreRecord>>;

    fn mark_score_downloaded(&mut self, score_id: i64, file_path: &str);

    // ===== Commit =====

    /// Number of staged writes not yet committed
    fn pending_writes(&self) -> usize;

    /// Applies every staged write in one transaction
    ///
    /// Returns the number of writes applied. On error nothing is applied and
    /// the staged writes are kept.
    fn commit(&mut self) -> CatalogResult<usize>;

    // ===== Administration =====

    /// Clears `failed_scrape` on every composer and piece, committed at once
    fn reset_failed(&mut self) -> CatalogResult<ResetCounts>;

    // ===== Statistics =====

    fn count(&self, tally: Tally) -> CatalogResult<u64>;
}
