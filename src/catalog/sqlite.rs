//! SQLite catalog implementation
//!
//! This module provides a SQLite-based implementation of the Catalog trait.

use crate::catalog::schema::initialize_schema;
use crate::catalog::traits::{Catalog, CatalogError, CatalogResult};
use crate::catalog::{
    ComposerRecord, NewComposer, NewPiece, NewScore, PieceRecord, ResetCounts, RunRecord,
    RunStatus, ScoreRecord, Tally,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashSet;
use std::path::Path;

/// A write waiting for the next commit
#[derive(Debug, Clone)]
enum PendingWrite {
    InsertComposer(NewComposer),
    InsertPiece(NewPiece),
    InsertScore(NewScore),
    ComposerScraped(i64),
    ComposerFailed(i64),
    PieceScraped {
        id: i64,
        json_metadata: String,
        html_dump: String,
    },
    PieceFailed(i64),
    PieceDownloaded(i64),
    ScoreDownloaded {
        id: i64,
        file_path: String,
    },
}

/// SQLite catalog backend
pub struct SqliteCatalog {
    conn: Connection,
    pending: Vec<PendingWrite>,
    staged_composers: HashSet<String>,
    staged_pieces: HashSet<String>,
    staged_scores: HashSet<String>,
}

const COMPOSER_COLUMNS: &str = "id, name, url, all_scraped, all_downloaded, failed_scrape";
const PIECE_COLUMNS: &str =
    "id, name, url, composer_id, json_metadata, scraped, all_downloaded, failed_scrape";
const SCORE_COLUMNS: &str = "id, name, url, composer_id, piece_id, downloaded, failed_scrape, \
     file_path, rating, rating_count, file_format, links_json, fields_json";

impl SqliteCatalog {
    /// Opens or creates the catalog database
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn new(path: &Path) -> CatalogResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory catalog
    pub fn new_in_memory() -> CatalogResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            pending: Vec::new(),
            staged_composers: HashSet::new(),
            staged_pieces: HashSet::new(),
            staged_scores: HashSet::new(),
        }
    }

    fn url_exists(&self, table: &str, url: &str) -> CatalogResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE url = ?1", table),
                params![url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count_where(&self, table: &str, condition: &str) -> CatalogResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE {}", table, condition),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.staged_composers.clear();
        self.staged_pieces.clear();
        self.staged_scores.clear();
    }
}

fn composer_from_row(row: &Row<'_>) -> rusqlite::Result<ComposerRecord> {
    Ok(ComposerRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        all_scraped: row.get(3)?,
        all_downloaded: row.get(4)?,
        failed_scrape: row.get(5)?,
    })
}

fn piece_from_row(row: &Row<'_>) -> rusqlite::Result<PieceRecord> {
    Ok(PieceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        composer_id: row.get(3)?,
        json_metadata: row.get(4)?,
        scraped: row.get(5)?,
        all_downloaded: row.get(6)?,
        failed_scrape: row.get(7)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
    })
}

/// Applies a single staged write inside the commit transaction
fn apply(tx: &Transaction<'_>, write: &PendingWrite) -> CatalogResult<()> {
    match write {
        PendingWrite::InsertComposer(composer) => {
            tx.execute(
                "INSERT INTO composers (name, url) VALUES (?1, ?2)",
                params![composer.name, composer.url],
            )?;
        }
        PendingWrite::InsertPiece(piece) => {
            tx.execute(
                "INSERT INTO pieces (name, url, composer_id) VALUES (?1, ?2, ?3)",
                params![piece.name, piece.url, piece.composer_id],
            )?;
        }
        PendingWrite::InsertScore(score) => {
            tx.execute(
                "INSERT INTO scores (name, url, composer_id, piece_id, rating, rating_count,
                 file_format, links_json, fields_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    score.name,
                    score.url,
                    score.composer_id,
                    score.piece_id,
                    score.rating,
                    score.rating_count,
                    score.file_format,
                    serde_json::to_string(&score.download_links)?,
                    serde_json::to_string(&score.fields)?,
                ],
            )?;
        }
        PendingWrite::ComposerScraped(id) => {
            tx.execute(
                "UPDATE composers SET all_scraped = 1 WHERE id = ?1",
                params![id],
            )?;
        }
        PendingWrite::ComposerFailed(id) => {
            tx.execute(
                "UPDATE composers SET failed_scrape = 1 WHERE id = ?1",
                params![id],
            )?;
        }
        PendingWrite::PieceScraped {
            id,
            json_metadata,
            html_dump,
        } => {
            tx.execute(
                "UPDATE pieces SET scraped = 1, json_metadata = ?1, html_dump = ?2 WHERE id = ?3",
                params![json_metadata, html_dump, id],
            )?;
        }
        PendingWrite::PieceFailed(id) => {
            tx.execute(
                "UPDATE pieces SET failed_scrape = 1 WHERE id = ?1",
                params![id],
            )?;
        }
        PendingWrite::PieceDownloaded(id) => {
            tx.execute(
                "UPDATE pieces SET all_downloaded = 1 WHERE id = ?1",
                params![id],
            )?;
        }
        PendingWrite::ScoreDownloaded { id, file_path } => {
            tx.execute(
                "UPDATE scores SET downloaded = 1, file_path = ?1 WHERE id = ?2",
                params![file_path, id],
            )?;
        }
    }
    Ok(())
}

impl Catalog for SqliteCatalog {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> CatalogResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> CatalogResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(CatalogError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_latest_run(&self) -> CatalogResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    // ===== Composers =====

    fn composer_exists(&self, url: &str) -> CatalogResult<bool> {
        Ok(self.staged_composers.contains(url) || self.url_exists("composers", url)?)
    }

    fn stage_composer(&mut self, composer: NewComposer) -> CatalogResult<bool> {
        if self.composer_exists(&composer.url)? {
            return Ok(false);
        }
        self.staged_composers.insert(composer.url.clone());
        self.pending.push(PendingWrite::InsertComposer(composer));
        Ok(true)
    }

    fn get_composer(&self, composer_id: i64) -> CatalogResult<Option<ComposerRecord>> {
        let composer = self
            .conn
            .query_row(
                &format!("SELECT {} FROM composers WHERE id = ?1", COMPOSER_COLUMNS),
                params![composer_id],
                composer_from_row,
            )
            .optional()?;
        Ok(composer)
    }

    fn composers_to_expand(&self) -> CatalogResult<Vec<ComposerRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM composers WHERE all_scraped = 0 AND failed_scrape = 0 ORDER BY id",
            COMPOSER_COLUMNS
        ))?;
        let composers = stmt
            .query_map([], composer_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(composers)
    }

    fn mark_composer_scraped(&mut self, composer_id: i64) {
        self.pending.push(PendingWrite::ComposerScraped(composer_id));
    }

    fn mark_composer_failed(&mut self, composer_id: i64) {
        self.pending.push(PendingWrite::ComposerFailed(composer_id));
    }

    // ===== Pieces =====

    fn piece_exists(&self, url: &str) -> CatalogResult<bool> {
        Ok(self.staged_pieces.contains(url) || self.url_exists("pieces", url)?)
    }

    fn stage_piece(&mut self, piece: NewPiece) -> CatalogResult<bool> {
        if self.piece_exists(&piece.url)? {
            return Ok(false);
        }
        self.staged_pieces.insert(piece.url.clone());
        self.pending.push(PendingWrite::InsertPiece(piece));
        Ok(true)
    }

    fn pieces_to_scrape(&self) -> CatalogResult<Vec<PieceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pieces WHERE scraped = 0 AND failed_scrape = 0 ORDER BY id",
            PIECE_COLUMNS
        ))?;
        let pieces = stmt
            .query_map([], piece_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pieces)
    }

    fn pieces_to_download(&self) -> CatalogResult<Vec<PieceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM pieces
             WHERE scraped = 1 AND failed_scrape = 0 AND all_downloaded = 0 ORDER BY id",
            PIECE_COLUMNS
        ))?;
        let pieces = stmt
            .query_map([], piece_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pieces)
    }

    fn mark_piece_scraped(&mut self, piece_id: i64, json_metadata: String, html_dump: String) {
        self.pending.push(PendingWrite::PieceScraped {
            id: piece_id,
            json_metadata,
            html_dump,
        });
    }

    fn mark_piece_failed(&mut self, piece_id: i64) {
        self.pending.push(PendingWrite::PieceFailed(piece_id));
    }

    fn mark_piece_downloaded(&mut self, piece_id: i64) {
        self.pending.push(PendingWrite::PieceDownloaded(piece_id));
    }

    // ===== Scores =====

    fn score_exists(&self, url: &str) -> CatalogResult<bool> {
        Ok(self.staged_scores.contains(url) || self.url_exists("scores", url)?)
    }

    fn stage_score(&mut self, score: NewScore) -> CatalogResult<bool> {
        if self.score_exists(&score.url)? {
            return Ok(false);
        }
        self.staged_scores.insert(score.url.clone());
        self.pending.push(PendingWrite::InsertScore(score));
        Ok(true)
    }

    fn scores_for_piece(&self, piece_id: i64) -> CatalogResult<Vec<ScoreRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM scores WHERE piece_id = ?1 ORDER BY id",
            SCORE_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![piece_id], |row| {
                Ok((
                    ScoreRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        url: row.get(2)?,
                        composer_id: row.get(3)?,
                        piece_id: row.get(4)?,
                        downloaded: row.get(5)?,
                        failed_scrape: row.get(6)?,
                        file_path: row.get(7)?,
                        rating: row.get(8)?,
                        rating_count: row.get(9)?,
                        file_format: row.get(10)?,
                        download_links: Vec::new(),
                        fields: Default::default(),
                    },
                    row.get::<_, String>(11)?,
                    row.get::<_, String>(12)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(mut score, links_json, fields_json)| {
                score.download_links = serde_json::from_str(&links_json)?;
                score.fields = serde_json::from_str(&fields_json)?;
                Ok(score)
            })
            .collect()
    }

    fn mark_score_downloaded(&mut self, score_id: i64, file_path: &str) {
        self.pending.push(PendingWrite::ScoreDownloaded {
            id: score_id,
            file_path: file_path.to_string(),
        });
    }

    // ===== Commit =====

    fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    fn commit(&mut self) -> CatalogResult<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        for write in &self.pending {
            apply(&tx, write)?;
        }
        tx.commit()?;

        let applied = self.pending.len();
        self.clear_pending();
        tracing::debug!("Committed {} catalog write(s)", applied);
        Ok(applied)
    }

    // ===== Administration =====

    fn reset_failed(&mut self) -> CatalogResult<ResetCounts> {
        let tx = self.conn.transaction()?;
        let composers = tx.execute(
            "UPDATE composers SET failed_scrape = 0 WHERE failed_scrape = 1",
            [],
        )?;
        let pieces = tx.execute(
            "UPDATE pieces SET failed_scrape = 0 WHERE failed_scrape = 1",
            [],
        )?;
        tx.commit()?;

        Ok(ResetCounts {
            composers: composers as u64,
            pieces: pieces as u64,
        })
    }

    // ===== Statistics =====

    fn count(&self, tally: Tally) -> CatalogResult<u64> {
        let (table, condition) = match tally {
            Tally::Composers => ("composers", "1"),
            Tally::ComposersScraped => ("composers", "all_scraped = 1"),
            Tally::ComposersFailed => ("composers", "failed_scrape = 1"),
            Tally::Pieces => ("pieces", "1"),
            Tally::PiecesScraped => ("pieces", "scraped = 1"),
            Tally::PiecesFailed => ("pieces", "failed_scrape = 1"),
            Tally::PiecesDownloaded => ("pieces", "all_downloaded = 1"),
            Tally::Scores => ("scores", "1"),
            Tally::ScoresDownloaded => ("scores", "downloaded = 1"),
        };
        self.count_where(table, condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DownloadLink, FieldMap, FieldValue};

    fn composer(url: &str) -> NewComposer {
        NewComposer {
            name: format!("Composer {}", url),
            url: url.to_string(),
        }
    }

    fn seeded_piece(catalog: &mut SqliteCatalog) -> (i64, i64) {
        catalog.stage_composer(composer("/c/tallis")).unwrap();
        catalog.commit().unwrap();
        let composer_id = catalog.composers_to_expand().unwrap()[0].id;

        catalog
            .stage_piece(NewPiece {
                name: "Spem in alium".to_string(),
                url: "/p/spem".to_string(),
                composer_id,
            })
            .unwrap();
        catalog.commit().unwrap();
        let piece_id = catalog.pieces_to_scrape().unwrap()[0].id;
        (composer_id, piece_id)
    }

    #[test]
    fn test_staged_writes_invisible_until_commit() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();

        assert!(catalog.stage_composer(composer("/c/byrd")).unwrap());
        assert_eq!(catalog.count(Tally::Composers).unwrap(), 0);
        assert_eq!(catalog.pending_writes(), 1);

        assert_eq!(catalog.commit().unwrap(), 1);
        assert_eq!(catalog.count(Tally::Composers).unwrap(), 1);
        assert_eq!(catalog.pending_writes(), 0);
    }

    #[test]
    fn test_duplicate_urls_skipped_before_and_after_commit() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();

        assert!(catalog.stage_composer(composer("/c/byrd")).unwrap());
        assert!(!catalog.stage_composer(composer("/c/byrd")).unwrap());
        catalog.commit().unwrap();
        assert!(!catalog.stage_composer(composer("/c/byrd")).unwrap());
        assert_eq!(catalog.commit().unwrap(), 0);

        assert_eq!(catalog.count(Tally::Composers).unwrap(), 1);
    }

    #[test]
    fn test_flag_queries() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();
        let (composer_id, piece_id) = seeded_piece(&mut catalog);

        catalog.mark_composer_scraped(composer_id);
        catalog.mark_piece_failed(piece_id);
        catalog.commit().unwrap();

        assert!(catalog.composers_to_expand().unwrap().is_empty());
        assert!(catalog.pieces_to_scrape().unwrap().is_empty());
        assert!(catalog.pieces_to_download().unwrap().is_empty());
        assert_eq!(catalog.count(Tally::PiecesFailed).unwrap(), 1);
    }

    #[test]
    fn test_score_round_trip_through_json_columns() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();
        let (composer_id, piece_id) = seeded_piece(&mut catalog);

        let mut fields = FieldMap::new();
        fields.insert("Editor".to_string(), FieldValue::plain("Jane Doe"));
        catalog
            .stage_score(NewScore {
                name: "PDF".to_string(),
                url: "/f/spem.pdf".to_string(),
                composer_id,
                piece_id,
                rating: Some(4.5),
                rating_count: Some(12),
                file_format: Some("PDF".to_string()),
                download_links: vec![DownloadLink {
                    text: "PDF".to_string(),
                    url: "/f/spem.pdf".to_string(),
                }],
                fields,
            })
            .unwrap();
        catalog.mark_piece_scraped(piece_id, "{}".to_string(), "<html></html>".to_string());
        catalog.commit().unwrap();

        let scores = catalog.scores_for_piece(piece_id).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].download_links[0].url, "/f/spem.pdf");
        assert_eq!(scores[0].fields["Editor"].text, "Jane Doe");
        assert_eq!(scores[0].rating_count, Some(12));

        assert_eq!(catalog.pieces_to_download().unwrap().len(), 1);
        catalog.mark_score_downloaded(scores[0].id, "downloads/Tallis/Spem");
        catalog.mark_piece_downloaded(piece_id);
        catalog.commit().unwrap();

        assert!(catalog.pieces_to_download().unwrap().is_empty());
        assert_eq!(catalog.count(Tally::ScoresDownloaded).unwrap(), 1);
        let stored = catalog.scores_for_piece(piece_id).unwrap();
        assert_eq!(stored[0].file_path.as_deref(), Some("downloads/Tallis/Spem"));
    }

    #[test]
    fn test_failed_commit_keeps_pending_writes() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();
        catalog.stage_composer(composer("/c/victoria")).unwrap();
        // Unknown composer violates the foreign key
        catalog
            .stage_piece(NewPiece {
                name: "Orphan".to_string(),
                url: "/p/orphan".to_string(),
                composer_id: 999,
            })
            .unwrap();

        assert!(catalog.commit().is_err());
        assert_eq!(catalog.pending_writes(), 2);
        assert_eq!(catalog.count(Tally::Composers).unwrap(), 0);
    }

    #[test]
    fn test_reset_failed() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();
        let (composer_id, piece_id) = seeded_piece(&mut catalog);
        catalog.mark_composer_failed(composer_id);
        catalog.mark_piece_failed(piece_id);
        catalog.commit().unwrap();

        let counts = catalog.reset_failed().unwrap();
        assert_eq!(
            counts,
            ResetCounts {
                composers: 1,
                pieces: 1
            }
        );
        assert_eq!(catalog.pieces_to_scrape().unwrap().len(), 1);
        assert_eq!(catalog.reset_failed().unwrap(), ResetCounts::default());
    }

    #[test]
    fn test_run_lifecycle() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();
        assert!(catalog.get_latest_run().unwrap().is_none());

        let run_id = catalog.create_run("abc123").unwrap();
        catalog.finish_run(run_id, RunStatus::Interrupted).unwrap();

        let run = catalog.get_latest_run().unwrap().unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Interrupted);
        assert!(run.finished_at.is_some());

        assert!(matches!(
            catalog.finish_run(42, RunStatus::Completed),
            Err(CatalogError::RunNotFound(42))
        ));
    }
}
