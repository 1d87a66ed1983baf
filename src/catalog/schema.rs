//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the catalog database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS composers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    all_scraped INTEGER NOT NULL DEFAULT 0,
    all_downloaded INTEGER NOT NULL DEFAULT 0,
    failed_scrape INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pieces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    composer_id INTEGER NOT NULL REFERENCES composers(id),
    json_metadata TEXT,
    html_dump TEXT,
    scraped INTEGER NOT NULL DEFAULT 0,
    all_downloaded INTEGER NOT NULL DEFAULT 0,
    failed_scrape INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pieces_composer ON pieces(composer_id);
CREATE INDEX IF NOT EXISTS idx_pieces_flags ON pieces(scraped, failed_scrape, all_downloaded);

CREATE TABLE IF NOT EXISTS scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    composer_id INTEGER NOT NULL REFERENCES composers(id),
    piece_id INTEGER NOT NULL REFERENCES pieces(id),
    downloaded INTEGER NOT NULL DEFAULT 0,
    failed_scrape INTEGER NOT NULL DEFAULT 0,
    file_path TEXT,
    rating REAL,
    rating_count INTEGER,
    file_format TEXT,
    links_json TEXT NOT NULL DEFAULT '[]',
    fields_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_scores_piece ON scores(piece_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
