//! Statistics generation from the catalog
//!
//! This module provides functionality for extracting and displaying
//! crawl progress from the catalog.

use crate::catalog::{Catalog, CatalogResult, Tally};
use std::fmt;

/// Catalog progress summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStatistics {
    pub composers: u64,
    pub composers_scraped: u64,
    pub composers_failed: u64,

    pub pieces: u64,
    pub pieces_scraped: u64,
    pub pieces_failed: u64,
    pub pieces_downloaded: u64,

    pub scores: u64,
    pub scores_downloaded: u64,
}

/// Loads statistics from the catalog
///
/// # Arguments
///
/// * `catalog` - The catalog to query
pub fn load_statistics<C: Catalog + ?Sized>(catalog: &C) -> CatalogResult<CatalogStatistics> {
    Ok(CatalogStatistics {
        composers: catalog.count(Tally::Composers)?,
        composers_scraped: catalog.count(Tally::ComposersScraped)?,
        composers_failed: catalog.count(Tally::ComposersFailed)?,
        pieces: catalog.count(Tally::Pieces)?,
        pieces_scraped: catalog.count(Tally::PiecesScraped)?,
        pieces_failed: catalog.count(Tally::PiecesFailed)?,
        pieces_downloaded: catalog.count(Tally::PiecesDownloaded)?,
        scores: catalog.count(Tally::Scores)?,
        scores_downloaded: catalog.count(Tally::ScoresDownloaded)?,
    })
}

fn percentage(part: u64, total: u64) -> f64 {
    if total > 0 {
        (part as f64 / total as f64) * 100.0
    } else {
        0.0
    }
}

impl fmt::Display for CatalogStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Composers: {}", self.composers)?;
        writeln!(
            f,
            "  Pieces enumerated: {} ({:.1}%)",
            self.composers_scraped,
            percentage(self.composers_scraped, self.composers)
        )?;
        writeln!(f, "  Failed: {}", self.composers_failed)?;

        writeln!(f, "Pieces: {}", self.pieces)?;
        writeln!(
            f,
            "  Scraped: {} ({:.1}%)",
            self.pieces_scraped,
            percentage(self.pieces_scraped, self.pieces)
        )?;
        writeln!(f, "  Failed: {}", self.pieces_failed)?;
        writeln!(
            f,
            "  Fully downloaded: {} ({:.1}%)",
            self.pieces_downloaded,
            percentage(self.pieces_downloaded, self.pieces)
        )?;

        writeln!(f, "Scores: {}", self.scores)?;
        write!(
            f,
            "  Downloaded: {} ({:.1}%)",
            self.scores_downloaded,
            percentage(self.scores_downloaded, self.scores)
        )
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CatalogStatistics) {
    println!("=== Catalog Statistics ===\n");
    println!("{}", stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewComposer, SqliteCatalog};

    #[test]
    fn test_load_statistics() {
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();
        for url in ["/c/a", "/c/b"] {
            catalog
                .stage_composer(NewComposer {
                    name: url.to_string(),
                    url: url.to_string(),
                })
                .unwrap();
        }
        catalog.commit().unwrap();
        let first = catalog.composers_to_expand().unwrap()[0].id;
        catalog.mark_composer_scraped(first);
        catalog.commit().unwrap();

        let stats = load_statistics(&catalog).unwrap();
        assert_eq!(stats.composers, 2);
        assert_eq!(stats.composers_scraped, 1);
        assert_eq!(stats.pieces, 0);
    }

    #[test]
    fn test_display_handles_empty_catalog() {
        let text = CatalogStatistics::default().to_string();
        assert!(text.contains("Composers: 0"));
        assert!(text.contains("Scraped: 0 (0.0%)"));
    }
}
