//! Page extraction
//!
//! This module turns fetched markup into structured data:
//! - Paginated category listings → ordered (name, URL) links
//! - Piece pages → general metadata and per-score download groups
//! - Search API result pages → piece URLs
//!
//! Every extractor fetches through the [`RequestGate`] and reports one of
//! three outcomes: the extracted value, a recoverable [`PageFailure`], or the
//! fatal [`BlockDetected`] condition, which is never folded into a failure.

mod fields;
mod listing;
mod piece;
mod search;

pub use fields::{clean_label, normalize_text, parse_labelled_fields, FieldMap, FieldValue};
pub use listing::{collect_listing, parse_listing_page, ListingLink, ListingPage, ListingRules};
pub use piece::{
    fetch_piece, parse_general_metadata, parse_score_groups, DownloadLink, PieceDetail, Rating,
    ScoreGroup, CATALOG_NUMBER_FIELD,
};
pub use search::{collect_search_results, next_search_offset, search_page_urls, with_search_paging};

use crate::request::{BlockDetected, FetchFailure, GateError, RequestGate};
use thiserror::Error;

/// Page structure did not match expectations
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("No content container with class '{0}'")]
    MissingContainer(String),

    #[error("Content containers nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("Section heading '#{0}' not found")]
    MissingSection(String),

    #[error("Section heading '#{0}' has no enclosing heading element")]
    DetachedHeading(String),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Recoverable failure to extract one page
#[derive(Debug, Error)]
pub enum PageFailure {
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchFailure,
    },

    #[error("Failed to parse {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },
}

impl PageFailure {
    /// URL of the page that failed
    pub fn url(&self) -> &str {
        match self {
            Self::Fetch { url, .. } | Self::Parse { url, .. } => url,
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

/// Error returned by every extractor
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Fatal: propagate unchanged to the top level
    #[error(transparent)]
    Blocked(#[from] BlockDetected),

    /// Recoverable: flag the entity and move on
    #[error(transparent)]
    Failed(#[from] PageFailure),
}

impl ExtractError {
    pub(crate) fn parse(url: &str, source: ParseError) -> Self {
        Self::Failed(PageFailure::Parse {
            url: url.to_string(),
            source,
        })
    }

    pub(crate) fn fetch(url: &str, source: FetchFailure) -> Self {
        Self::Failed(PageFailure::Fetch {
            url: url.to_string(),
            source,
        })
    }
}

/// Fetches a page and returns its body as text
pub(crate) async fn fetch_text(gate: &mut RequestGate, url: &str) -> Result<String, ExtractError> {
    match gate.fetch(url).await {
        Ok(page) => Ok(page.text()),
        Err(GateError::Blocked(blocked)) => Err(ExtractError::Blocked(blocked)),
        Err(GateError::Failed(source)) => Err(ExtractError::fetch(url, source)),
    }
}

/// Builds a selector, reporting bad configuration as a parse failure
pub(crate) fn selector(css: &str) -> Result<scraper::Selector, ParseError> {
    scraper::Selector::parse(css).map_err(|_| ParseError::Selector(css.to_string()))
}
