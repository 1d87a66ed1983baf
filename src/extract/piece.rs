//! Piece page extraction
//!
//! A piece page carries two sections of interest, each opened by an `h2`
//! that wraps an anchor `span`:
//!
//! - `#General_Information`: paragraphs of labelled metadata for the piece
//! - `#Music_files`: a run of siblings where each `ul` starts a new score
//!   group (its download links), optionally followed by `dl` lists holding
//!   that score's details
//!
//! A section runs until the next `h2` or the end of its parent.

use crate::extract::fields::{clean_label, parse_labelled_fields, FieldMap, FieldValue};
use crate::extract::{fetch_text, selector, ExtractError, ParseError};
use crate::request::RequestGate;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};

const GENERAL_INFORMATION: &str = "General_Information";
const MUSIC_FILES: &str = "Music_files";

/// Prefix of the bold catalog-number marker inside a download list
const CATALOG_NUMBER_PREFIX: &str = "CPDL";

/// Field label the catalog number is stored under
pub const CATALOG_NUMBER_FIELD: &str = "CPDL#";

/// One download link of a score group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub text: String,
    pub url: String,
}

/// One score of a piece: its download links and details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreGroup {
    pub download_links: Vec<DownloadLink>,
    pub fields: FieldMap,
}

/// Numeric rating parsed from a score's `Rating` field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rating {
    pub value: Option<f64>,
    pub count: Option<i64>,
}

impl ScoreGroup {
    /// URL identifying this score: its first download link
    pub fn identity_url(&self) -> Option<&str> {
        self.download_links.first().map(|link| link.url.as_str())
    }

    /// Display name: first link text, else the file name of its URL, else
    /// the URL itself
    ///
    /// `None` only for a group without links.
    pub fn display_name(&self) -> Option<String> {
        let first = self.download_links.first()?;
        if !first.text.trim().is_empty() {
            return Some(first.text.trim().to_string());
        }
        let name = first
            .url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&first.url);
        Some(name.to_string())
    }

    /// Upper-cased extension of the identity URL, e.g. `PDF`
    pub fn file_format(&self) -> Option<String> {
        let url = self.identity_url()?;
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file = path.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(ext.to_ascii_uppercase())
    }

    /// Rating and vote count from a field like `4.5 (12 votes)`
    pub fn rating(&self) -> Rating {
        let Some(field) = self.fields.get("Rating") else {
            return Rating {
                value: None,
                count: None,
            };
        };

        let mut numbers = field
            .text
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .filter(|s| !s.is_empty() && *s != ".");

        let value = numbers.next().and_then(|s| s.parse::<f64>().ok());
        let count = numbers.next().and_then(|s| s.parse::<i64>().ok());
        Rating { value, count }
    }
}

/// Everything extracted from a piece page
#[derive(Debug, Clone)]
pub struct PieceDetail {
    /// URL the page was requested with
    pub url: String,

    /// Page heading
    pub title: Option<String>,

    /// Labelled metadata of the General Information section
    pub metadata: FieldMap,

    /// Score groups of the Music files section, in page order
    pub scores: Vec<ScoreGroup>,

    /// Raw markup snapshot
    pub raw_html: String,
}

impl PieceDetail {
    /// Parses a piece page
    ///
    /// Both sections must be present; a page missing either is reported as a
    /// parse error rather than returned half-filled.
    pub fn parse(url: &str, html: String) -> Result<Self, ParseError> {
        let document = Html::parse_document(&html);
        let title = parse_title(&document)?;
        let metadata = parse_general_metadata(&document)?;
        let scores = parse_score_groups(&document)?;
        drop(document);

        Ok(Self {
            url: url.to_string(),
            title,
            metadata,
            scores,
            raw_html: html,
        })
    }

    /// Score groups that have at least one download link
    pub fn downloadable_scores(&self) -> impl Iterator<Item = &ScoreGroup> {
        self.scores.iter().filter(|g| !g.download_links.is_empty())
    }
}

/// Fetches and parses a piece page
pub async fn fetch_piece(gate: &mut RequestGate, url: &str) -> Result<PieceDetail, ExtractError> {
    let html = fetch_text(gate, url).await?;
    PieceDetail::parse(url, html).map_err(|e| ExtractError::parse(url, e))
}

fn parse_title(document: &Html) -> Result<Option<String>, ParseError> {
    let heading = selector("h1#firstHeading")?;
    Ok(document
        .select(&heading)
        .next()
        .map(|h| h.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty()))
}

/// Parses the labelled paragraphs of the General Information section
pub fn parse_general_metadata(document: &Html) -> Result<FieldMap, ParseError> {
    let mut metadata = FieldMap::new();

    for paragraph in section_elements(document, GENERAL_INFORMATION)? {
        if paragraph.value().name() == "p" {
            metadata.extend(parse_labelled_fields(paragraph));
        }
    }

    Ok(metadata)
}

/// Splits the Music files section into score groups
pub fn parse_score_groups(document: &Html) -> Result<Vec<ScoreGroup>, ParseError> {
    let anchor = selector("a[href]")?;
    let bold = selector("b")?;
    let definition = selector("dd")?;

    let mut groups: Vec<ScoreGroup> = Vec::new();

    for element in section_elements(document, MUSIC_FILES)? {
        match element.value().name() {
            "ul" => {
                let download_links = element
                    .select(&anchor)
                    .filter_map(|a| {
                        let url = a.value().attr("href")?.trim();
                        (!url.is_empty()).then(|| DownloadLink {
                            text: a.text().collect::<String>().trim().to_string(),
                            url: url.to_string(),
                        })
                    })
                    .collect();
                let mut group = ScoreGroup {
                    download_links,
                    fields: FieldMap::new(),
                };

                if let Some(number) = element
                    .select(&bold)
                    .map(|b| b.text().collect::<String>())
                    .find(|text| text.trim_start().starts_with(CATALOG_NUMBER_PREFIX))
                    .and_then(|text| catalog_number(&text))
                {
                    group
                        .fields
                        .insert(CATALOG_NUMBER_FIELD.to_string(), FieldValue::plain(&number));
                }

                groups.push(group);
            }
            "dl" => {
                // Details before the first download list belong to no score
                if let Some(group) = groups.last_mut() {
                    for row in element.select(&definition) {
                        group.fields.extend(parse_labelled_fields(row));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(groups)
}

/// Number after the last `#` of a marker like `CPDL #12345:`
fn catalog_number(marker: &str) -> Option<String> {
    let number = clean_label(marker.rsplit('#').next()?);
    (!number.is_empty()).then_some(number)
}

/// Sibling elements after a section heading, up to the next `h2`
fn section_elements<'a>(document: &'a Html, id: &str) -> Result<Vec<ElementRef<'a>>, ParseError> {
    let marker = selector(&format!("span#{}", id))?;
    let span = document
        .select(&marker)
        .next()
        .ok_or_else(|| ParseError::MissingSection(id.to_string()))?;

    let heading = span
        .parent()
        .and_then(ElementRef::wrap)
        .ok_or_else(|| ParseError::DetachedHeading(id.to_string()))?;

    Ok(heading
        .next_siblings()
        .take_while(|node| {
            !matches!(node.value(), Node::Element(element) if element.name() == "h2")
        })
        .filter_map(ElementRef::wrap)
        .collect())
}
