//! File download stage
//!
//! Two drivers share the same file and sidecar handling:
//! - Catalog-driven: every scraped piece not yet fully downloaded, one piece
//!   per unit of work, with per-score flags in the catalog
//! - List-driven: an explicit list of piece URLs (a JSON file or a search),
//!   resumable only through the downloaded-items ledger
//!
//! Files are written under a temporary `.part` name and renamed once
//! complete, so a file on disk under its final name is always whole.

use crate::catalog::{Catalog, PieceRecord, ScoreRecord};
use crate::crawler::checkpoint::Flow;
use crate::crawler::ledger::DownloadLedger;
use crate::crawler::orchestrator::{CrawlOrchestrator, RunOutcome};
use crate::crawler::paths::{file_name_for, is_allowed, piece_directory};
use crate::extract::{
    collect_search_results, fetch_piece, DownloadLink, ExtractError, FieldMap, PieceDetail,
};
use crate::request::GateError;
use crate::RipperError;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Name of the metadata sidecar written beside a piece's files
pub const SIDECAR_FILE: &str = "meta.json";

/// Metadata label naming a piece's composer
const COMPOSER_LABEL: &str = "Composer";

/// Directory name used when a piece page names no composer
const UNKNOWN_COMPOSER: &str = "Unknown composer";

/// Metadata document written beside a piece's files
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar<'a> {
    /// Piece URL; also marks which piece owns the directory
    pub url: &'a str,
    pub item_metadata: &'a FieldMap,
    pub scores: Vec<SidecarScore<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarScore<'a> {
    pub name: &'a str,
    pub url: &'a str,
    pub download_links: &'a [DownloadLink],
    pub fields: &'a FieldMap,
    pub files: Vec<String>,
}

/// Result of fetching the allowed links of one score
#[derive(Debug)]
struct LinkSet {
    /// File names on disk, in link order
    files: Vec<String>,

    /// True if every allowed link is on disk
    complete: bool,
}

/// Reads a JSON array of piece URLs
pub fn load_url_list(path: &Path) -> Result<Vec<String>, RipperError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Writes a file under a `.part` name, then renames it into place
fn write_file_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    std::fs::write(&partial, bytes)?;
    std::fs::rename(&partial, path)
}

/// Returns the directory a piece's files go to, creating it
///
/// Distinct pieces can sanitize to the same path. A directory whose sidecar
/// names another piece is left alone and the first free `<name>_<n>`
/// sibling is used instead.
fn claim_directory(base: PathBuf, owner_url: &str) -> Result<PathBuf, RipperError> {
    let mut candidate = base.clone();
    let mut suffix = 1u32;

    while let Some(owner) = sidecar_owner(&candidate)? {
        if owner == owner_url {
            break;
        }
        suffix += 1;
        let mut name = base.as_os_str().to_owned();
        name.push(format!("_{}", suffix));
        candidate = PathBuf::from(name);
        tracing::warn!(
            "{} already holds {}; using {} for {}",
            base.display(),
            owner,
            candidate.display(),
            owner_url
        );
    }

    std::fs::create_dir_all(&candidate)?;
    Ok(candidate)
}

/// URL recorded in a directory's sidecar, if the directory has one
fn sidecar_owner(directory: &Path) -> Result<Option<String>, RipperError> {
    let path = directory.join(SIDECAR_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let sidecar: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(sidecar
        .get("url")
        .and_then(|url| url.as_str())
        .map(str::to_string))
}

fn write_sidecar(directory: &Path, sidecar: &Sidecar<'_>) -> Result<(), RipperError> {
    let json = serde_json::to_string_pretty(sidecar)?;
    write_file_atomically(&directory.join(SIDECAR_FILE), json.as_bytes())?;
    Ok(())
}

impl<C: Catalog> CrawlOrchestrator<C> {
    /// Stage 4, catalog-driven
    ///
    /// One unit of work is one piece: every allowed link of each of its
    /// not-yet-downloaded scores is fetched, the sidecar is rewritten, and
    /// the piece is flagged (and recorded in the ledger) once every score is
    /// on disk. A link that fails to download leaves its score pending for
    /// the next run.
    pub async fn download_catalog(&mut self) -> Result<RunOutcome, RipperError> {
        let mut ledger = DownloadLedger::load(Path::new(&self.download.ledger_path))?;
        let pieces = self.catalog.pieces_to_download()?;
        tracing::info!("{} piece(s) to download", pieces.len());

        for (index, piece) in pieces.iter().enumerate() {
            tracing::info!(
                "Downloading piece {} ({}/{})",
                piece.name,
                index + 1,
                pieces.len()
            );

            if self.download_piece(piece, &mut ledger).await? {
                tracing::info!("Piece {} fully downloaded", piece.name);
            }

            if self.checkpoint()? == Flow::Stop {
                return Ok(RunOutcome::Interrupted);
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Downloads one piece's pending scores; returns true if it is complete
    async fn download_piece(
        &mut self,
        piece: &PieceRecord,
        ledger: &mut DownloadLedger,
    ) -> Result<bool, RipperError> {
        let composer_name = self
            .catalog
            .get_composer(piece.composer_id)?
            .map(|c| c.name)
            .unwrap_or_else(|| UNKNOWN_COMPOSER.to_string());
        let directory = claim_directory(
            piece_directory(
                Path::new(&self.download.directory),
                &composer_name,
                &piece.name,
            ),
            &piece.url,
        )?;

        let scores = self.catalog.scores_for_piece(piece.id)?;
        let mut all_downloaded = true;
        let mut score_files: Vec<Vec<String>> = Vec::with_capacity(scores.len());

        for score in &scores {
            if score.downloaded {
                score_files.push(self.files_on_disk(&score.download_links, &directory));
                continue;
            }

            let links = self.fetch_links(&score.download_links, &directory).await?;
            if links.complete {
                self.catalog
                    .mark_score_downloaded(score.id, &directory.to_string_lossy());
            } else {
                all_downloaded = false;
            }
            score_files.push(links.files);
        }

        let metadata = piece.metadata()?;
        write_sidecar(
            &directory,
            &catalog_sidecar(&piece.url, &metadata, &scores, score_files),
        )?;

        if all_downloaded {
            ledger.record(&piece.url)?;
            self.catalog.mark_piece_downloaded(piece.id);
        }
        Ok(all_downloaded)
    }

    /// Stage 4, list-driven, from a JSON file of piece URLs
    pub async fn download_list_file(&mut self, path: &Path) -> Result<RunOutcome, RipperError> {
        let urls = load_url_list(path)?;
        tracing::info!("Loaded {} piece URL(s) from {}", urls.len(), path.display());
        self.download_list(urls).await
    }

    /// Stage 4, list-driven, from the results of a search API query
    pub async fn download_search(&mut self, search_url: &str) -> Result<RunOutcome, RipperError> {
        let urls = match collect_search_results(
            &mut self.gate,
            search_url,
            self.download.search_page_size,
        )
        .await
        {
            Ok(urls) => urls,
            Err(ExtractError::Blocked(blocked)) => return Err(blocked.into()),
            Err(ExtractError::Failed(failure)) => {
                tracing::warn!("Search listing failed: {}", failure);
                return Ok(RunOutcome::Completed);
            }
        };
        tracing::info!("Search returned {} piece URL(s)", urls.len());
        self.download_list(urls).await
    }

    /// Downloads every listed piece not already in the ledger
    pub async fn download_list(&mut self, urls: Vec<String>) -> Result<RunOutcome, RipperError> {
        let mut ledger = DownloadLedger::load(Path::new(&self.download.ledger_path))?;
        let pending: Vec<String> = urls.into_iter().filter(|u| !ledger.contains(u)).collect();
        tracing::info!("{} listed piece(s) not yet downloaded", pending.len());

        for (index, url) in pending.iter().enumerate() {
            tracing::info!("Downloading {} ({}/{})", url, index + 1, pending.len());

            match fetch_piece(&mut self.gate, url).await {
                Ok(detail) => {
                    if self.download_detail(&detail).await? {
                        ledger.record(url)?;
                    } else {
                        tracing::warn!("Some files of {} could not be downloaded", url);
                    }
                }
                Err(ExtractError::Blocked(blocked)) => return Err(blocked.into()),
                Err(ExtractError::Failed(failure)) => {
                    tracing::warn!("Skipping {}: {}", url, failure);
                }
            }

            if self.checkpoint()? == Flow::Stop {
                return Ok(RunOutcome::Interrupted);
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Downloads every group of a parsed piece page; returns true if complete
    async fn download_detail(&mut self, detail: &PieceDetail) -> Result<bool, RipperError> {
        let composer = detail
            .metadata
            .get(COMPOSER_LABEL)
            .map(|field| field.text.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_COMPOSER);
        let title = detail
            .title
            .clone()
            .or_else(|| file_name_for(&detail.url))
            .unwrap_or_else(|| detail.url.clone());

        let directory = claim_directory(
            piece_directory(Path::new(&self.download.directory), composer, &title),
            &detail.url,
        )?;

        let mut complete = true;
        let mut names = Vec::new();
        let mut files = Vec::new();
        for group in detail.downloadable_scores() {
            let links = self.fetch_links(&group.download_links, &directory).await?;
            complete &= links.complete;
            names.push(group.display_name().unwrap_or_default());
            files.push(links.files);
        }

        let scores = detail
            .downloadable_scores()
            .zip(&names)
            .zip(files)
            .map(|((group, name), files)| SidecarScore {
                name,
                url: group.identity_url().unwrap_or_default(),
                download_links: &group.download_links,
                fields: &group.fields,
                files,
            })
            .collect();

        write_sidecar(
            &directory,
            &Sidecar {
                url: &detail.url,
                item_metadata: &detail.metadata,
                scores,
            },
        )?;
        Ok(complete)
    }

    /// Names of the allowed files of `links` already present in `directory`
    fn files_on_disk(&self, links: &[DownloadLink], directory: &Path) -> Vec<String> {
        links
            .iter()
            .filter(|link| is_allowed(&link.url, &self.download.allowed_extensions))
            .filter_map(|link| file_name_for(&link.url))
            .filter(|name| directory.join(name).exists())
            .collect()
    }

    /// Fetches every allowed link into `directory`, skipping files on disk
    ///
    /// Only the block condition is an error; any other failure leaves the
    /// set incomplete.
    async fn fetch_links(
        &mut self,
        links: &[DownloadLink],
        directory: &Path,
    ) -> Result<LinkSet, RipperError> {
        let mut set = LinkSet {
            files: Vec::new(),
            complete: true,
        };

        for link in links {
            if !is_allowed(&link.url, &self.download.allowed_extensions) {
                tracing::debug!("Skipping {} (extension not allowed)", link.url);
                continue;
            }
            let Some(file_name) = file_name_for(&link.url) else {
                tracing::warn!("Cannot derive a file name from {}", link.url);
                set.complete = false;
                continue;
            };

            let target = directory.join(&file_name);
            if target.exists() {
                set.files.push(file_name);
                continue;
            }

            match self.gate.fetch(&link.url).await {
                Ok(page) => {
                    write_file_atomically(&target, &page.body)?;
                    tracing::debug!("Saved {} ({} bytes)", target.display(), page.body.len());
                    set.files.push(file_name);
                }
                Err(GateError::Blocked(blocked)) => return Err(blocked.into()),
                Err(GateError::Failed(failure)) => {
                    tracing::warn!("Failed to download {}: {}", link.url, failure);
                    set.complete = false;
                }
            }
        }

        Ok(set)
    }
}

fn catalog_sidecar<'a>(
    url: &'a str,
    metadata: &'a FieldMap,
    scores: &'a [ScoreRecord],
    files: Vec<Vec<String>>,
) -> Sidecar<'a> {
    Sidecar {
        url,
        item_metadata: metadata,
        scores: scores
            .iter()
            .zip(files)
            .map(|(score, files)| SidecarScore {
                name: &score.name,
                url: &score.url,
                download_links: &score.download_links,
                fields: &score.fields,
                files,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FieldValue;
    use tempfile::TempDir;

    #[test]
    fn test_write_file_atomically_leaves_no_part_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Mass.pdf");

        write_file_atomically(&target, b"%PDF-1.4").unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.4");
        assert!(!dir.path().join("Mass.pdf.part").exists());
    }

    #[test]
    fn test_sidecar_shape() {
        let mut metadata = FieldMap::new();
        metadata.insert("Voicing".to_string(), FieldValue::plain("SATB"));
        let links = vec![DownloadLink {
            text: "PDF".to_string(),
            url: "/f/a.pdf".to_string(),
        }];
        let fields = FieldMap::new();
        let sidecar = Sidecar {
            url: "/wiki/index.php/Gloria",
            item_metadata: &metadata,
            scores: vec![SidecarScore {
                name: "PDF",
                url: "/f/a.pdf",
                download_links: &links,
                fields: &fields,
                files: vec!["a.pdf".to_string()],
            }],
        };

        let value = serde_json::to_value(&sidecar).unwrap();
        assert_eq!(value["url"], "/wiki/index.php/Gloria");
        assert_eq!(value["itemMetadata"]["Voicing"]["text"], "SATB");
        assert_eq!(value["scores"][0]["downloadLinks"][0]["url"], "/f/a.pdf");
        assert_eq!(value["scores"][0]["files"][0], "a.pdf");
    }

    fn claim_and_sign(base: &Path, url: &str) -> PathBuf {
        let directory = claim_directory(base.to_path_buf(), url).unwrap();
        let metadata = FieldMap::new();
        write_sidecar(
            &directory,
            &Sidecar {
                url,
                item_metadata: &metadata,
                scores: Vec::new(),
            },
        )
        .unwrap();
        directory
    }

    #[test]
    fn test_colliding_pieces_get_separate_directories() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("Anonymous").join("Ave_Maria");

        let first = claim_and_sign(&base, "/wiki/index.php/Ave_Maria");
        let second = claim_and_sign(&base, "/wiki/index.php/Ave_Maria!");
        let third = claim_and_sign(&base, "/wiki/index.php/Ave_Maria?");

        assert_eq!(first, base);
        assert_eq!(second, dir.path().join("Anonymous").join("Ave_Maria_2"));
        assert_eq!(third, dir.path().join("Anonymous").join("Ave_Maria_3"));

        // Rerunning a piece finds its own directory again
        assert_eq!(
            claim_directory(base.clone(), "/wiki/index.php/Ave_Maria!").unwrap(),
            second
        );
        assert_eq!(
            claim_directory(base, "/wiki/index.php/Ave_Maria").unwrap(),
            first
        );
    }

    #[test]
    fn test_load_url_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pieces.json");
        std::fs::write(&path, r#"["/wiki/index.php/A", "/wiki/index.php/B"]"#).unwrap();

        assert_eq!(
            load_url_list(&path).unwrap(),
            vec!["/wiki/index.php/A", "/wiki/index.php/B"]
        );
    }
}
