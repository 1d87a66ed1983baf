//! Crawl orchestration
//!
//! The orchestrator drives the catalog through its stages:
//! 1. Seed composers from the composer listing
//! 2. Expand each composer into its pieces
//! 3. Expand each piece into its scores
//! 4. Download score files (see the `download` module)
//!
//! No work queue is kept in memory between units: every stage selects its
//! work from catalog flags, so an interrupted run resumes at the next
//! unprocessed entity.

use crate::catalog::{Catalog, NewComposer, NewPiece, NewScore, PieceRecord, Tally};
use crate::config::{Config, DownloadConfig, SiteConfig};
use crate::crawler::checkpoint::{Checkpoint, Flow};
use crate::extract::{collect_listing, fetch_piece, ExtractError, ListingRules, PieceDetail};
use crate::notify::Notifier;
use crate::request::RequestGate;
use crate::RipperError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a pipeline invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every selected unit of work was processed
    Completed,

    /// Termination was requested and honored at a checkpoint
    Interrupted,
}

/// Drives the crawl stages over a catalog
pub struct CrawlOrchestrator<C: Catalog> {
    pub(crate) site: SiteConfig,
    pub(crate) download: DownloadConfig,
    pub(crate) rules: ListingRules,
    pub(crate) gate: RequestGate,
    pub(crate) catalog: C,
    pub(crate) checkpoint: Checkpoint,
}

impl<C: Catalog> CrawlOrchestrator<C> {
    /// Creates an orchestrator
    ///
    /// # Arguments
    ///
    /// * `config` - The loaded configuration
    /// * `gate` - Gate every request goes through
    /// * `catalog` - Catalog the stages read and update
    /// * `notifier` - Receives the periodic status digest
    /// * `cancel` - Termination request, honored at checkpoints
    pub fn new(
        config: &Config,
        gate: RequestGate,
        catalog: C,
        notifier: Notifier,
        cancel: CancellationToken,
    ) -> Self {
        let status_interval =
            Duration::from_secs(config.notify.status_interval_hours.saturating_mul(3600));
        Self {
            site: config.site.clone(),
            download: config.download.clone(),
            rules: ListingRules::from_site(&config.site),
            gate,
            catalog,
            checkpoint: Checkpoint::new(cancel, notifier, status_interval),
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut C {
        &mut self.catalog
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn into_catalog(self) -> C {
        self.catalog
    }

    /// Runs stages 1 to 3
    pub async fn run_scrape(&mut self) -> Result<RunOutcome, RipperError> {
        if self.seed_composers().await? == RunOutcome::Interrupted {
            return Ok(RunOutcome::Interrupted);
        }
        if self.expand_composers().await? == RunOutcome::Interrupted {
            return Ok(RunOutcome::Interrupted);
        }
        self.expand_pieces().await
    }

    /// Stage 1: stages every composer of the composer listing
    ///
    /// Skipped entirely, without a single fetch, once the catalog holds at
    /// least the expected number of composers.
    pub async fn seed_composers(&mut self) -> Result<RunOutcome, RipperError> {
        let existing = self.catalog.count(Tally::Composers)?;
        if existing >= self.site.expected_composers {
            tracing::info!(
                "Catalog already holds {} composer(s); skipping seeding",
                existing
            );
            return Ok(RunOutcome::Completed);
        }

        tracing::info!(
            "Seeding composers from {} ({} already known)",
            self.site.composer_list_url,
            existing
        );

        let links = match collect_listing(
            &mut self.gate,
            &self.site.composer_list_url,
            &self.site.composer_link_class,
            &self.rules,
        )
        .await
        {
            Ok(links) => links,
            Err(ExtractError::Blocked(blocked)) => return Err(blocked.into()),
            Err(ExtractError::Failed(failure)) => {
                tracing::warn!("Composer listing failed: {}", failure);
                return Ok(RunOutcome::Completed);
            }
        };

        let mut added = 0usize;
        for link in links {
            if self.catalog.stage_composer(NewComposer {
                name: link.name,
                url: link.url,
            })? {
                added += 1;
            }
        }
        tracing::info!("Seeded {} new composer(s)", added);

        self.checkpoint().map(Self::outcome)
    }

    /// Stage 2: enumerates the pieces of every composer not yet expanded
    pub async fn expand_composers(&mut self) -> Result<RunOutcome, RipperError> {
        let composers = self.catalog.composers_to_expand()?;
        tracing::info!("{} composer(s) to expand", composers.len());

        for (index, composer) in composers.iter().enumerate() {
            tracing::info!(
                "Expanding composer {} ({}/{})",
                composer.name,
                index + 1,
                composers.len()
            );

            match collect_listing(
                &mut self.gate,
                &composer.url,
                &self.site.piece_link_class,
                &self.rules,
            )
            .await
            {
                Ok(links) => {
                    let mut added = 0usize;
                    for link in links {
                        if self.catalog.stage_piece(NewPiece {
                            name: link.name,
                            url: link.url,
                            composer_id: composer.id,
                        })? {
                            added += 1;
                        }
                    }
                    tracing::info!("Found {} new piece(s) for {}", added, composer.name);
                    self.catalog.mark_composer_scraped(composer.id);
                }
                Err(ExtractError::Blocked(blocked)) => return Err(blocked.into()),
                Err(ExtractError::Failed(failure)) => {
                    tracing::warn!("Failed to expand composer {}: {}", composer.name, failure);
                    self.catalog.mark_composer_failed(composer.id);
                }
            }

            if self.checkpoint()? == Flow::Stop {
                return Ok(RunOutcome::Interrupted);
            }
        }

        Ok(RunOutcome::Completed)
    }

    /// Stage 3: extracts metadata and scores of every piece not yet scraped
    ///
    /// A piece whose page fails to fetch or parse is flagged and never
    /// selected again.
    pub async fn expand_pieces(&mut self) -> Result<RunOutcome, RipperError> {
        let pieces = self.catalog.pieces_to_scrape()?;
        tracing::info!("{} piece(s) to scrape", pieces.len());

        for (index, piece) in pieces.iter().enumerate() {
            tracing::debug!("Scraping piece {} ({}/{})", piece.name, index + 1, pieces.len());

            match fetch_piece(&mut self.gate, &piece.url).await {
                Ok(detail) => self.stage_piece_detail(piece, detail)?,
                Err(ExtractError::Blocked(blocked)) => return Err(blocked.into()),
                Err(ExtractError::Failed(failure)) => {
                    tracing::warn!("Failed to scrape piece {}: {}", piece.name, failure);
                    self.catalog.mark_piece_failed(piece.id);
                }
            }

            if self.checkpoint()? == Flow::Stop {
                return Ok(RunOutcome::Interrupted);
            }
        }

        Ok(RunOutcome::Completed)
    }

    fn stage_piece_detail(
        &mut self,
        piece: &PieceRecord,
        detail: PieceDetail,
    ) -> Result<(), RipperError> {
        let mut added = 0usize;
        for group in detail.downloadable_scores() {
            let (Some(url), Some(name)) = (group.identity_url(), group.display_name()) else {
                continue;
            };
            let rating = group.rating();
            let staged = self.catalog.stage_score(NewScore {
                name,
                url: url.to_string(),
                composer_id: piece.composer_id,
                piece_id: piece.id,
                rating: rating.value,
                rating_count: rating.count,
                file_format: group.file_format(),
                download_links: group.download_links.clone(),
                fields: group.fields.clone(),
            })?;
            if staged {
                added += 1;
            }
        }

        let json_metadata = serde_json::to_string(&detail.metadata)?;
        self.catalog
            .mark_piece_scraped(piece.id, json_metadata, detail.raw_html);
        tracing::info!("Scraped piece {} ({} new score(s))", piece.name, added);
        Ok(())
    }

    pub(crate) fn checkpoint(&mut self) -> Result<Flow, RipperError> {
        self.checkpoint.commit(&mut self.catalog)
    }

    fn outcome(flow: Flow) -> RunOutcome {
        match flow {
            Flow::Continue => RunOutcome::Completed,
            Flow::Stop => RunOutcome::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::config::parse_config;

    fn orchestrator(expected: u64) -> CrawlOrchestrator<SqliteCatalog> {
        let config = parse_config(&format!(
            r#"
[site]
root = "http://127.0.0.1:9"
composer-list-url = "/wiki/index.php/Category:Composers"
expected-composers = {expected}

[requester]
fuzz-min-ms = 0
fuzz-max-ms = 0

[catalog]
database-path = ":memory:"
"#
        ))
        .unwrap();
        let gate = RequestGate::with_seed(&config.site.root, &config.requester, 1).unwrap();
        CrawlOrchestrator::new(
            &config,
            gate,
            SqliteCatalog::new_in_memory().unwrap(),
            Notifier::log_only(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_seeding_skipped_at_expected_floor() {
        let mut orchestrator = orchestrator(0);
        let outcome = orchestrator.seed_composers().await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(orchestrator.gate().last_request_time().is_none());
    }

    #[tokio::test]
    async fn test_empty_catalog_stages_complete_without_fetching() {
        let mut orchestrator = orchestrator(0);
        assert_eq!(
            orchestrator.expand_composers().await.unwrap(),
            RunOutcome::Completed
        );
        assert_eq!(
            orchestrator.expand_pieces().await.unwrap(),
            RunOutcome::Completed
        );
        assert!(orchestrator.gate().last_request_time().is_none());
    }

    #[test]
    fn test_stage_piece_detail_skips_known_scores() {
        let mut orchestrator = orchestrator(0);
        let catalog = orchestrator.catalog_mut();
        catalog
            .stage_composer(NewComposer {
                name: "Thomas Tallis".to_string(),
                url: "/c/tallis".to_string(),
            })
            .unwrap();
        catalog.commit().unwrap();
        let composer_id = catalog.composers_to_expand().unwrap()[0].id;
        catalog
            .stage_piece(NewPiece {
                name: "If ye love me".to_string(),
                url: "/p/if-ye-love-me".to_string(),
                composer_id,
            })
            .unwrap();
        catalog.commit().unwrap();
        let piece = catalog.pieces_to_scrape().unwrap().remove(0);

        let html = r#"<html><body>
            <h2><span id="Music_files">Music files</span></h2>
            <ul><li><a href="/f/a.pdf">PDF</a></li></ul>
            <ul><li><a href="/f/a.pdf">PDF again</a></li></ul>
            <ul><li>no links</li></ul>
            <h2><span id="General_Information">General Information</span></h2>
            <p><b>Voicing:</b> SATB</p>
            </body></html>"#;
        let detail = PieceDetail::parse(&piece.url, html.to_string()).unwrap();

        orchestrator.stage_piece_detail(&piece, detail).unwrap();
        orchestrator.catalog_mut().commit().unwrap();

        let catalog = orchestrator.catalog();
        assert_eq!(catalog.count(Tally::Scores).unwrap(), 1);
        assert_eq!(catalog.count(Tally::PiecesScraped).unwrap(), 1);
        let scores = catalog.scores_for_piece(piece.id).unwrap();
        assert_eq!(scores[0].file_format.as_deref(), Some("PDF"));
    }

    #[test]
    fn test_unnamed_link_group_still_stored() {
        let mut orchestrator = orchestrator(0);
        let catalog = orchestrator.catalog_mut();
        catalog
            .stage_composer(NewComposer {
                name: "Anonymous".to_string(),
                url: "/c/anonymous".to_string(),
            })
            .unwrap();
        catalog.commit().unwrap();
        let composer_id = catalog.composers_to_expand().unwrap()[0].id;
        catalog
            .stage_piece(NewPiece {
                name: "Kyrie".to_string(),
                url: "/p/kyrie".to_string(),
                composer_id,
            })
            .unwrap();
        catalog.commit().unwrap();
        let piece = catalog.pieces_to_scrape().unwrap().remove(0);

        let html = r#"<html><body>
            <h2><span id="Music_files">Music files</span></h2>
            <ul><li><a href="/f/kyrie/"> </a></li></ul>
            <h2><span id="General_Information">General Information</span></h2>
            </body></html>"#;
        let detail = PieceDetail::parse(&piece.url, html.to_string()).unwrap();

        orchestrator.stage_piece_detail(&piece, detail).unwrap();
        orchestrator.catalog_mut().commit().unwrap();

        let scores = orchestrator.catalog().scores_for_piece(piece.id).unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].name, "/f/kyrie/");
        assert_eq!(scores[0].url, "/f/kyrie/");
    }

    #[test]
    fn test_huge_status_interval_does_not_overflow() {
        let mut config = parse_config(
            r#"
[site]
root = "http://127.0.0.1:9"
composer-list-url = "/wiki/Composers"
expected-composers = 0

[catalog]
database-path = ":memory:"
"#,
        )
        .unwrap();
        config.notify.status_interval_hours = u64::MAX;

        let gate = RequestGate::with_seed(&config.site.root, &config.requester, 1).unwrap();
        let orchestrator = CrawlOrchestrator::new(
            &config,
            gate,
            SqliteCatalog::new_in_memory().unwrap(),
            Notifier::log_only(),
            CancellationToken::new(),
        );
        assert_eq!(orchestrator.catalog().count(Tally::Composers).unwrap(), 0);
    }
}
