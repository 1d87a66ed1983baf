//! Crawl pipeline
//!
//! This module contains the resumable crawl stages, including:
//! - Composer seeding and expansion into pieces and scores
//! - File downloads, catalog-driven or from an explicit list
//! - Commit-then-checkpoint handling of termination requests
//! - The downloaded-items ledger and download path derivation

mod checkpoint;
mod download;
mod ledger;
mod orchestrator;
pub mod paths;

pub use checkpoint::{Checkpoint, Flow};
pub use download::{load_url_list, Sidecar, SidecarScore, SIDECAR_FILE};
pub use ledger::DownloadLedger;
pub use orchestrator::{CrawlOrchestrator, RunOutcome};
