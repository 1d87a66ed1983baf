//! Checkpoint discipline
//!
//! Every unit of work ends here: staged catalog writes are committed, the
//! periodic status digest goes out if one is due, and only then is the
//! termination request consulted.

use crate::catalog::Catalog;
use crate::notify::Notifier;
use crate::output::stats::load_statistics;
use crate::RipperError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What the caller should do after a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Checkpoint {
    cancel: CancellationToken,
    notifier: Notifier,
    status_interval: Duration,
    last_status: Instant,
    committed_units: u64,
}

impl Checkpoint {
    pub fn new(cancel: CancellationToken, notifier: Notifier, status_interval: Duration) -> Self {
        Self {
            cancel,
            notifier,
            status_interval,
            last_status: Instant::now(),
            committed_units: 0,
        }
    }

    /// Commits the unit of work just finished
    ///
    /// Returns `Flow::Stop` if termination was requested at any point before
    /// this call returned.
    pub fn commit<C: Catalog + ?Sized>(&mut self, catalog: &mut C) -> Result<Flow, RipperError> {
        catalog.commit()?;
        self.committed_units += 1;

        if self.last_status.elapsed() >= self.status_interval {
            self.send_status(catalog);
            self.last_status = Instant::now();
        }

        if self.cancel.is_cancelled() {
            tracing::info!(
                "Termination requested; stopping after {} checkpoint(s)",
                self.committed_units
            );
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn send_status<C: Catalog + ?Sized>(&self, catalog: &C) {
        match load_statistics(catalog) {
            Ok(stats) => self.notifier.notify(
                &format!(
                    "Crawl status: {}/{} pieces scraped",
                    stats.pieces_scraped, stats.pieces
                ),
                &stats.to_string(),
            ),
            Err(e) => tracing::warn!("Failed to gather status digest: {}", e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn committed_units(&self) -> u64 {
        self.committed_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{NewComposer, SqliteCatalog, Tally};
    use crate::notify::{NotificationSink, NotifyError};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<String>>>);

    impl NotificationSink for Recording {
        fn send(&self, _: &str, subject: &str, _: &str) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    fn stage(catalog: &mut SqliteCatalog, url: &str) {
        catalog
            .stage_composer(NewComposer {
                name: url.to_string(),
                url: url.to_string(),
            })
            .unwrap();
    }

    #[test]
    fn test_commit_then_cancellation() {
        let token = CancellationToken::new();
        let mut checkpoint =
            Checkpoint::new(token.clone(), Notifier::log_only(), Duration::from_secs(3600));
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();

        stage(&mut catalog, "/c/a");
        assert_eq!(checkpoint.commit(&mut catalog).unwrap(), Flow::Continue);

        stage(&mut catalog, "/c/b");
        token.cancel();
        assert_eq!(checkpoint.commit(&mut catalog).unwrap(), Flow::Stop);

        // The unit in flight when cancellation arrived is still committed
        assert_eq!(catalog.count(Tally::Composers).unwrap(), 2);
        assert_eq!(checkpoint.committed_units(), 2);
    }

    #[test]
    fn test_status_digest_when_due() {
        let recording = Recording::default();
        let notifier = Notifier::new(Box::new(recording.clone()), None);
        let mut checkpoint = Checkpoint::new(CancellationToken::new(), notifier, Duration::ZERO);
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();

        checkpoint.commit(&mut catalog).unwrap();

        let sent = recording.0.lock().unwrap();
        assert_eq!(sent.as_slice(), &["Crawl status: 0/0 pieces scraped".to_string()]);
    }

    #[test]
    fn test_no_digest_before_interval() {
        let recording = Recording::default();
        let notifier = Notifier::new(Box::new(recording.clone()), None);
        let mut checkpoint = Checkpoint::new(
            CancellationToken::new(),
            notifier,
            Duration::from_secs(24 * 3600),
        );
        let mut catalog = SqliteCatalog::new_in_memory().unwrap();

        checkpoint.commit(&mut catalog).unwrap();
        assert!(recording.0.lock().unwrap().is_empty());
    }
}
