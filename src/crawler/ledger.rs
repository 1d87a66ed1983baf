//! Downloaded-items ledger
//!
//! A JSON array of piece URLs whose files are fully on disk. It is read once
//! when a download stage starts and rewritten after every completed item.

use crate::RipperError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct DownloadLedger {
    path: PathBuf,
    entries: Vec<String>,
    index: HashSet<String>,
}

impl DownloadLedger {
    /// Loads the ledger, starting empty when the file does not exist yet
    pub fn load(path: &Path) -> Result<Self, RipperError> {
        let entries: Vec<String> = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let index = entries.iter().cloned().collect();
        tracing::info!(
            "Loaded {} downloaded item(s) from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            index,
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an identifier and rewrites the file
    ///
    /// Recording an identifier already present is a no-op.
    pub fn record(&mut self, id: &str) -> Result<(), RipperError> {
        if !self.index.insert(id.to_string()) {
            return Ok(());
        }
        self.entries.push(id.to_string());
        self.save()
    }

    /// Writes the ledger to a temporary file, then renames it into place
    fn save(&self) -> Result<(), RipperError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, serde_json::to_string_pretty(&self.entries)?)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = DownloadLedger::load(&dir.path().join("downloaded.json")).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_record_persists_and_dedupes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloaded.json");

        let mut ledger = DownloadLedger::load(&path).unwrap();
        ledger.record("/wiki/index.php/Ave_Maria").unwrap();
        ledger.record("/wiki/index.php/Gloria").unwrap();
        ledger.record("/wiki/index.php/Ave_Maria").unwrap();

        let reloaded = DownloadLedger::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("/wiki/index.php/Gloria"));

        let raw: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, vec!["/wiki/index.php/Ave_Maria", "/wiki/index.php/Gloria"]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloaded.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            DownloadLedger::load(&path),
            Err(RipperError::Json(_))
        ));
    }
}
