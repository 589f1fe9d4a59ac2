//! Portable JSON export and import.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NewEntry, ResultStore, StoreEntry, StoreError};

/// Current export format version.
pub const EXPORT_VERSION: u32 = 1;

/// Exported store contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreExport {
    pub version: u32,
    pub tag: String,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<StoreEntry>,
}

impl ResultStore {
    /// Snapshot every entry, best first.
    pub fn export(&self) -> Result<StoreExport, StoreError> {
        let entries = self.query(&Default::default())?;
        Ok(StoreExport {
            version: EXPORT_VERSION,
            tag: self.tag.clone(),
            exported_at: Utc::now(),
            entries,
        })
    }

    /// Write an export to a JSON file.
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> Result<usize, StoreError> {
        let export = self.export()?;
        let json = serde_json::to_string_pretty(&export)?;
        fs::write(path.as_ref(), json)?;
        log::info!(
            "Exported {} entries to {}",
            export.entries.len(),
            path.as_ref().display()
        );
        Ok(export.entries.len())
    }

    /// Insert every exported entry through the normal insert path.
    ///
    /// Returns `(inserted, updated)`.
    pub fn import(&self, export: &StoreExport) -> Result<(u64, u64), StoreError> {
        if export.version > EXPORT_VERSION {
            return Err(StoreError::UnsupportedVersion(export.version));
        }

        let mut inserted = 0;
        let mut updated = 0;
        for entry in &export.entries {
            let new = NewEntry {
                cards: entry.cards.clone(),
                score: entry.score.clone(),
                strategy: entry.strategy,
                evaluated_at: entry.evaluated_at,
                evaluation_version: entry.evaluation_version.clone(),
            };
            match self.insert(&new)? {
                (_, true) => inserted += 1,
                (_, false) => updated += 1,
            }
        }
        Ok((inserted, updated))
    }

    /// Read an export file and import it.
    pub fn import_from<P: AsRef<Path>>(&self, path: P) -> Result<(u64, u64), StoreError> {
        let content = fs::read_to_string(path)?;
        let export: StoreExport = serde_json::from_str(&content)?;
        self.import(&export)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::scored;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_export_import_between_stores() {
        let dir = tempdir().unwrap();
        let source = ResultStore::open(dir.path().join("a.db"), "A").unwrap();
        source.insert(&scored("x", 6.0, "cycle")).unwrap();
        source.insert(&scored("y", 8.0, "siege")).unwrap();

        let file = dir.path().join("export.json");
        assert_eq!(source.export_to(&file).unwrap(), 2);

        let target = ResultStore::open(dir.path().join("b.db"), "B").unwrap();
        target.insert(&scored("x", 1.0, "cycle")).unwrap();
        assert_eq!(target.import_from(&file).unwrap(), (1, 1));
        assert_eq!(target.count().unwrap(), 2);

        let top = target.top_n(1).unwrap();
        assert_eq!(top[0].score.overall, 8.0);
        assert_eq!(top[0].tag, "B");
        // the existing entry was updated with the imported score
        let x = target.by_archetype("cycle", 1).unwrap();
        assert_eq!(x[0].score.overall, 6.0);
    }

    #[test]
    fn test_import_rejects_newer_format() {
        let dir = tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("a.db"), "A").unwrap();
        let export = StoreExport {
            version: EXPORT_VERSION + 1,
            tag: "A".into(),
            exported_at: Utc::now(),
            entries: vec![],
        };
        assert!(matches!(
            store.import(&export),
            Err(StoreError::UnsupportedVersion(_))
        ));
    }
}
