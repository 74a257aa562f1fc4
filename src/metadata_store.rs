//! Metadata records keyed by content identity.
//!
//! The store is a single JSON table read and written as a whole. Batch
//! callers load once, mutate in memory and persist once, so a burst of
//! uploads costs one read and one write regardless of batch size.

use crate::capture::CaptureAttributes;
use crate::identity::ContentIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Descriptive record for one stored image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Who submitted the image: the upload filename or email attachment
    /// name handed in as the submission's source label.
    pub source_label: String,

    /// Free-form subject line, possibly empty (email ingestion path).
    #[serde(default)]
    pub subject: String,

    /// Date used for captured-time ordering and captions: the embedded
    /// capture timestamp when available, otherwise the receipt time.
    pub display_date: DateTime<Utc>,

    /// Raw capture attributes extracted from the image.
    #[serde(default)]
    pub capture: CaptureAttributes,
}

impl ImageRecord {
    /// Build a record from submission context and extracted attributes.
    pub fn new(
        source_label: impl Into<String>,
        subject: impl Into<String>,
        received_at: DateTime<Utc>,
        capture: CaptureAttributes,
    ) -> Self {
        let display_date = capture.captured_at.unwrap_or(received_at);

        Self {
            source_label: source_label.into(),
            subject: subject.into(),
            display_date,
            capture,
        }
    }
}

/// The full table, keyed by content identity.
pub type MetadataTable = HashMap<ContentIdentity, ImageRecord>;

/// Errors raised by metadata persistence.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata table i/o failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("metadata table serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON-file-backed metadata store.
///
/// Writers must hold the library's mutation lock; the table itself is a
/// single read-modify-write unit with no partial visibility.
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    /// Create a store persisting to `path`. Nothing is written until the
    /// first record arrives.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the whole table.
    ///
    /// A missing file is an empty table. An unreadable table is logged and
    /// treated as empty rather than blocking ingestion; records are
    /// repopulated as images are re-submitted.
    pub fn load_all(&self) -> Result<MetadataTable, MetadataError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MetadataTable::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&raw) {
            Ok(table) => Ok(table),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "metadata table unreadable, starting empty"
                );
                Ok(MetadataTable::new())
            }
        }
    }

    /// Persist the whole table atomically.
    pub fn save_all(&self, table: &MetadataTable) -> Result<(), MetadataError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(table)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Insert or overwrite one record unconditionally (last writer wins).
    pub fn upsert(&self, identity: ContentIdentity, record: ImageRecord) -> Result<(), MetadataError> {
        let mut table = self.load_all()?;
        table.insert(identity, record);
        self.save_all(&table)
    }

    /// Remove a record. Removing an absent identity is a no-op, not an
    /// error; returns whether a record was actually removed.
    pub fn remove(&self, identity: &ContentIdentity) -> Result<bool, MetadataError> {
        let mut table = self.load_all()?;
        let removed = table.remove(identity).is_some();
        if removed {
            self.save_all(&table)?;
        }
        Ok(removed)
    }

    /// Fetch one record, or `None` if the identity is unknown.
    pub fn get(&self, identity: &ContentIdentity) -> Result<Option<ImageRecord>, MetadataError> {
        Ok(self.load_all()?.get(identity).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn create_test_store(dir: &TempDir) -> MetadataStore {
        MetadataStore::new(dir.path().join("metadata.json"))
    }

    fn create_test_record(label: &str) -> ImageRecord {
        ImageRecord::new(
            label,
            "",
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            CaptureAttributes::default(),
        )
    }

    #[test]
    fn test_missing_file_is_empty_table() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let identity = ContentIdentity::digest(b"photo");

        store.upsert(identity, create_test_record("alice.jpg")).unwrap();

        let record = store.get(&identity).unwrap().unwrap();
        assert_eq!(record.source_label, "alice.jpg");
    }

    #[test]
    fn test_upsert_overwrites_last_writer_wins() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let identity = ContentIdentity::digest(b"photo");

        store.upsert(identity, create_test_record("first.jpg")).unwrap();
        store.upsert(identity, create_test_record("second.jpg")).unwrap();

        let table = store.load_all().unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[&identity].source_label, "second.jpg");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let identity = ContentIdentity::digest(b"photo");

        store.upsert(identity, create_test_record("gone.jpg")).unwrap();

        assert!(store.remove(&identity).unwrap());
        assert!(!store.remove(&identity).unwrap());
        assert!(store.get(&identity).unwrap().is_none());

        // Never-inserted identity: also a no-op.
        assert!(!store.remove(&ContentIdentity::digest(b"other")).unwrap());
    }

    #[test]
    fn test_corrupt_table_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(&path, b"{ this is not json").unwrap();

        let store = MetadataStore::new(&path);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_display_date_prefers_capture_timestamp() {
        let received = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let captured = Utc.with_ymd_and_hms(2019, 8, 20, 9, 30, 0).unwrap();

        let with_capture = ImageRecord::new(
            "a.jpg",
            "",
            received,
            CaptureAttributes {
                captured_at: Some(captured),
                ..Default::default()
            },
        );
        assert_eq!(with_capture.display_date, captured);

        let without_capture =
            ImageRecord::new("b.jpg", "", received, CaptureAttributes::default());
        assert_eq!(without_capture.display_date, received);
    }
}
