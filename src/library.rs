//! The photo library: content store, metadata and ordering indices under
//! one mutation discipline, with a short-lived listing cache and a
//! payload-free change signal for UI and web collaborators.

use crate::content_store::{ContentStore, StoreError};
use crate::identity::ContentIdentity;
use crate::metadata_store::{ImageRecord, MetadataError, MetadataStore, MetadataTable};
use crate::order_index::{IndexError, OrderIndex, OrderPolicy};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::{info, warn};

/// Errors surfaced by library operations.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// One row of the cached listing exposed to web/UI collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct ListingEntry {
    pub identity: ContentIdentity,
    /// Artifact file name (`<hex>.jpg`), handy for URL construction.
    pub artifact_name: String,
    pub source_label: String,
    pub display_date: DateTime<Utc>,
}

/// The library owns every persisted structure and is the single place
/// mutations flow through, so cache invalidation and change signalling
/// cannot be forgotten by a caller.
pub struct PhotoLibrary {
    content: ContentStore,
    metadata: MetadataStore,
    recency: OrderIndex,
    captured: OrderIndex,
    random: OrderIndex,
    /// Serializes read-modify-write cycles on the metadata table and the
    /// index files across the batch worker and out-of-band removals.
    mutate: Mutex<()>,
    listing: Mutex<Option<(Instant, Vec<ListingEntry>)>>,
    listing_ttl: Duration,
    changes: watch::Sender<u64>,
}

impl PhotoLibrary {
    /// Assemble the library from its stores. `playlist_dir` holds the three
    /// index files.
    pub fn new(
        content: ContentStore,
        metadata: MetadataStore,
        playlist_dir: PathBuf,
        listing_ttl: Duration,
    ) -> Self {
        let (changes, _) = watch::channel(0);

        Self {
            content,
            metadata,
            recency: OrderIndex::new(&playlist_dir, OrderPolicy::Recency),
            captured: OrderIndex::new(&playlist_dir, OrderPolicy::CapturedTime),
            random: OrderIndex::new(&playlist_dir, OrderPolicy::Random),
            mutate: Mutex::new(()),
            listing: Mutex::new(None),
            listing_ttl,
            changes,
        }
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }

    fn index(&self, policy: OrderPolicy) -> &OrderIndex {
        match policy {
            OrderPolicy::Recency => &self.recency,
            OrderPolicy::CapturedTime => &self.captured,
            OrderPolicy::Random => &self.random,
        }
    }

    /// Subscribe to the change signal. The value is a generation counter
    /// with no further payload; consumers re-query on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Generation counter of the latest settled mutation.
    pub fn generation(&self) -> u64 {
        *self.changes.borrow()
    }

    fn notify_change(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    fn invalidate_listing(&self) {
        *self.listing.lock() = None;
    }

    /// Sort key for one identity under a policy, in seconds since the
    /// epoch. Recency keys off the artifact's last-write time; captured
    /// time keys off the record's display date, falling back to the
    /// artifact time when no record exists.
    fn sort_key(&self, policy: OrderPolicy, identity: &ContentIdentity, table: &MetadataTable) -> f64 {
        let transfer_time = self.artifact_mtime_secs(identity);
        match policy {
            OrderPolicy::Recency | OrderPolicy::Random => transfer_time,
            OrderPolicy::CapturedTime => table
                .get(identity)
                .map(|record| record.display_date.timestamp() as f64)
                .unwrap_or(transfer_time),
        }
    }

    fn artifact_mtime_secs(&self, identity: &ContentIdentity) -> f64 {
        self.content
            .modified_at(identity)
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Apply a settled ingestion batch: one metadata write, one write per
    /// index, then cache invalidation and a single change signal.
    pub fn apply_batch(
        &self,
        batch: Vec<(ContentIdentity, ImageRecord)>,
    ) -> Result<(), LibraryError> {
        if batch.is_empty() {
            return Ok(());
        }

        {
            let _guard = self.mutate.lock();

            let mut table = self.metadata.load_all()?;
            for (identity, record) in &batch {
                table.insert(*identity, record.clone());
            }
            self.metadata.save_all(&table)?;

            for policy in OrderPolicy::ALL {
                let items: Vec<(ContentIdentity, f64)> = batch
                    .iter()
                    .map(|(identity, _)| (*identity, self.sort_key(policy, identity, &table)))
                    .collect();
                self.index(policy).insert_many(&items)?;
            }
        }

        self.invalidate_listing();
        self.notify_change();
        Ok(())
    }

    /// Load the playlist for a policy.
    ///
    /// A missing or corrupt index file is rebuilt transparently, so callers
    /// never observe a broken ordering; the worst case is a rebuild-induced
    /// reorder.
    pub fn playlist(&self, policy: OrderPolicy) -> Result<Vec<ContentIdentity>, LibraryError> {
        match self.index(policy).try_load() {
            Ok(identities) => Ok(identities),
            Err(IndexError::Missing(_)) => {
                info!(policy = %policy, "index missing, rebuilding");
                self.rebuild(policy)
            }
            Err(IndexError::Corrupt(path)) => {
                warn!(policy = %policy, path = %path.display(), "index corrupt, rebuilding");
                self.rebuild(policy)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuild one policy's index from the artifacts currently on disk.
    pub fn rebuild(&self, policy: OrderPolicy) -> Result<Vec<ContentIdentity>, LibraryError> {
        let _guard = self.mutate.lock();

        let table = self.metadata.load_all()?;
        let items: Vec<(ContentIdentity, f64)> = self
            .content
            .known_identities()?
            .into_iter()
            .map(|identity| {
                let key = self.sort_key(policy, &identity, &table);
                (identity, key)
            })
            .collect();

        Ok(self.index(policy).rebuild(items)?)
    }

    /// Rebuild every index (policy change, bulk import, recovery) and fire
    /// one change signal.
    pub fn rebuild_all(&self) -> Result<(), LibraryError> {
        for policy in OrderPolicy::ALL {
            self.rebuild(policy)?;
        }
        self.invalidate_listing();
        self.notify_change();
        Ok(())
    }

    /// Remove an identity everywhere: artifact, metadata record and all
    /// three indices. Returns `false` when nothing was stored under the
    /// identity — absence is a routine outcome, not an error.
    pub fn remove(&self, identity: &ContentIdentity) -> Result<bool, LibraryError> {
        let removed = {
            let _guard = self.mutate.lock();

            let artifact = self.content.remove(identity)?;
            let record = self.metadata.remove(identity)?;
            let mut index_hit = false;
            for policy in OrderPolicy::ALL {
                index_hit |= self.index(policy).remove(identity)?;
            }
            artifact || record || index_hit
        };

        if removed {
            self.invalidate_listing();
            self.notify_change();
            info!(identity = %identity, "image removed");
        }
        Ok(removed)
    }

    /// Artifact path for an identity, if the artifact exists.
    pub fn artifact(&self, identity: &ContentIdentity) -> Option<PathBuf> {
        self.content.existing_artifact(identity)
    }

    /// Metadata record for an identity, or `None` if unknown.
    pub fn record(&self, identity: &ContentIdentity) -> Result<Option<ImageRecord>, LibraryError> {
        Ok(self.metadata.get(identity)?)
    }

    /// Recency-sorted listing for web/UI collaborators.
    ///
    /// Cached for a short TTL and invalidated wholesale on any mutation — a
    /// correctness-over-performance choice that fits the low write rate.
    pub fn list_images(&self) -> Result<Vec<ListingEntry>, LibraryError> {
        {
            let cached = self.listing.lock();
            if let Some((at, entries)) = cached.as_ref() {
                if at.elapsed() < self.listing_ttl {
                    return Ok(entries.clone());
                }
            }
        }

        let table = self.metadata.load_all()?;
        let mut keyed: Vec<(f64, ListingEntry)> = self
            .content
            .known_identities()?
            .into_iter()
            .map(|identity| {
                let record = table.get(&identity);
                let entry = ListingEntry {
                    identity,
                    artifact_name: format!("{}.jpg", identity.to_hex()),
                    source_label: record.map(|r| r.source_label.clone()).unwrap_or_default(),
                    display_date: record
                        .map(|r| r.display_date)
                        .unwrap_or_else(|| DateTime::<Utc>::from(UNIX_EPOCH)),
                };
                (self.artifact_mtime_secs(&identity), entry)
            })
            .collect();
        keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let entries: Vec<ListingEntry> = keyed.into_iter().map(|(_, entry)| entry).collect();
        *self.listing.lock() = Some((Instant::now(), entries.clone()));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureAttributes;
    use chrono::TimeZone;
    use std::io::Cursor;
    use std::thread::sleep;
    use tempfile::TempDir;

    fn create_test_library(dir: &TempDir) -> PhotoLibrary {
        let content = ContentStore::new(dir.path().join("artifacts"), 32, 24, 85).unwrap();
        let metadata = MetadataStore::new(dir.path().join("artifacts").join("metadata.json"));
        PhotoLibrary::new(
            content,
            metadata,
            dir.path().join("playlists"),
            Duration::from_secs(5),
        )
    }

    fn sample_image_bytes(seed: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(48, 48, image::Rgb([seed, seed / 2, 255 - seed]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn record_with_date(label: &str, date: DateTime<Utc>) -> ImageRecord {
        ImageRecord::new(
            label,
            "",
            date,
            CaptureAttributes {
                captured_at: Some(date),
                ..Default::default()
            },
        )
    }

    /// Materialize `n` distinct images with strictly increasing mtimes and
    /// apply them as one batch.
    fn ingest_images(library: &PhotoLibrary, n: u8) -> Vec<ContentIdentity> {
        let mut batch = Vec::new();
        for i in 0..n {
            let bytes = sample_image_bytes(i);
            let materialized = library.content_store().materialize(&bytes).unwrap();
            batch.push((
                materialized.identity,
                ImageRecord::new(
                    format!("img-{i}.png"),
                    "",
                    Utc::now(),
                    CaptureAttributes::default(),
                ),
            ));
            sleep(Duration::from_millis(30));
        }
        let identities = batch.iter().map(|(id, _)| *id).collect();
        library.apply_batch(batch).unwrap();
        identities
    }

    #[test]
    fn test_recency_playlist_newest_first() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);

        let ids = ingest_images(&library, 3);
        let playlist = library.playlist(OrderPolicy::Recency).unwrap();

        // Written later sorts earlier.
        assert_eq!(playlist, vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn test_captured_time_playlist_uses_display_date() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);

        let old = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        // Ingested oldest-capture last: capture date must win over mtime.
        let a = library
            .content_store()
            .materialize(&sample_image_bytes(1))
            .unwrap();
        let b = library
            .content_store()
            .materialize(&sample_image_bytes(2))
            .unwrap();
        library
            .apply_batch(vec![
                (a.identity, record_with_date("new.jpg", new)),
                (b.identity, record_with_date("old.jpg", old)),
            ])
            .unwrap();

        let playlist = library.playlist(OrderPolicy::CapturedTime).unwrap();
        assert_eq!(playlist, vec![a.identity, b.identity]);
    }

    #[test]
    fn test_playlist_self_heals_missing_index() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);
        let ids = ingest_images(&library, 3);

        // Wipe the persisted index out from under the library.
        std::fs::remove_file(dir.path().join("playlists").join("playlist_recency.json"))
            .unwrap();

        let playlist = library.playlist(OrderPolicy::Recency).unwrap();
        assert_eq!(playlist, vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn test_playlist_self_heals_corrupt_index() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);
        let ids = ingest_images(&library, 2);

        std::fs::write(
            dir.path().join("playlists").join("playlist_recency.json"),
            b"][ definitely broken",
        )
        .unwrap();

        let playlist = library.playlist(OrderPolicy::Recency).unwrap();
        assert_eq!(playlist.len(), ids.len());
    }

    #[test]
    fn test_remove_clears_every_structure() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);
        let ids = ingest_images(&library, 2);

        assert!(library.remove(&ids[0]).unwrap());

        assert!(library.artifact(&ids[0]).is_none());
        assert!(library.record(&ids[0]).unwrap().is_none());
        for policy in OrderPolicy::ALL {
            assert_eq!(library.playlist(policy).unwrap(), vec![ids[1]]);
        }

        // Removing again, or removing an unknown identity, is a no-op.
        assert!(!library.remove(&ids[0]).unwrap());
        assert!(!library.remove(&ContentIdentity::digest(b"ghost")).unwrap());
    }

    #[test]
    fn test_change_signal_fires_once_per_batch_and_removal() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);
        let rx = library.subscribe();

        let ids = ingest_images(&library, 3);
        assert_eq!(*rx.borrow(), 1);

        library.remove(&ids[0]).unwrap();
        assert_eq!(*rx.borrow(), 2);

        // An effect-free removal does not signal.
        library.remove(&ids[0]).unwrap();
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn test_listing_sorted_by_recency_and_invalidated_on_remove() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);
        let ids = ingest_images(&library, 3);

        let listing = library.list_images().unwrap();
        assert_eq!(listing.len(), 3);
        assert_eq!(listing[0].identity, ids[2]);
        assert_eq!(listing[0].source_label, "img-2.png");

        // Cache serves the same answer until a mutation invalidates it.
        assert_eq!(library.list_images().unwrap().len(), 3);
        library.remove(&ids[2]).unwrap();
        let listing = library.list_images().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].identity, ids[1]);
    }

    #[test]
    fn test_random_playlist_membership_matches_store() {
        let dir = TempDir::new().unwrap();
        let library = create_test_library(&dir);
        let ids = ingest_images(&library, 4);

        let mut playlist = library.playlist(OrderPolicy::Random).unwrap();
        playlist.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(playlist, expected);
    }
}
