//! Content-addressed store of display-ready artifacts.
//!
//! Incoming images are keyed by the digest of their raw bytes and transcoded
//! once into a display-sized JPEG named `<hex>.jpg`. Materialization is
//! idempotent: a second submission with identical bytes finds the existing
//! artifact and performs no decode or encode work at all.

use crate::capture;
use crate::identity::ContentIdentity;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File extensions accepted for submission (lowercase, without dot).
const SUPPORTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];

/// Errors raised while materializing or removing artifacts.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Source bytes are not a decodable image. Never retried; the caller
    /// decides disposition (skip and log).
    #[error("failed to decode image: {0}")]
    Decode(image::ImageError),

    #[error("failed to encode artifact: {0}")]
    Encode(image::ImageError),

    #[error("artifact storage failed: {0}")]
    Storage(#[from] std::io::Error),
}

/// Result of a materialization.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// Content identity of the submitted bytes.
    pub identity: ContentIdentity,
    /// Path of the display-ready artifact.
    pub path: PathBuf,
    /// Whether this call performed the transcode (`false` = already present).
    pub created: bool,
}

/// Content-addressed store of display-ready artifacts.
pub struct ContentStore {
    artifact_dir: PathBuf,
    target_width: u32,
    target_height: u32,
    quality: u8,
}

impl ContentStore {
    /// Create a store rooted at `artifact_dir`, creating the directory if
    /// it does not exist yet.
    pub fn new(
        artifact_dir: impl Into<PathBuf>,
        target_width: u32,
        target_height: u32,
        quality: u8,
    ) -> Result<Self, StoreError> {
        let artifact_dir = artifact_dir.into();
        fs::create_dir_all(&artifact_dir)?;

        Ok(Self {
            artifact_dir,
            target_width,
            target_height,
            quality,
        })
    }

    /// Whether a file name carries a supported image extension.
    pub fn is_supported(name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Artifact path for an identity, whether or not the artifact exists.
    pub fn artifact_path(&self, identity: &ContentIdentity) -> PathBuf {
        self.artifact_dir.join(format!("{}.jpg", identity.to_hex()))
    }

    /// Artifact path if the artifact currently exists on disk.
    pub fn existing_artifact(&self, identity: &ContentIdentity) -> Option<PathBuf> {
        let path = self.artifact_path(identity);
        path.exists().then_some(path)
    }

    /// Last-write time of an identity's artifact.
    pub fn modified_at(&self, identity: &ContentIdentity) -> Option<SystemTime> {
        fs::metadata(self.artifact_path(identity))
            .and_then(|meta| meta.modified())
            .ok()
    }

    /// Materialize raw bytes into a display-ready artifact.
    ///
    /// Decodes, corrects EXIF orientation, scales to cover the configured
    /// footprint (center-cropping when the aspect ratio differs), converts
    /// to RGB and encodes a JPEG at the configured quality.
    pub fn materialize(&self, bytes: &[u8]) -> Result<Materialized, StoreError> {
        let identity = ContentIdentity::digest(bytes);
        let path = self.artifact_path(&identity);

        if path.exists() {
            debug!(identity = %identity, "artifact already present, skipping transcode");
            return Ok(Materialized {
                identity,
                path,
                created: false,
            });
        }

        let decoded = image::load_from_memory(bytes).map_err(StoreError::Decode)?;
        let oriented = apply_orientation(decoded, capture::orientation(bytes));
        let sized = oriented.resize_to_fill(self.target_width, self.target_height, FilterType::Lanczos3);
        let rgb = sized.to_rgb8();

        // Write under a temp name first so concurrent readers never observe
        // a partially written artifact.
        let tmp = path.with_extension("jpg.tmp");
        let file = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        let encoder = JpegEncoder::new_with_quality(&mut writer, self.quality);
        if let Err(e) = rgb.write_with_encoder(encoder) {
            drop(writer);
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Encode(e));
        }
        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &path)?;

        info!(
            identity = %identity,
            width = self.target_width,
            height = self.target_height,
            "artifact created"
        );

        Ok(Materialized {
            identity,
            path,
            created: true,
        })
    }

    /// Remove an identity's artifact. Returns `false` if it did not exist.
    pub fn remove(&self, identity: &ContentIdentity) -> Result<bool, StoreError> {
        match fs::remove_file(self.artifact_path(identity)) {
            Ok(()) => {
                info!(identity = %identity, "artifact removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Storage(e)),
        }
    }

    /// Enumerate identities that currently have an artifact on disk.
    pub fn known_identities(&self) -> Result<Vec<ContentIdentity>, StoreError> {
        let mut identities = Vec::new();

        for entry in fs::read_dir(&self.artifact_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jpg") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match stem.parse::<ContentIdentity>() {
                Ok(identity) => identities.push(identity),
                Err(_) => {
                    warn!(file = %path.display(), "ignoring artifact with non-identity name");
                }
            }
        }

        Ok(identities)
    }
}

/// Rotate a decoded image according to its EXIF orientation tag. Mirrored
/// orientations (2, 4, 5, 7) are rare in practice and left untouched.
fn apply_orientation(img: DynamicImage, orientation: Option<u32>) -> DynamicImage {
    match orientation {
        Some(3) => img.rotate180(),
        Some(6) => img.rotate90(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn create_test_store(dir: &TempDir) -> ContentStore {
        ContentStore::new(dir.path().join("artifacts"), 64, 48, 85).unwrap()
    }

    fn sample_image_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb(color));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_materialize_creates_artifact_at_target_footprint() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        let result = store.materialize(&sample_image_bytes(640, 480, [200, 10, 10])).unwrap();
        assert!(result.created);
        assert!(result.path.exists());

        let artifact = image::open(&result.path).unwrap();
        assert_eq!(artifact.width(), 64);
        assert_eq!(artifact.height(), 48);
    }

    #[test]
    fn test_materialize_crops_mismatched_aspect_ratio() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        // A tall portrait still produces an exact 64x48 artifact.
        let result = store.materialize(&sample_image_bytes(100, 400, [0, 100, 0])).unwrap();
        let artifact = image::open(&result.path).unwrap();
        assert_eq!((artifact.width(), artifact.height()), (64, 48));
    }

    #[test]
    fn test_materialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        let bytes = sample_image_bytes(320, 240, [1, 2, 3]);

        let first = store.materialize(&bytes).unwrap();
        let second = store.materialize(&bytes).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.identity, second.identity);
        assert_eq!(first.path, second.path);

        // Exactly one artifact on disk.
        assert_eq!(store.known_identities().unwrap().len(), 1);
    }

    #[test]
    fn test_materialize_rejects_corrupt_bytes() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        let result = store.materialize(b"not an image at all");
        assert!(matches!(result, Err(StoreError::Decode(_))));
        assert!(store.known_identities().unwrap().is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        let bytes = sample_image_bytes(32, 32, [9, 9, 9]);
        let materialized = store.materialize(&bytes).unwrap();

        assert!(store.remove(&materialized.identity).unwrap());
        assert!(!store.remove(&materialized.identity).unwrap());

        // Removing an identity that never existed is also a no-op.
        let unknown = ContentIdentity::digest(b"never stored");
        assert!(!store.remove(&unknown).unwrap());
    }

    #[test]
    fn test_known_identities_skips_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);

        store.materialize(&sample_image_bytes(32, 32, [5, 5, 5])).unwrap();
        std::fs::write(dir.path().join("artifacts").join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("artifacts").join("stray.jpg"), b"x").unwrap();

        assert_eq!(store.known_identities().unwrap().len(), 1);
    }

    #[test]
    fn test_is_supported() {
        assert!(ContentStore::is_supported("beach.jpg"));
        assert!(ContentStore::is_supported("BEACH.JPEG"));
        assert!(ContentStore::is_supported("snow.png"));
        assert!(ContentStore::is_supported("clip.webp"));
        assert!(!ContentStore::is_supported("movie.mp4"));
        assert!(!ContentStore::is_supported("no_extension"));
    }

    #[test]
    fn test_modified_at_absent_for_unknown_identity() {
        let dir = TempDir::new().unwrap();
        let store = create_test_store(&dir);
        assert!(store.modified_at(&ContentIdentity::digest(b"ghost")).is_none());
    }
}
