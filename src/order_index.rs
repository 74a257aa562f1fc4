//! Persisted ordering indices ("playlists"), one per ordering policy.
//!
//! Each index is an independent JSON file holding `{identity, sort_key}`
//! pairs. Indices need not agree with each other during a batch, but every
//! settled state holds exactly one entry per stored identity in each index.

use crate::identity::ContentIdentity;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Ordering policy for a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPolicy {
    /// Most recently transferred first (artifact last-write time).
    Recency,
    /// Capture timestamp descending, falling back to transfer time.
    CapturedTime,
    /// Shuffled order; reshuffled only on rebuild, appended to on insert.
    Random,
}

impl OrderPolicy {
    /// All policies, in the order their indices are maintained.
    pub const ALL: [OrderPolicy; 3] = [Self::Recency, Self::CapturedTime, Self::Random];

    /// Stable name used in index file names and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recency => "recency",
            Self::CapturedTime => "captured_time",
            Self::Random => "random",
        }
    }
}

impl std::fmt::Display for OrderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a policy name from configuration.
#[derive(Debug, Error)]
#[error("unknown order policy: {0:?}")]
pub struct UnknownPolicyError(String);

impl std::str::FromStr for OrderPolicy {
    type Err = UnknownPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recency" => Ok(Self::Recency),
            "captured_time" => Ok(Self::CapturedTime),
            "random" => Ok(Self::Random),
            other => Err(UnknownPolicyError(other.to_string())),
        }
    }
}

/// One persisted playlist entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEntry {
    pub identity: ContentIdentity,
    pub sort_key: f64,
}

/// Errors raised by index persistence.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No persisted index yet. The library reacts by rebuilding.
    #[error("index file missing: {0}")]
    Missing(PathBuf),

    /// Persisted index unreadable or malformed. The library reacts by
    /// rebuilding, so callers never observe a permanently broken order.
    #[error("index file corrupt: {0}")]
    Corrupt(PathBuf),

    #[error("index i/o failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("index serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A persisted, totally-ordered (or shuffled) list of content identities
/// for one ordering policy.
pub struct OrderIndex {
    policy: OrderPolicy,
    path: PathBuf,
}

impl OrderIndex {
    /// Create the index for `policy`, persisted under `playlist_dir`.
    pub fn new(playlist_dir: &Path, policy: OrderPolicy) -> Self {
        Self {
            policy,
            path: playlist_dir.join(format!("playlist_{}.json", policy.as_str())),
        }
    }

    pub fn policy(&self) -> OrderPolicy {
        self.policy
    }

    /// File the index is persisted to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted identity list, in playback order.
    pub fn try_load(&self) -> Result<Vec<ContentIdentity>, IndexError> {
        Ok(self
            .load_entries()?
            .into_iter()
            .map(|entry| entry.identity)
            .collect())
    }

    fn load_entries(&self) -> Result<Vec<OrderEntry>, IndexError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::Missing(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw).map_err(|_| IndexError::Corrupt(self.path.clone()))
    }

    /// Entries currently persisted, or empty when the file is absent or
    /// corrupt. Used when staging inserts before the first rebuild.
    fn entries_or_empty(&self) -> Vec<OrderEntry> {
        self.load_entries().unwrap_or_default()
    }

    /// Insert one identity with its sort key. Inserting an identity that is
    /// already present is a no-op.
    pub fn insert(&self, identity: ContentIdentity, sort_key: f64) -> Result<(), IndexError> {
        self.insert_many(&[(identity, sort_key)])
    }

    /// Insert a batch of identities in one read-modify-write cycle.
    ///
    /// Non-random policies re-sort the whole list descending by sort key;
    /// the random policy only appends, keeping its order stable until the
    /// next rebuild.
    pub fn insert_many(&self, items: &[(ContentIdentity, f64)]) -> Result<(), IndexError> {
        let mut entries = self.entries_or_empty();

        let mut added = 0usize;
        for (identity, sort_key) in items {
            if entries.iter().any(|entry| entry.identity == *identity) {
                continue;
            }
            entries.push(OrderEntry {
                identity: *identity,
                sort_key: *sort_key,
            });
            added += 1;
        }
        if added == 0 {
            return Ok(());
        }

        if self.policy != OrderPolicy::Random {
            sort_descending(&mut entries);
        }
        self.persist(&entries)?;

        debug!(policy = %self.policy, added, total = entries.len(), "index updated");
        Ok(())
    }

    /// Remove an identity. Removing an absent identity is a no-op; returns
    /// whether an entry was actually removed.
    pub fn remove(&self, identity: &ContentIdentity) -> Result<bool, IndexError> {
        let mut entries = self.entries_or_empty();
        let before = entries.len();
        entries.retain(|entry| entry.identity != *identity);
        if entries.len() == before {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    /// Rebuild the index from scratch from `(identity, sort_key)` pairs.
    ///
    /// Non-random policies sort descending; the random policy performs a
    /// full shuffle. Returns the resulting playback order.
    pub fn rebuild(
        &self,
        items: Vec<(ContentIdentity, f64)>,
    ) -> Result<Vec<ContentIdentity>, IndexError> {
        let mut entries: Vec<OrderEntry> = items
            .into_iter()
            .map(|(identity, sort_key)| OrderEntry { identity, sort_key })
            .collect();

        match self.policy {
            OrderPolicy::Random => entries.shuffle(&mut rand::rng()),
            _ => sort_descending(&mut entries),
        }
        self.persist(&entries)?;

        info!(policy = %self.policy, entries = entries.len(), "index rebuilt");
        Ok(entries.into_iter().map(|entry| entry.identity).collect())
    }

    fn persist(&self, entries: &[OrderEntry]) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Descending by sort key. `sort_by` is stable, so entries with equal keys
/// keep their relative order within one process lifetime.
fn sort_descending(entries: &mut [OrderEntry]) {
    entries.sort_by(|a, b| {
        b.sort_key
            .partial_cmp(&a.sort_key)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
