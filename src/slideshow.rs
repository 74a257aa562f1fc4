//! Slideshow cursor over one ordering policy.

use crate::identity::ContentIdentity;
use crate::library::PhotoLibrary;
use crate::order_index::OrderPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A stateful cursor walking one policy's playlist.
///
/// The cursor tolerates concurrent deletion: `current` re-checks that the
/// artifact it points at still exists and refreshes itself instead of
/// handing out a dangling path. An empty playlist is a valid steady state
/// ("no images yet"), so every accessor then reports absence rather than an
/// error.
pub struct Slideshow {
    library: Arc<PhotoLibrary>,
    policy: OrderPolicy,
    looping: bool,
    position: usize,
    entries: Vec<(ContentIdentity, PathBuf)>,
}

impl Slideshow {
    /// Create a cursor bound to `policy` and load its playlist.
    pub fn new(library: Arc<PhotoLibrary>, policy: OrderPolicy, looping: bool) -> Self {
        let mut show = Self {
            library,
            policy,
            looping,
            position: 0,
            entries: Vec::new(),
        };
        show.refresh();
        show
    }

    pub fn policy(&self) -> OrderPolicy {
        self.policy
    }

    /// Number of entries whose artifacts currently exist.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Reload the bound playlist, drop entries whose artifacts vanished and
    /// pull the cursor back into `[0, N)`.
    pub fn refresh(&mut self) {
        let identities = match self.library.playlist(self.policy) {
            Ok(identities) => identities,
            Err(e) => {
                warn!(policy = %self.policy, error = %e, "playlist unavailable, keeping empty slideshow");
                Vec::new()
            }
        };

        self.entries = identities
            .into_iter()
            .filter_map(|identity| {
                self.library
                    .artifact(&identity)
                    .map(|path| (identity, path))
            })
            .collect();

        if self.position >= self.entries.len() {
            self.position = 0;
        }

        debug!(policy = %self.policy, entries = self.entries.len(), "slideshow refreshed");
    }

    /// Identity under the cursor, if any.
    pub fn current_identity(&self) -> Option<ContentIdentity> {
        self.entries.get(self.position).map(|(identity, _)| *identity)
    }

    /// Artifact path under the cursor, or `None` for an empty playlist.
    ///
    /// Performs a lazy existence check: if the artifact was deleted
    /// out-of-band since the last refresh, the playlist is re-derived
    /// before answering.
    pub fn current(&mut self) -> Option<PathBuf> {
        let (_, path) = self.entries.get(self.position)?;
        if !path.exists() {
            self.refresh();
        }
        self.entries.get(self.position).map(|(_, path)| path.clone())
    }

    /// Advance the cursor and return the new current artifact. Wraps at the
    /// end when looping, otherwise stays on the last entry.
    pub fn next(&mut self) -> Option<PathBuf> {
        if self.entries.is_empty() {
            return None;
        }

        if self.position + 1 >= self.entries.len() {
            if self.looping {
                self.position = 0;
            }
        } else {
            self.position += 1;
        }

        self.current()
    }

    /// Step back and return the new current artifact. Wraps to the end when
    /// looping, otherwise stays on the first entry.
    pub fn previous(&mut self) -> Option<PathBuf> {
        if self.entries.is_empty() {
            return None;
        }

        if self.position == 0 {
            if self.looping {
                self.position = self.entries.len() - 1;
            }
        } else {
            self.position -= 1;
        }

        self.current()
    }

    /// Rebind the cursor to a different ordering policy and reload. Moving
    /// from an empty to a non-empty playlist starts at the first entry.
    pub fn switch_policy(&mut self, policy: OrderPolicy) {
        self.policy = policy;
        self.refresh();
        info!(policy = %policy, entries = self.entries.len(), "slideshow policy switched");
    }
}
