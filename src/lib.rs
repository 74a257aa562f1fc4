//! Frameshow — image ingestion and ordering engine for a digital picture
//! frame.
//!
//! The engine accepts raw image submissions from external collaborators (a
//! web upload handler, an email attachment handler), deduplicates them by
//! content, transcodes them into display-ready artifacts and maintains
//! three independently persisted ordering indices that a slideshow cursor
//! walks. Rendering, networking and display scheduling live outside this
//! crate; the engine only ever touches local storage.
//!
//! ## Features
//!
//! - **Content-addressed dedup**: artifacts are named by the SHA-256 of
//!   their raw bytes, so re-uploads cost a hash and a stat, never a
//!   re-encode
//! - **Debounced batch ingestion**: bursts of uploads settle into a small
//!   number of bounded batch runs with amortized persistence
//! - **Self-healing playlists**: a missing or corrupt index file is rebuilt
//!   from the artifacts on disk instead of surfacing an error
//! - **Deletion-tolerant cursor**: the slideshow never hands out a path to
//!   an artifact that no longer exists
//!
//! ## Architecture
//!
//! ```text
//! Submissions                  Artifacts                Playlists
//! ┌───────────────┐           ┌──────────────┐         ┌────────────────┐
//! │ web upload    │           │ <hex>.jpg    │         │ recency        │
//! │ email intake  │──submit──▶│ one per      │         │ captured_time  │
//! └───────────────┘           │ identity     │         │ random         │
//!         │                   └──────────────┘         └────────────────┘
//!         ▼                          ▲                         ▲
//! ┌───────────────┐                  │                         │
//! │ Ingestion     │── debounce,──────┤                         │
//! │ Queue         │   batches        │                         │
//! └───────────────┘                  │                         │
//!         │                          │                         │
//!         ▼                          ▼                         │
//! ┌───────────────┐           ┌──────────────┐                 │
//! │ Content       │           │ Photo        │─────────────────┘
//! │ Store         │           │ Library      │──▶ change signal, listing
//! └───────────────┘           └──────┬───────┘
//!                                    ▼
//!                             ┌──────────────┐
//!                             │ Slideshow    │
//!                             │ cursor       │
//!                             └──────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod content_store;
pub mod identity;
pub mod ingest;
pub mod library;
pub mod metadata_store;
pub mod order_index;
pub mod slideshow;

pub use capture::CaptureAttributes;
pub use config::Config;
pub use content_store::{ContentStore, Materialized, StoreError};
pub use identity::ContentIdentity;
pub use ingest::{IngestionJob, IngestionQueue, QueueStatus, SubmitError};
pub use library::{LibraryError, ListingEntry, PhotoLibrary};
pub use metadata_store::{ImageRecord, MetadataError, MetadataStore};
pub use order_index::{IndexError, OrderEntry, OrderIndex, OrderPolicy};
pub use slideshow::Slideshow;
