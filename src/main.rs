//! Frameshow service binary.
//!
//! Wires the engine together: configuration, tracing, the photo library,
//! the ingestion queue, startup reconciliation of originals without
//! artifacts, and signal-driven shutdown.

use anyhow::{Context, Result};
use frameshow::config::Config;
use frameshow::content_store::ContentStore;
use frameshow::identity::ContentIdentity;
use frameshow::ingest::IngestionQueue;
use frameshow::library::PhotoLibrary;
use frameshow::metadata_store::MetadataStore;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting frameshow engine"
    );

    config.validate().context("Invalid configuration")?;

    let content = ContentStore::new(
        &config.storage.artifact_dir,
        config.storage.target_width,
        config.storage.target_height,
        config.storage.quality,
    )
    .context("Failed to initialize content store")?;
    let metadata = MetadataStore::new(&config.storage.metadata_file);

    let library = Arc::new(PhotoLibrary::new(
        content,
        metadata,
        config.storage.playlist_dir.clone(),
        config.storage.listing_ttl(),
    ));

    let (queue, worker) = IngestionQueue::start(
        &config.ingest,
        config.storage.originals_dir.clone(),
        library.clone(),
    );

    // Re-queue originals whose artifact is missing (wiped artifact
    // directory, interrupted earlier run) so the library converges without
    // operator intervention.
    if let Err(e) = reconcile_originals(&queue, &library, &config).await {
        warn!(error = %e, "startup reconciliation failed");
    }

    info!("Frameshow engine started");

    shutdown_signal().await;

    info!("Shutting down frameshow engine");

    // Dropping the last producer handle closes the wake channel; the worker
    // settles whatever is still queued before exiting.
    drop(queue);
    if let Err(e) = worker.await {
        error!(error = %e, "ingestion worker terminated abnormally");
    }

    info!("Frameshow engine stopped");
    Ok(())
}

/// Initialize the tracing/logging subsystem.
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// Scan the originals directory and queue every supported file whose
/// artifact is missing.
async fn reconcile_originals(
    queue: &IngestionQueue,
    library: &PhotoLibrary,
    config: &Config,
) -> Result<()> {
    let dir = &config.storage.originals_dir;
    tokio::fs::create_dir_all(dir)
        .await
        .context("Failed to create originals directory")?;

    let mut queued = 0usize;
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .context("Failed to read originals directory")?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if !ContentStore::is_supported(&name) {
            continue;
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %name, error = %e, "could not read original, skipping");
                continue;
            }
        };
        if library.artifact(&ContentIdentity::digest(&bytes)).is_some() {
            continue;
        }

        match queue.enqueue_existing(path, &name) {
            Ok(()) => queued += 1,
            Err(e) => warn!(file = %name, error = %e, "could not queue original"),
        }
    }

    if queued > 0 {
        info!(queued, "queued originals with missing artifacts");
    }
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
