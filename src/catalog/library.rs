//! Catalog construction and atomic rebuilds
//!
//! Readers take an `Arc<Catalog>` snapshot and keep using it for as long as
//! they need; a rebuild builds a complete new catalog off to the side and
//! swaps the pointer, so nobody ever sees a half-built playlist.

use notify::{EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::track::{Catalog, Track};
use crate::error::{CatalogError, Result};
use crate::source::{ByteSource, DurationProbe, TrackEntry};

/// Shared handle to the current catalog
pub struct TrackCatalog {
    source: Arc<dyn ByteSource>,
    probe: Arc<dyn DurationProbe>,
    fallback_duration: f64,
    /// Human-readable origin, used in error messages
    origin: String,
    current: RwLock<Arc<Catalog>>,
    version: watch::Sender<u64>,
    rebuild_lock: Mutex<()>,
}

impl TrackCatalog {
    /// Scan the source and build the first catalog.
    ///
    /// Fails with [`CatalogError::Empty`] when no track is found; a track
    /// whose duration cannot be read gets `fallback_duration` instead.
    pub async fn build(
        source: Arc<dyn ByteSource>,
        probe: Arc<dyn DurationProbe>,
        fallback_duration: f64,
        origin: impl Into<String>,
    ) -> Result<Self> {
        let origin = origin.into();
        let catalog = scan(source.as_ref(), probe.as_ref(), fallback_duration, &origin).await?;

        tracing::info!(
            "Catalog loaded: {} tracks, {:.2}s total",
            catalog.len(),
            catalog.total_duration()
        );
        for track in catalog.tracks() {
            tracing::debug!(
                index = track.index,
                track = %track.name,
                size = track.size,
                duration = track.duration,
                "Catalogued"
            );
        }

        let (version, _) = watch::channel(0);
        Ok(Self {
            source,
            probe,
            fallback_duration,
            origin,
            current: RwLock::new(Arc::new(catalog)),
            version,
            rebuild_lock: Mutex::new(()),
        })
    }

    /// The current catalog
    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().clone()
    }

    pub fn source(&self) -> &Arc<dyn ByteSource> {
        &self.source
    }

    /// Incremented after every swap
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Rescan and swap. Returns `Ok(false)` when nothing changed.
    ///
    /// On failure (listing error, empty library) the previous catalog stays
    /// in place.
    pub async fn rebuild(&self) -> Result<bool> {
        let _guard = self.rebuild_lock.lock().await;

        let catalog = scan(
            self.source.as_ref(),
            self.probe.as_ref(),
            self.fallback_duration,
            &self.origin,
        )
        .await?;

        if *self.snapshot() == catalog {
            return Ok(false);
        }

        tracing::info!(
            "Catalog rebuilt: {} tracks, {:.2}s total",
            catalog.len(),
            catalog.total_duration()
        );
        *self.current.write() = Arc::new(catalog);
        self.version.send_modify(|v| *v += 1);
        Ok(true)
    }

    /// Whether the source listing differs from the current catalog
    pub async fn has_changed(&self) -> Result<bool> {
        let listing = sorted(self.source.list_tracks().await?);
        let snapshot = self.snapshot();
        let current = snapshot.signature();
        Ok(current.len() != listing.len()
            || current
                .iter()
                .zip(&listing)
                .any(|((name, size), entry)| *name != entry.name || *size != entry.size))
    }

    /// Rebuild after filesystem events under `dir` settle for `debounce`.
    ///
    /// Fails when the platform watcher cannot be created or `dir` cannot be
    /// watched; callers fall back to [`spawn_watcher`](Self::spawn_watcher).
    pub fn spawn_fs_watcher(
        self: &Arc<Self>,
        dir: &Path,
        debounce: Duration,
        stop: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let watch_error = |source| CatalogError::Watch {
            path: dir.display().to_string(),
            source,
        };

        let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = fs_tx.send(res);
        })
        .map_err(watch_error)?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
        tracing::info!("Watching {} for library changes", dir.display());

        let catalog = Arc::clone(self);
        Ok(tokio::spawn(async move {
            // dropping the watcher unregisters it
            let _watcher = watcher;
            let mut deadline: Option<Instant> = None;

            loop {
                let settled = async move {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = fs_rx.recv() => match event {
                        Some(Ok(event)) => {
                            if !matches!(event.kind, EventKind::Access(_)) {
                                deadline = Some(Instant::now() + debounce);
                            }
                        }
                        Some(Err(e)) => tracing::warn!("Library watch error: {}", e),
                        None => break,
                    },
                    _ = settled => {
                        deadline = None;
                        match catalog.rebuild().await {
                            Ok(true) => {}
                            Ok(false) => tracing::debug!("Library event without catalog change"),
                            Err(e) => {
                                tracing::warn!("Catalog rebuild failed, keeping previous: {}", e)
                            }
                        }
                    }
                }
            }
            tracing::debug!("Library watcher stopped");
        }))
    }

    /// Poll the source every `interval` and rebuild on change
    pub fn spawn_watcher(
        self: &Arc<Self>,
        interval: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let catalog = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match catalog.has_changed().await {
                    Ok(false) => {}
                    Ok(true) => {
                        if let Err(e) = catalog.rebuild().await {
                            tracing::warn!("Catalog rebuild failed, keeping previous: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Library rescan failed: {}", e),
                }
            }
            tracing::debug!("Catalog watcher stopped");
        })
    }
}

fn sorted(mut entries: Vec<TrackEntry>) -> Vec<TrackEntry> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

async fn scan(
    source: &dyn ByteSource,
    probe: &dyn DurationProbe,
    fallback_duration: f64,
    origin: &str,
) -> Result<Catalog> {
    let entries = sorted(source.list_tracks().await?);
    if entries.is_empty() {
        return Err(CatalogError::Empty(origin.to_string()).into());
    }

    let mut tracks = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let probed = match probe.probe_duration(&entry.name).await {
            Ok(Some(d)) if d.is_finite() && d > 0.0 => Some(d),
            Ok(_) => {
                tracing::warn!(
                    "No duration for {}, assuming {}s (re-encode to fix)",
                    entry.name,
                    fallback_duration
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read metadata of {}: {}; assuming {}s",
                    entry.name,
                    e,
                    fallback_duration
                );
                None
            }
        };

        tracks.push(Track {
            index,
            name: entry.name,
            size: entry.size,
            probed_duration: probed,
            duration: probed.unwrap_or(fallback_duration),
        });
    }

    Ok(Catalog::new(tracks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, MetadataError};
    use crate::source::{DirectorySource, FixedProbe, MemorySource};
    use async_trait::async_trait;

    struct FailingProbe;

    #[async_trait]
    impl DurationProbe for FailingProbe {
        async fn probe_duration(&self, name: &str) -> std::result::Result<Option<f64>, MetadataError> {
            Err(MetadataError::Probe {
                name: name.to_string(),
                reason: "corrupt header".to_string(),
            })
        }
    }

    fn source() -> Arc<MemorySource> {
        Arc::new(
            MemorySource::new()
                .with_track("b.mp3", vec![0u8; 10000])
                .with_track("a.mp3", vec![0u8; 5000]),
        )
    }

    fn probe() -> Arc<FixedProbe> {
        Arc::new(FixedProbe::new().with("a.mp3", 10.0).with("b.mp3", 20.0))
    }

    #[tokio::test]
    async fn test_build_sorts_by_name() {
        let catalog = TrackCatalog::build(source(), probe(), 1.0, "mem").await.unwrap();
        let snapshot = catalog.snapshot();

        let names: Vec<_> = snapshot.tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp3", "b.mp3"]);
        assert_eq!(snapshot.track(1).unwrap().index, 1);
        assert_eq!(snapshot.total_duration(), 30.0);
    }

    #[tokio::test]
    async fn test_metadata_failure_uses_fallback() {
        let catalog = TrackCatalog::build(source(), Arc::new(FailingProbe), 1.0, "mem")
            .await
            .unwrap();
        let snapshot = catalog.snapshot();

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.tracks().iter().all(|t| t.duration == 1.0 && t.is_estimated()));
        assert_eq!(snapshot.total_duration(), 2.0);
    }

    #[tokio::test]
    async fn test_zero_duration_uses_fallback() {
        let probe = Arc::new(FixedProbe::new().with("a.mp3", 0.0).with("b.mp3", f64::NAN));
        let catalog = TrackCatalog::build(source(), probe, 1.0, "mem").await.unwrap();
        assert_eq!(catalog.snapshot().total_duration(), 2.0);
    }

    #[tokio::test]
    async fn test_empty_source_is_fatal() {
        let result =
            TrackCatalog::build(Arc::new(MemorySource::new()), probe(), 1.0, "mem").await;
        assert!(matches!(result, Err(Error::Catalog(CatalogError::Empty(_)))));
    }

    #[tokio::test]
    async fn test_rebuild_swaps_and_bumps_version() {
        let source = source();
        let catalog = TrackCatalog::build(source.clone(), probe(), 1.0, "mem").await.unwrap();
        let before = catalog.snapshot();
        let versions = catalog.subscribe();

        assert!(!catalog.has_changed().await.unwrap());
        assert!(!catalog.rebuild().await.unwrap());
        assert_eq!(catalog.version(), 0);

        source.insert("c.mp3", vec![0u8; 42]);
        assert!(catalog.has_changed().await.unwrap());
        assert!(catalog.rebuild().await.unwrap());

        assert_eq!(catalog.version(), 1);
        assert!(versions.has_changed().unwrap());
        assert_eq!(catalog.snapshot().len(), 3);
        // an old snapshot is unaffected
        assert_eq!(before.len(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_to_empty_keeps_previous() {
        let source = source();
        let catalog = TrackCatalog::build(source.clone(), probe(), 1.0, "mem").await.unwrap();

        source.remove("a.mp3");
        source.remove("b.mp3");

        assert!(catalog.rebuild().await.is_err());
        assert_eq!(catalog.snapshot().len(), 2);
        assert_eq!(catalog.version(), 0);
    }

    #[tokio::test]
    async fn test_watcher_picks_up_changes() {
        let source = source();
        let catalog = Arc::new(
            TrackCatalog::build(source.clone(), probe(), 1.0, "mem").await.unwrap(),
        );
        let stop = CancellationToken::new();
        let mut versions = catalog.subscribe();
        let handle = catalog.spawn_watcher(Duration::from_millis(10), stop.clone());

        source.insert("c.mp3", vec![0u8; 7]);
        tokio::time::timeout(Duration::from_secs(5), versions.changed())
            .await
            .expect("watcher did not rebuild")
            .unwrap();
        assert_eq!(catalog.snapshot().len(), 3);

        stop.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_watcher_rebuilds_on_new_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("b.mp3"), vec![0u8; 200]).unwrap();
        let source = Arc::new(DirectorySource::new(dir.path(), &["mp3".to_string()]));
        let catalog = Arc::new(
            TrackCatalog::build(source, Arc::new(FixedProbe::new()), 1.0, "dir")
                .await
                .unwrap(),
        );

        let stop = CancellationToken::new();
        let mut versions = catalog.subscribe();
        let handle = catalog
            .spawn_fs_watcher(dir.path(), Duration::from_millis(50), stop.clone())
            .unwrap();

        std::fs::write(dir.path().join("c.mp3"), vec![0u8; 300]).unwrap();
        tokio::time::timeout(Duration::from_secs(5), versions.changed())
            .await
            .expect("watcher did not rebuild")
            .unwrap();
        let names: Vec<_> = catalog
            .snapshot()
            .tracks()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["a.mp3", "b.mp3", "c.mp3"]);

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_fs_watcher_missing_dir_is_an_error() {
        let catalog = Arc::new(TrackCatalog::build(source(), probe(), 1.0, "mem").await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        let result = catalog.spawn_fs_watcher(
            &dir.path().join("missing"),
            Duration::from_millis(50),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(Error::Catalog(CatalogError::Watch { .. }))));
    }
}
