//! Shared fixtures for broadcast tests

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::catalog::TrackCatalog;
use crate::config::BroadcastConfig;
use crate::error::SourceError;
use crate::source::{ByteSource, ByteStream, FixedProbe, MemorySource, TrackEntry};
use crate::sync::ProgramClock;

/// Byte `i` of a track is `i % 251`, so any chunk reveals its offset
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Memory source that records every `open_range` call
pub struct RecordingSource {
    pub inner: MemorySource,
    opens: Mutex<Vec<(String, u64)>>,
    opened: Notify,
}

impl RecordingSource {
    pub fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            opens: Mutex::new(Vec::new()),
            opened: Notify::new(),
        }
    }

    pub fn opens(&self) -> Vec<(String, u64)> {
        self.opens.lock().clone()
    }

    /// Wait until at least `count` opens happened
    pub async fn wait_for_opens(&self, count: usize) -> Vec<(String, u64)> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.opened.notified();
                if self.opens.lock().len() >= count {
                    return self.opens();
                }
                notified.await;
            }
        })
        .await
        .expect("expected open_range calls")
    }
}

#[async_trait]
impl ByteSource for RecordingSource {
    async fn list_tracks(&self) -> Result<Vec<TrackEntry>, SourceError> {
        self.inner.list_tracks().await
    }

    async fn open_range(&self, name: &str, start: u64) -> Result<ByteStream, SourceError> {
        self.opens.lock().push((name.to_string(), start));
        self.opened.notify_waiters();
        self.inner.open_range(name, start).await
    }
}

/// Catalog over a recording memory source; each track is `(name, seconds, bytes)`
pub async fn recording_catalog(
    tracks: &[(&str, f64, usize)],
) -> (Arc<RecordingSource>, Arc<TrackCatalog>) {
    let mut memory = MemorySource::new();
    let mut probe = FixedProbe::new();
    for (name, duration, size) in tracks {
        memory = memory.with_track(name, pattern(*size));
        probe = probe.with(name, *duration);
    }

    let source = Arc::new(RecordingSource::new(memory));
    let catalog = TrackCatalog::build(source.clone(), Arc::new(probe), 1.0, "test")
        .await
        .unwrap();
    (source, Arc::new(catalog))
}

/// a.mp3: 10 s / 5000 B, b.mp3: 20 s / 10000 B (plus any extra tracks)
pub async fn two_track_station(
    extra: &[(&str, f64, usize)],
) -> (Arc<RecordingSource>, Arc<TrackCatalog>) {
    let mut tracks = vec![("a.mp3", 10.0, 5000), ("b.mp3", 20.0, 10000)];
    tracks.extend_from_slice(extra);
    recording_catalog(&tracks).await
}

/// Clock that started `secs` ago
pub fn clock_started_ago(secs: f64) -> ProgramClock {
    ProgramClock::new(Utc::now() - chrono::Duration::milliseconds((secs * 1000.0) as i64))
}

pub fn fast_config() -> BroadcastConfig {
    BroadcastConfig {
        inter_track_gap_ms: 5,
        chunk_size: 100,
        sink_capacity: 16,
        reject_retry_ms: 5,
        ..BroadcastConfig::default()
    }
}
