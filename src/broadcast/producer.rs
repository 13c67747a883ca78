//! Shared mode: one paced reader fanned out to every listener

use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{NowPlaying, MIN_ERROR_PAUSE};
use crate::catalog::{Track, TrackCatalog};
use crate::config::BroadcastConfig;
use crate::error::SourceError;
use crate::fanout::BackpressureGovernor;
use crate::sync::{to_byte_offset, ProgramClock};

enum TrackEnd {
    Finished,
    /// Last listener left mid-track
    Suspended,
    Stopped,
}

struct Mark {
    track_index: usize,
    track: String,
    duration: f64,
    offset_secs: f64,
    at: Instant,
}

/// Where the shared producer actually is.
///
/// Inter-track gaps and pacing slack make the producer trail the program
/// clock, so status reports read this instead while it is set.
#[derive(Clone, Default)]
pub struct Playhead(Arc<Mutex<Option<Mark>>>);

impl Playhead {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, track: &Track, offset_secs: f64) {
        *self.0.lock() = Some(Mark {
            track_index: track.index,
            track: track.name.clone(),
            duration: track.duration,
            offset_secs,
            at: Instant::now(),
        });
    }

    fn clear(&self) {
        *self.0.lock() = None;
    }

    /// `None` while the producer is suspended or stopped
    pub fn now_playing(&self) -> Option<NowPlaying> {
        let mark = self.0.lock();
        let mark = mark.as_ref()?;
        let offset = mark.offset_secs + mark.at.elapsed().as_secs_f64();
        Some(NowPlaying {
            track_index: mark.track_index,
            track: mark.track.clone(),
            offset_secs: offset.min(mark.duration),
            duration_secs: mark.duration,
        })
    }
}

/// Walks the catalog at real-time pace and offers each chunk to a snapshot
/// of the registry. Reads nothing while nobody is listening.
pub struct SharedProducer {
    catalog: Arc<TrackCatalog>,
    clock: ProgramClock,
    governor: BackpressureGovernor,
    playhead: Playhead,
    chunk_size: usize,
    gap: Duration,
}

impl SharedProducer {
    pub fn new(
        catalog: Arc<TrackCatalog>,
        clock: ProgramClock,
        governor: BackpressureGovernor,
        config: &BroadcastConfig,
    ) -> Self {
        Self {
            catalog,
            clock,
            governor,
            playhead: Playhead::new(),
            chunk_size: config.chunk_size,
            gap: config.inter_track_gap(),
        }
    }

    /// Publish progress to `playhead`
    pub fn with_playhead(mut self, playhead: Playhead) -> Self {
        self.playhead = playhead;
        self
    }

    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    pub async fn run(self, stop: CancellationToken) {
        let registry = self.governor.registry().clone();

        'program: loop {
            if registry.is_empty() {
                tracing::info!("No listeners, producer suspended");
            }
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = registry.wait_for_listener() => {}
            }

            // (re)join the program where the clock says it is
            let catalog = self.catalog.snapshot();
            let position = self.clock.current_position(&catalog);
            let Some(first) = catalog.track(position.track_index) else {
                tracing::warn!("Empty catalog, producer stopping");
                break;
            };
            let mut track = first.clone();
            let mut start = to_byte_offset(&track, position.offset_secs);
            tracing::info!(
                track = %track.name,
                index = track.index,
                offset_secs = format!("{:.3}", position.offset_secs),
                start_byte = start,
                "Producer resuming"
            );

            loop {
                let mut pause = self.gap;
                match self.play(&track, start, &stop).await {
                    Ok(TrackEnd::Finished) => {}
                    Ok(TrackEnd::Suspended) => {
                        self.playhead.clear();
                        continue 'program;
                    }
                    Ok(TrackEnd::Stopped) => break 'program,
                    Err(e) => {
                        self.playhead.clear();
                        tracing::warn!("Skipping {}: {}", track.name, e);
                        pause = pause.max(MIN_ERROR_PAUSE);
                    }
                }

                let catalog = self.catalog.snapshot();
                let Some(next) = catalog.next_after(&track.name) else {
                    break 'program;
                };
                track = next.clone();
                start = 0;

                tokio::select! {
                    _ = stop.cancelled() => break 'program,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        self.playhead.clear();
        tracing::info!("Producer stopped");
    }

    async fn play(
        &self,
        track: &Track,
        start: u64,
        stop: &CancellationToken,
    ) -> Result<TrackEnd, SourceError> {
        let registry = self.governor.registry();
        if registry.is_empty() {
            return Ok(TrackEnd::Suspended);
        }

        let source = self.catalog.source();
        let mut reader = tokio::select! {
            _ = stop.cancelled() => return Ok(TrackEnd::Stopped),
            opened = source.open_range(&track.name, start) => opened?,
        };

        let rate = track.byte_rate();
        let paced = rate.is_finite() && rate > 0.0;
        let offset_of = |bytes: u64| if paced { bytes as f64 / rate } else { 0.0 };
        self.playhead.set(track, offset_of(start));
        let started = Instant::now();
        let mut sent: u64 = 0;
        let mut buf = BytesMut::with_capacity(self.chunk_size);

        loop {
            if registry.is_empty() {
                return Ok(TrackEnd::Suspended);
            }

            if paced {
                let due = started + Duration::from_secs_f64(sent as f64 / rate);
                tokio::select! {
                    _ = stop.cancelled() => return Ok(TrackEnd::Stopped),
                    _ = tokio::time::sleep_until(due) => {}
                }
            }

            buf.reserve(self.chunk_size);
            let mut limited = (&mut reader).take(self.chunk_size as u64);
            let read = tokio::select! {
                _ = stop.cancelled() => return Ok(TrackEnd::Stopped),
                read = limited.read_buf(&mut buf) => read,
            };
            let n = read.map_err(|e| SourceError::from_io(&track.name, e))?;
            if n == 0 {
                return Ok(TrackEnd::Finished);
            }

            let chunk = buf.split().freeze();
            self.playhead.set(track, offset_of(start + sent));
            let report = self.governor.fan_out(&registry.snapshot(), &chunk);
            if report.rejected > 0 || report.evicted > 0 {
                tracing::trace!(
                    track = %track.name,
                    accepted = report.accepted,
                    rejected = report.rejected,
                    evicted = report.evicted,
                    "Chunk fan-out"
                );
            }
            sent += n as u64;
        }
    }
}
