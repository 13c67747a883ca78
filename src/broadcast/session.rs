//! Independent mode: one reader per listener
//!
//! A session seeks into the track the program clock says is playing, then
//! walks the catalog on its own, pausing briefly between tracks. Because
//! every session starts from the same clock and reads at the pace its
//! listener consumes, listeners stay within a gap or two of each other.

use bytes::BytesMut;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::task::JoinHandle;

use super::MIN_ERROR_PAUSE;
use crate::catalog::{Track, TrackCatalog};
use crate::config::BroadcastConfig;
use crate::error::SourceError;
use crate::fanout::{BackpressureGovernor, Sink, WriteOutcome};
use crate::sync::{to_byte_offset, ProgramClock};

enum TrackEnd {
    Finished,
    SinkClosed,
}

/// Playback state machine for one listener
pub struct ListenerSession {
    sink: Arc<Sink>,
    catalog: Arc<TrackCatalog>,
    clock: ProgramClock,
    governor: BackpressureGovernor,
    chunk_size: usize,
    gap: Duration,
    retry: Duration,
}

impl ListenerSession {
    pub fn new(
        sink: Arc<Sink>,
        catalog: Arc<TrackCatalog>,
        clock: ProgramClock,
        governor: BackpressureGovernor,
        config: &BroadcastConfig,
    ) -> Self {
        Self {
            sink,
            catalog,
            clock,
            governor,
            chunk_size: config.chunk_size,
            gap: config.inter_track_gap(),
            retry: config.reject_retry(),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Play until the sink closes
    pub async fn run(self) {
        let listener = self.sink.id();
        let catalog = self.catalog.snapshot();
        let position = self.clock.current_position(&catalog);
        let Some(first) = catalog.track(position.track_index) else {
            tracing::warn!(listener = %listener, "Empty catalog, closing listener");
            self.sink.close();
            return;
        };

        let mut track = first.clone();
        let mut start = to_byte_offset(&track, position.offset_secs);
        tracing::info!(
            listener = %listener,
            track = %track.name,
            index = track.index,
            offset_secs = format!("{:.3}", position.offset_secs),
            start_byte = start,
            "Joining program"
        );

        loop {
            let mut pause = self.gap;
            match self.play(&track, start).await {
                Ok(TrackEnd::SinkClosed) => break,
                Ok(TrackEnd::Finished) => {}
                Err(e) => {
                    tracing::warn!(listener = %listener, "Skipping {}: {}", track.name, e);
                    pause = pause.max(MIN_ERROR_PAUSE);
                }
            }

            let catalog = self.catalog.snapshot();
            let Some(next) = catalog.next_after(&track.name) else {
                break;
            };
            track = next.clone();
            start = 0;

            tokio::select! {
                _ = self.sink.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        tracing::debug!(
            listener = %listener,
            bytes = self.sink.bytes_sent(),
            "Session ended"
        );
    }

    async fn play(&self, track: &Track, start: u64) -> Result<TrackEnd, SourceError> {
        tracing::debug!(
            listener = %self.sink.id(),
            track = %track.name,
            start_byte = start,
            size = track.size,
            "Streaming track"
        );

        let source = self.catalog.source();
        let mut reader = tokio::select! {
            _ = self.sink.cancelled() => return Ok(TrackEnd::SinkClosed),
            opened = source.open_range(&track.name, start) => opened?,
        };

        let mut buf = BytesMut::with_capacity(self.chunk_size);
        loop {
            buf.reserve(self.chunk_size);
            let read = tokio::select! {
                _ = self.sink.cancelled() => return Ok(TrackEnd::SinkClosed),
                read = reader.read_buf(&mut buf) => read,
            };
            let n = read.map_err(|e| SourceError::from_io(&track.name, e))?;
            if n == 0 {
                return Ok(TrackEnd::Finished);
            }

            let chunk = buf.split().freeze();
            match self.governor.deliver(&self.sink, chunk, self.retry).await {
                WriteOutcome::Accepted | WriteOutcome::Rejected { .. } => {}
                WriteOutcome::Evicted | WriteOutcome::Closed => return Ok(TrackEnd::SinkClosed),
            }
        }
    }
}
