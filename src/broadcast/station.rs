//! The station: one owned object tying catalog, clock and listeners together

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{EncoderSupervisor, ListenerSession, Playhead, SharedProducer};
use crate::catalog::TrackCatalog;
use crate::config::{AppConfig, BroadcastConfig, BroadcastMode, EncoderConfig};
use crate::error::{Error, Result};
use crate::fanout::{BackpressureGovernor, ListenerRegistry, ListenerStream, Sink};
use crate::sync::ProgramClock;

/// State of one start/stop cycle
struct BroadcastRun {
    clock: ProgramClock,
    stop: CancellationToken,
    /// Producer or encoder supervisor; independent mode has none
    task: Option<JoinHandle<()>>,
    /// Shared mode only
    playhead: Option<Playhead>,
}

/// What is on air: the shared producer's position while it runs, the
/// program clock otherwise
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub track_index: usize,
    pub track: String,
    pub offset_secs: f64,
    pub duration_secs: f64,
}

/// Station status
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub broadcasting: bool,
    pub mode: BroadcastMode,
    pub listeners: usize,
    pub epoch: Option<DateTime<Utc>>,
    pub now_playing: Option<NowPlaying>,
    pub total_duration_secs: f64,
    pub track_count: usize,
    pub catalog_version: u64,
    pub uptime_seconds: u64,
}

pub struct Station {
    config: BroadcastConfig,
    encoder: EncoderConfig,
    catalog: Arc<TrackCatalog>,
    registry: ListenerRegistry,
    governor: BackpressureGovernor,
    run: Mutex<Option<BroadcastRun>>,
    started_at: Instant,
}

impl Station {
    pub fn new(config: &AppConfig, catalog: Arc<TrackCatalog>) -> Arc<Self> {
        let registry = ListenerRegistry::new();
        let governor =
            BackpressureGovernor::new(registry.clone(), config.broadcast.eviction_threshold);
        Arc::new(Self {
            config: config.broadcast.clone(),
            encoder: config.encoder.clone(),
            catalog,
            registry,
            governor,
            run: Mutex::new(None),
            started_at: Instant::now(),
        })
    }

    pub fn mode(&self) -> BroadcastMode {
        self.config.mode
    }

    pub fn catalog(&self) -> &Arc<TrackCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn governor(&self) -> &BackpressureGovernor {
        &self.governor
    }

    /// Clock of the running broadcast
    pub fn clock(&self) -> Option<ProgramClock> {
        self.run.lock().as_ref().map(|run| run.clock)
    }

    pub fn is_broadcasting(&self) -> bool {
        self.run.lock().is_some()
    }

    /// Set the epoch to now and start the mode's broadcast loop.
    ///
    /// Returns `false` if already broadcasting.
    pub fn start_broadcast(&self) -> bool {
        let mut run = self.run.lock();
        if run.is_some() {
            return false;
        }

        let clock = ProgramClock::starting_now();
        let stop = CancellationToken::new();
        let playhead = (self.config.mode == BroadcastMode::Shared).then(Playhead::new);
        let task = match self.config.mode {
            BroadcastMode::Independent => None,
            BroadcastMode::Shared => Some(
                SharedProducer::new(
                    self.catalog.clone(),
                    clock,
                    self.governor.clone(),
                    &self.config,
                )
                .with_playhead(playhead.clone().unwrap_or_default())
                .spawn(stop.clone()),
            ),
            BroadcastMode::Encoder => Some(
                EncoderSupervisor::new(
                    self.catalog.clone(),
                    self.governor.clone(),
                    self.encoder.clone(),
                    self.config.chunk_size,
                )
                .spawn(stop.clone()),
            ),
        };

        tracing::info!(
            mode = self.config.mode.as_str(),
            epoch = %clock.epoch(),
            "Broadcast started"
        );
        *run = Some(BroadcastRun {
            clock,
            stop,
            task,
            playhead,
        });
        true
    }

    /// Stop the loop, disconnect every listener and clear the epoch.
    ///
    /// Returns `false` if not broadcasting.
    pub fn stop_broadcast(&self) -> bool {
        let Some(run) = self.run.lock().take() else {
            return false;
        };
        run.stop.cancel();
        // the loop exits on its own once cancelled
        drop(run.task);
        let closed = self.registry.close_all();
        tracing::info!(listeners = closed, "Broadcast stopped");
        true
    }

    /// Register a new listener and return its byte stream.
    ///
    /// In independent mode this also starts the listener's own reader.
    pub fn connect_listener(&self) -> Result<ListenerStream> {
        let run = self.run.lock();
        let Some(run) = run.as_ref() else {
            return Err(Error::NotBroadcasting);
        };

        let (sink, rx) = Sink::channel(self.config.sink_capacity);
        // under the run lock, so a concurrent stop cannot miss this sink
        self.registry.add(sink.clone());
        if self.config.mode == BroadcastMode::Independent {
            ListenerSession::new(
                sink.clone(),
                self.catalog.clone(),
                run.clock,
                self.governor.clone(),
                &self.config,
            )
            .spawn();
        }

        Ok(ListenerStream::new(sink, rx, self.registry.clone()))
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        let (clock, playhead) = {
            let run = self.run.lock();
            let run = run.as_ref()?;
            (run.clock, run.playhead.clone())
        };
        if let Some(playing) = playhead.and_then(|p| p.now_playing()) {
            return Some(playing);
        }

        let catalog = self.catalog.snapshot();
        let position = clock.current_position(&catalog);
        let track = catalog.track(position.track_index)?;
        Some(NowPlaying {
            track_index: position.track_index,
            track: track.name.clone(),
            offset_secs: position.offset_secs,
            duration_secs: track.duration,
        })
    }

    pub fn status(&self) -> StationStatus {
        let catalog = self.catalog.snapshot();
        let clock = self.clock();
        StationStatus {
            broadcasting: clock.is_some(),
            mode: self.config.mode,
            listeners: self.registry.len(),
            epoch: clock.map(|c| c.epoch()),
            now_playing: self.now_playing(),
            total_duration_secs: catalog.total_duration(),
            track_count: catalog.len(),
            catalog_version: self.catalog.version(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.stop.cancel();
        }
    }
}
