//! Encoder mode: an external process produces the stream
//!
//! The supervisor hands the encoder a concat playlist of the catalog and
//! fans its stdout out to every listener unchanged. The encoder is restarted
//! with exponential backoff when it exits and immediately when the catalog
//! changes.

use bytes::BytesMut;
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, TrackCatalog};
use crate::config::EncoderConfig;
use crate::constants::PLAYLIST_PLACEHOLDER;
use crate::error::{EncoderError, Result};
use crate::fanout::BackpressureGovernor;
use crate::source::ByteSource;

/// Doubling restart delay between `min` and `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// ffconcat playlist of every catalog track that has a local path
pub fn render_playlist(source: &dyn ByteSource, catalog: &Catalog) -> Result<String> {
    let mut text = String::from("ffconcat version 1.0\n");
    let mut listed = 0;
    for track in catalog.tracks() {
        let Some(path) = source.local_path(&track.name) else {
            tracing::warn!(track = %track.name, "No local path, left out of encoder playlist");
            continue;
        };
        let escaped = path.to_string_lossy().replace('\'', r"'\''");
        text.push_str(&format!("file '{}'\n", escaped));
        listed += 1;
    }
    if listed == 0 {
        return Err(EncoderError::NoLocalTracks.into());
    }
    Ok(text)
}

fn write_playlist(text: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("radio-sync-")
        .suffix(".ffconcat")
        .tempfile()
        .map_err(EncoderError::Playlist)?;
    file.write_all(text.as_bytes())
        .and_then(|_| file.flush())
        .map_err(EncoderError::Playlist)?;
    Ok(file)
}

/// Substitute the playlist path into the argument template
pub fn render_args(template: &[String], playlist: &Path) -> Vec<String> {
    let playlist = playlist.to_string_lossy();
    template
        .iter()
        .map(|arg| arg.replace(PLAYLIST_PLACEHOLDER, &playlist))
        .collect()
}

enum RunEnd {
    Stopped,
    CatalogChanged,
    Exited(ExitStatus),
}

/// Keeps one encoder process running and fans out its output
pub struct EncoderSupervisor {
    catalog: Arc<TrackCatalog>,
    governor: BackpressureGovernor,
    config: EncoderConfig,
    chunk_size: usize,
}

impl EncoderSupervisor {
    pub fn new(
        catalog: Arc<TrackCatalog>,
        governor: BackpressureGovernor,
        config: EncoderConfig,
        chunk_size: usize,
    ) -> Self {
        Self {
            catalog,
            governor,
            config,
            chunk_size,
        }
    }

    pub fn spawn(self, stop: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(stop))
    }

    pub async fn run(self, stop: CancellationToken) {
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.restart_min_ms),
            Duration::from_millis(self.config.restart_max_ms),
        );
        let stable_after = Duration::from_secs(self.config.stable_after_secs);
        let mut versions = self.catalog.subscribe();

        loop {
            let _ = versions.borrow_and_update();
            let started = Instant::now();

            match self.run_once(&stop, &mut versions).await {
                Ok(RunEnd::Stopped) => break,
                Ok(RunEnd::CatalogChanged) => {
                    tracing::info!("Catalog changed, restarting encoder");
                    backoff.reset();
                    continue;
                }
                Ok(RunEnd::Exited(status)) => {
                    tracing::warn!(program = %self.config.program, "Encoder exited: {}", status);
                }
                Err(e) => tracing::error!("Encoder run failed: {}", e),
            }

            if started.elapsed() >= stable_after {
                backoff.reset();
            }
            let delay = backoff.next_delay();
            tracing::info!("Restarting encoder in {:?}", delay);
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Encoder supervisor stopped");
    }

    async fn run_once(
        &self,
        stop: &CancellationToken,
        versions: &mut watch::Receiver<u64>,
    ) -> Result<RunEnd> {
        let catalog = self.catalog.snapshot();
        // removed when this run ends
        let playlist = write_playlist(&render_playlist(self.catalog.source().as_ref(), &catalog)?)?;
        let args = render_args(&self.config.args, playlist.path());

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EncoderError::Spawn {
                program: self.config.program.clone(),
                source,
            })?;
        let mut stdout = child.stdout.take().ok_or(EncoderError::NoOutput)?;
        tracing::info!(
            program = %self.config.program,
            pid = child.id().unwrap_or_default(),
            tracks = catalog.len(),
            "Encoder started"
        );

        let registry = self.governor.registry();
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        let end = loop {
            buf.reserve(self.chunk_size);
            let mut limited = (&mut stdout).take(self.chunk_size as u64);
            tokio::select! {
                _ = stop.cancelled() => break Some(RunEnd::Stopped),
                Ok(()) = versions.changed() => break Some(RunEnd::CatalogChanged),
                read = limited.read_buf(&mut buf) => match read {
                    Ok(0) => break None,
                    Ok(_) => {
                        let chunk = buf.split().freeze();
                        self.governor.fan_out(&registry.snapshot(), &chunk);
                    }
                    Err(e) => {
                        tracing::warn!("Reading encoder output failed: {}", e);
                        break None;
                    }
                },
            }
        };

        let end = match end {
            Some(end) => end,
            // stdout is gone, but the process may linger
            None => {
                let status = tokio::select! {
                    _ = stop.cancelled() => None,
                    status = child.wait() => Some(status),
                };
                match status {
                    Some(status) => return Ok(RunEnd::Exited(status?)),
                    None => RunEnd::Stopped,
                }
            }
        };

        if let Err(e) = child.kill().await {
            tracing::debug!("Encoder kill failed: {}", e);
        }
        Ok(end)
    }
}
