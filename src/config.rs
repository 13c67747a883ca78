//! Station configuration
//!
//! Loaded from a TOML file (first CLI argument, or `config.toml` in the
//! platform config directory) with every field defaulted, so an empty or
//! missing file yields a working station serving `./audio`.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub library: LibraryConfig,
    pub broadcast: BroadcastConfig,
    pub encoder: EncoderConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Where tracks come from and how they are catalogued
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub music_dir: PathBuf,
    /// Lower-case file extensions accepted as tracks
    pub extensions: Vec<String>,
    /// Duration assigned to tracks whose metadata cannot be read
    pub fallback_duration_secs: f64,
    /// Rebuild the catalog on filesystem events in `music_dir`
    pub watch: bool,
    /// Quiet period after the last event before rebuilding
    pub watch_debounce_ms: u64,
    /// Seconds between directory rescans; 0 disables polling
    pub rescan_interval_secs: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            music_dir: PathBuf::from("audio"),
            extensions: vec!["mp3".to_string()],
            fallback_duration_secs: DEFAULT_FALLBACK_DURATION_SECS,
            watch: true,
            watch_debounce_ms: DEFAULT_WATCH_DEBOUNCE_MS,
            rescan_interval_secs: DEFAULT_RESCAN_INTERVAL_SECS,
        }
    }
}

impl LibraryConfig {
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

/// Fan-out topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastMode {
    /// One reader per listener, seeked to the program clock on connect
    #[default]
    Independent,
    /// One paced reader fanned out to every listener
    Shared,
    /// External encoder output fanned out to every listener
    Encoder,
}

impl BroadcastMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastMode::Independent => "independent",
            BroadcastMode::Shared => "shared",
            BroadcastMode::Encoder => "encoder",
        }
    }
}

/// Broadcast loop and backpressure settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub mode: BroadcastMode,
    /// Start broadcasting as soon as the server is up
    pub autostart: bool,
    /// Pause between two tracks
    pub inter_track_gap_ms: u64,
    /// Bytes per read
    pub chunk_size: usize,
    /// Chunks buffered per listener before writes are rejected
    pub sink_capacity: usize,
    /// Consecutive rejected writes before a listener is evicted
    pub eviction_threshold: u32,
    /// Longest wait for a full sink before a per-listener reader retries
    pub reject_retry_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            mode: BroadcastMode::default(),
            autostart: true,
            inter_track_gap_ms: DEFAULT_INTER_TRACK_GAP_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            reject_retry_ms: DEFAULT_REJECT_RETRY_MS,
        }
    }
}

impl BroadcastConfig {
    pub fn inter_track_gap(&self) -> Duration {
        Duration::from_millis(self.inter_track_gap_ms)
    }

    pub fn reject_retry(&self) -> Duration {
        Duration::from_millis(self.reject_retry_ms)
    }
}

/// External encoder process (encoder mode only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: String,
    /// Arguments; `{playlist}` is replaced by the concat playlist path
    pub args: Vec<String>,
    pub restart_min_ms: u64,
    pub restart_max_ms: u64,
    /// A run at least this long resets the restart backoff
    pub stable_after_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        let args = [
            "-hide_banner", "-loglevel", "error", "-re", "-stream_loop", "-1",
            "-f", "concat", "-safe", "0", "-i", PLAYLIST_PLACEHOLDER, "-vn",
            "-c:a", "libmp3lame", "-b:a", "128k", "-f", "mp3", "pipe:1",
        ];
        Self {
            program: "ffmpeg".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            restart_min_ms: 1_000,
            restart_max_ms: 30_000,
            stable_after_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the platform config file
    /// is used when present and defaults otherwise. `PORT` overrides the
    /// HTTP port in every case.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };

        if let Ok(port) = std::env::var("PORT") {
            config.server.http_port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid PORT: {}", port)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// `<config dir>/radio-sync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("net", "radio-sync", "radio-sync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Reject values that would stall or divide by zero at runtime
    pub fn validate(&self) -> Result<()> {
        let fallback = self.library.fallback_duration_secs;
        if !(fallback.is_finite() && fallback > 0.0) {
            return Err(Error::Config(format!(
                "fallback_duration_secs must be positive, got {}",
                fallback
            )));
        }
        if self.broadcast.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be non-zero".into()));
        }
        if self.broadcast.sink_capacity == 0 {
            return Err(Error::Config("sink_capacity must be non-zero".into()));
        }
        if self.broadcast.eviction_threshold == 0 {
            return Err(Error::Config("eviction_threshold must be non-zero".into()));
        }
        if self.encoder.restart_min_ms > self.encoder.restart_max_ms {
            return Err(Error::Config(
                "restart_min_ms must not exceed restart_max_ms".into(),
            ));
        }
        Ok(())
    }
}
