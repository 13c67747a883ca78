//! # Radio Sync
//!
//! A looping playlist played out on a shared program clock. Listeners join
//! and leave at any moment and all hear the same point of the program.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               STATION                                    │
//! │                                                                          │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────────────┐    │
//! │  │  ByteSource  │───▶│ TrackCatalog │◀───│ DurationProbe (lofty)    │    │
//! │  │ (directory)  │    │  Arc swap    │    └──────────────────────────┘    │
//! │  └──────┬───────┘    └──────┬───────┘                                    │
//! │         │                   │                                            │
//! │         │                   ▼                                            │
//! │         │           ┌──────────────┐    ┌──────────────────────────┐    │
//! │         │           │ ProgramClock │───▶│ to_byte_offset (approx.) │    │
//! │         │           │ epoch + mod  │    └────────────┬─────────────┘    │
//! │         │           └──────────────┘                 │                  │
//! │         ▼                                            ▼                  │
//! │  ┌────────────────────────────────────────────────────────────────────┐ │
//! │  │ Broadcast loop                                                     │ │
//! │  │   independent: one ListenerSession per listener                    │ │
//! │  │   shared:      one paced SharedProducer, suspended with no one on  │ │
//! │  │   encoder:     supervised external encoder, restarted with backoff │ │
//! │  └──────────────────────────────┬─────────────────────────────────────┘ │
//! │                                 │ Bytes                                 │
//! │                                 ▼                                       │
//! │  ┌────────────────────────────────────────────────────────────────────┐ │
//! │  │ BackpressureGovernor ── per-sink reject counter, eviction          │ │
//! │  └──────┬──────────────────┬──────────────────┬───────────────────────┘ │
//! │         ▼                  ▼                  ▼                         │
//! │    ┌─────────┐        ┌─────────┐        ┌─────────┐  ListenerRegistry  │
//! │    │  Sink   │        │  Sink   │        │  Sink   │                    │
//! │    └────┬────┘        └────┬────┘        └────┬────┘                    │
//! └─────────┼──────────────────┼──────────────────┼─────────────────────────┘
//!           ▼                  ▼                  ▼
//!      GET /stream        GET /stream        GET /stream
//! ```

pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fanout;
pub mod http;
pub mod source;
pub mod sync;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Duration given to tracks whose metadata cannot be read
    pub const DEFAULT_FALLBACK_DURATION_SECS: f64 = 1.0;

    /// Default pause between tracks in milliseconds
    pub const DEFAULT_INTER_TRACK_GAP_MS: u64 = 200;

    /// Default read chunk size in bytes
    pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

    /// Default per-listener channel capacity in chunks
    pub const DEFAULT_SINK_CAPACITY: usize = 32;

    /// Consecutive rejected writes before a listener is evicted
    pub const DEFAULT_EVICTION_THRESHOLD: u32 = 500;

    /// Default wait before a per-listener reader retries a rejected chunk
    pub const DEFAULT_REJECT_RETRY_MS: u64 = 20;

    /// Default seconds between library rescans; 0 leaves it to the watcher
    pub const DEFAULT_RESCAN_INTERVAL_SECS: u64 = 0;

    /// Rescan interval used when the filesystem watcher cannot start
    pub const FALLBACK_RESCAN_INTERVAL_SECS: u64 = 30;

    /// Quiet period after the last filesystem event before a rebuild
    pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 750;

    /// Largest fraction of a file a late join may seek to
    pub const MAX_SEEK_FRACTION: f64 = 0.9999;

    /// Placeholder replaced by the playlist path in encoder arguments
    pub const PLAYLIST_PLACEHOLDER: &str = "{playlist}";
}
