//! Broadcast loops and the station that owns them

pub mod encoder;
pub mod producer;
pub mod session;
pub mod station;

#[cfg(test)]
pub(crate) mod testing;

pub use encoder::{Backoff, EncoderSupervisor};
pub use producer::{Playhead, SharedProducer};
pub use session::ListenerSession;
pub use station::{NowPlaying, Station, StationStatus};

use std::time::Duration;

/// Shortest pause after a track failed to play, so a library of broken
/// files cannot spin a loop
pub(crate) const MIN_ERROR_PAUSE: Duration = Duration::from_millis(100);
