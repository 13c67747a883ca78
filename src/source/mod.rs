//! External collaborators: where track bytes and durations come from

pub mod fs;
pub mod memory;
pub mod metadata;

pub use fs::DirectorySource;
pub use memory::MemorySource;
pub use metadata::{FixedProbe, LoftyProbe};

use async_trait::async_trait;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::{MetadataError, SourceError};

/// A readable byte stream over one track
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// One listed track file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEntry {
    pub name: String,
    pub size: u64,
}

/// Lists tracks and opens byte ranges into them
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// All tracks, in no particular order
    async fn list_tracks(&self) -> Result<Vec<TrackEntry>, SourceError>;

    /// Open `name` positioned at `start`. `NotFound` if the track vanished.
    async fn open_range(&self, name: &str, start: u64) -> Result<ByteStream, SourceError>;

    /// Filesystem path of `name`, for collaborators that read files directly
    fn local_path(&self, _name: &str) -> Option<PathBuf> {
        None
    }
}

/// Reads track durations
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds, `None` when the container does not say
    async fn probe_duration(&self, name: &str) -> Result<Option<f64>, MetadataError>;
}
