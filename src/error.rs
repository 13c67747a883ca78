//! Error types for the broadcast engine

use thiserror::Error;

/// Main error type for the station
#[derive(Error, Debug)]
pub enum Error {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broadcast is not running")]
    NotBroadcasting,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Track catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    /// No playable tracks were found. Fatal at startup.
    #[error("No tracks found in {0}")]
    Empty(String),

    #[error("Cannot watch {path}: {source}")]
    Watch {
        path: String,
        #[source]
        source: notify::Error,
    },
}

/// Byte-source errors
#[derive(Error, Debug)]
pub enum SourceError {
    /// The file vanished between listing and opening
    #[error("Track not found: {0}")]
    NotFound(String),

    #[error("Failed to read {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to list tracks: {0}")]
    Listing(#[source] std::io::Error),
}

impl SourceError {
    /// Map an IO error on `name`, keeping `NotFound` distinct
    pub fn from_io(name: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SourceError::NotFound(name.to_string())
        } else {
            SourceError::Read {
                name: name.to_string(),
                source: err,
            }
        }
    }
}

/// Duration probing errors. Always recovered with a fallback duration.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to probe {name}: {reason}")]
    Probe { name: String, reason: String },

    #[error("Probe task failed: {0}")]
    Task(String),
}

/// External encoder errors. Always retried with backoff.
#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("Failed to spawn encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write encoder playlist: {0}")]
    Playlist(#[source] std::io::Error),

    #[error("No catalog track has a local path")]
    NoLocalTracks,

    #[error("Encoder stdout was not captured")]
    NoOutput,
}

/// Result type alias for the station
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_kept_distinct() {
        let err = SourceError::from_io(
            "a.mp3",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, SourceError::NotFound(ref n) if n == "a.mp3"));

        let err = SourceError::from_io(
            "b.mp3",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, SourceError::Read { .. }));
    }
}
