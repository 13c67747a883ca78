//! In-memory byte source

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::Cursor;

use super::{ByteSource, ByteStream, TrackEntry};
use crate::error::SourceError;

/// Tracks held in memory. Entries can be added, replaced and removed while
/// the station runs, which makes it handy for embedding and for tests.
#[derive(Default)]
pub struct MemorySource {
    tracks: RwLock<BTreeMap<String, Bytes>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(self, name: &str, data: impl Into<Bytes>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn insert(&self, name: &str, data: impl Into<Bytes>) {
        self.tracks.write().insert(name.to_string(), data.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.tracks.write().remove(name).is_some()
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    async fn list_tracks(&self) -> Result<Vec<TrackEntry>, SourceError> {
        Ok(self
            .tracks
            .read()
            .iter()
            .map(|(name, data)| TrackEntry {
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect())
    }

    async fn open_range(&self, name: &str, start: u64) -> Result<ByteStream, SourceError> {
        let data = self
            .tracks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        let start = (start as usize).min(data.len());
        Ok(Box::pin(Cursor::new(data.slice(start..))))
    }
}
