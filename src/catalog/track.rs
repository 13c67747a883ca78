//! Track and catalog value types

use serde::Serialize;

/// One playable track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    /// Position in playback order
    pub index: usize,
    /// File name, also the sort key
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Duration read from metadata, if any
    pub probed_duration: Option<f64>,
    /// Duration used for scheduling; always strictly positive
    pub duration: f64,
}

impl Track {
    /// Average bytes per second, assuming a constant bitrate
    pub fn byte_rate(&self) -> f64 {
        self.size as f64 / self.duration
    }

    /// True when `duration` is a fallback rather than probed
    pub fn is_estimated(&self) -> bool {
        self.probed_duration.is_none()
    }
}

/// Immutable, ordered snapshot of the playlist
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    tracks: Vec<Track>,
    /// `ends[i]` = cumulative duration through track `i`
    #[serde(skip)]
    ends: Vec<f64>,
    total_duration: f64,
}

impl Catalog {
    /// Build from tracks already in playback order
    pub fn new(tracks: Vec<Track>) -> Self {
        let mut ends = Vec::with_capacity(tracks.len());
        let mut acc = 0.0;
        for track in &tracks {
            acc += track.duration;
            ends.push(acc);
        }
        Self {
            tracks,
            ends,
            total_duration: acc,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Cumulative duration of the tracks before `index`
    pub fn start_of(&self, index: usize) -> f64 {
        match index {
            0 => 0.0,
            i => self.ends.get(i - 1).copied().unwrap_or(self.total_duration),
        }
    }

    /// Index of the track whose cumulative range contains `elapsed`
    pub(crate) fn index_at(&self, elapsed: f64) -> Option<usize> {
        let index = self.ends.partition_point(|&end| end <= elapsed);
        (index < self.tracks.len()).then_some(index)
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.tracks
            .binary_search_by(|t| t.name.as_str().cmp(name))
            .ok()
    }

    /// Track played after `name`. When `name` is no longer catalogued the
    /// first track sorting after it is chosen, wrapping to the start.
    pub fn next_after(&self, name: &str) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let next = match self.tracks.binary_search_by(|t| t.name.as_str().cmp(name)) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        self.tracks.get(next % self.tracks.len())
    }

    /// (name, size) pairs, used to detect library changes
    pub fn signature(&self) -> Vec<(&str, u64)> {
        self.tracks.iter().map(|t| (t.name.as_str(), t.size)).collect()
    }
}

#[cfg(test)]
pub(crate) fn test_catalog(rows: &[(&str, f64, u64)]) -> Catalog {
    Catalog::new(
        rows.iter()
            .enumerate()
            .map(|(index, (name, duration, size))| Track {
                index,
                name: name.to_string(),
                size: *size,
                probed_duration: Some(*duration),
                duration: *duration,
            })
            .collect(),
    )
}
