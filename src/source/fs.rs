//! Directory-backed byte source

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncSeekExt, BufReader};

use super::{ByteSource, ByteStream, TrackEntry};
use crate::error::SourceError;

/// Serves every file in one directory whose extension is accepted
pub struct DirectorySource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Self {
        Self {
            root: root.into(),
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    /// Resolve `name` inside the root, refusing anything that could escape it
    fn resolve(&self, name: &str) -> Result<PathBuf, SourceError> {
        let candidate = Path::new(name);
        let single_component = candidate.components().count() == 1
            && candidate.file_name().map(|f| f == candidate.as_os_str()).unwrap_or(false);
        if !single_component {
            return Err(SourceError::NotFound(name.to_string()));
        }
        Ok(self.root.join(candidate))
    }
}

#[async_trait]
impl ByteSource for DirectorySource {
    async fn list_tracks(&self) -> Result<Vec<TrackEntry>, SourceError> {
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(SourceError::Listing)?;

        let mut tracks = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(SourceError::Listing)? {
            let path = entry.path();
            if !self.accepts(&path) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!("Skipping non UTF-8 file name {}", path.display());
                continue;
            };
            tracks.push(TrackEntry {
                name,
                size: metadata.len(),
            });
        }
        Ok(tracks)
    }

    async fn open_range(&self, name: &str, start: u64) -> Result<ByteStream, SourceError> {
        let path = self.resolve(name)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| SourceError::from_io(name, e))?;
        if start > 0 {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| SourceError::from_io(name, e))?;
        }
        Ok(Box::pin(BufReader::new(file)))
    }

    fn local_path(&self, name: &str) -> Option<PathBuf> {
        let path = self.resolve(name).ok()?;
        std::path::absolute(&path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn source_with(files: &[(&str, &[u8])]) -> (tempfile::TempDir, DirectorySource) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let source = DirectorySource::new(dir.path(), &["mp3".to_string()]);
        (dir, source)
    }

    #[tokio::test]
    async fn test_lists_only_accepted_extensions() {
        let (_dir, source) = source_with(&[
            ("b.mp3", b"bbbb"),
            ("a.MP3", b"aa"),
            ("notes.txt", b"ignored"),
        ]);

        let mut tracks = source.list_tracks().await.unwrap();
        tracks.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            tracks,
            vec![
                TrackEntry { name: "a.MP3".into(), size: 2 },
                TrackEntry { name: "b.mp3".into(), size: 4 },
            ]
        );
    }

    #[tokio::test]
    async fn test_open_range_seeks() {
        let (_dir, source) = source_with(&[("a.mp3", b"0123456789")]);

        let mut stream = source.open_range("a.mp3", 6).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"6789");
    }

    #[tokio::test]
    async fn test_vanished_file_is_not_found() {
        let (dir, source) = source_with(&[("a.mp3", b"x")]);
        std::fs::remove_file(dir.path().join("a.mp3")).unwrap();

        let result = source.open_range("a.mp3", 0).await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, source) = source_with(&[("a.mp3", b"x")]);
        let result = source.open_range("../a.mp3", 0).await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
        assert!(source.local_path("../etc/passwd").is_none());
    }

    #[tokio::test]
    async fn test_missing_root_fails_listing() {
        let source = DirectorySource::new("/definitely/not/here", &["mp3".to_string()]);
        assert!(matches!(source.list_tracks().await, Err(SourceError::Listing(_))));
    }
}
