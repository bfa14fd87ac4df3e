//! Cached front end over a [`MediaInspector`].

use super::{MediaInspector, ProbeContainer};
use dashmap::DashMap;
use reelforge_common::{Error, FileLocator, Result, Stream, StreamKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Cached inspection result, valid while the file's mtime is unchanged.
struct CacheEntry<T> {
    value: Arc<T>,
    file_modified: Option<SystemTime>,
}

impl<T> CacheEntry<T> {
    fn matches(&self, modified: Option<SystemTime>) -> bool {
        self.file_modified == modified
    }
}

/// Stream prober with a per-file result cache.
///
/// Concurrent first probes of the same file may both run the inspection
/// tool; each cache write replaces the entry atomically, so readers always see
/// a complete result.
pub struct Prober {
    inspector: Arc<dyn MediaInspector>,
    library_root: PathBuf,
    probes: DashMap<PathBuf, CacheEntry<ProbeContainer>>,
    keyframes: DashMap<(PathBuf, u32), CacheEntry<Vec<i64>>>,
}

impl Prober {
    /// Create a prober resolving locators against `library_root`.
    pub fn new(inspector: Arc<dyn MediaInspector>, library_root: impl Into<PathBuf>) -> Self {
        Self {
            inspector,
            library_root: library_root.into(),
            probes: DashMap::new(),
            keyframes: DashMap::new(),
        }
    }

    /// Directory that file locators are resolved against.
    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Absolute path of the file behind a locator.
    pub fn resolve(&self, locator: &FileLocator) -> Result<PathBuf> {
        locator.resolve(&self.library_root)
    }

    /// Modification time of the file behind a locator.
    pub async fn file_modified(&self, locator: &FileLocator) -> Result<Option<SystemTime>> {
        let path = self.resolve(locator)?;
        let (modified, _) = stat(&path).await?;
        Ok(modified)
    }

    /// Probe a file by locator.
    pub async fn probe(&self, locator: &FileLocator) -> Result<Arc<ProbeContainer>> {
        let path = self.resolve(locator)?;
        self.probe_path(&path).await
    }

    /// Probe a file by absolute path.
    ///
    /// # Errors
    ///
    /// [`Error::ProbeFailure`] when the file is missing or the tool fails,
    /// [`Error::NoStreamsFound`] when the tool reports no streams.
    pub async fn probe_path(&self, path: &Path) -> Result<Arc<ProbeContainer>> {
        let (modified, len) = stat(path).await?;

        if let Some(entry) = self.probes.get(path) {
            if entry.matches(modified) {
                tracing::trace!(path = %path.display(), "Probe cache hit");
                return Ok(Arc::clone(&entry.value));
            }
        }

        tracing::debug!(path = %path.display(), "Probing file");
        let mut container = self.inspector.inspect(path).await?;
        if container.streams.is_empty() {
            return Err(Error::NoStreamsFound(path.display().to_string()));
        }
        if container.format.size.is_none() {
            container.format.size = Some(len);
        }

        let value = Arc::new(container);
        self.probes.insert(
            path.to_path_buf(),
            CacheEntry {
                value: Arc::clone(&value),
                file_modified: modified,
            },
        );
        Ok(value)
    }

    /// All playable streams of a file.
    pub async fn streams(&self, locator: &FileLocator) -> Result<Vec<Stream>> {
        let container = self.probe(locator).await?;
        let streams = container.to_streams();
        if streams.is_empty() {
            return Err(Error::NoStreamsFound(locator.to_string()));
        }
        Ok(streams)
    }

    /// Re-derive a single stream by key.
    pub async fn get_stream(&self, key: &StreamKey) -> Result<Stream> {
        self.streams(&key.locator)
            .await?
            .into_iter()
            .find(|s| s.index == key.stream_index)
            .ok_or_else(|| Error::StreamNotFound {
                locator: key.locator.to_string(),
                index: key.stream_index,
            })
    }

    /// Keyframe timestamps of a stream, cached like probe results.
    pub async fn keyframes(&self, key: &StreamKey) -> Result<Arc<Vec<i64>>> {
        let path = self.resolve(&key.locator)?;
        let (modified, _) = stat(&path).await?;
        let cache_key = (path, key.stream_index);

        if let Some(entry) = self.keyframes.get(&cache_key) {
            if entry.matches(modified) {
                return Ok(Arc::clone(&entry.value));
            }
        }

        tracing::debug!(stream = %key, "Scanning keyframes");
        let frames = self
            .inspector
            .keyframes(&cache_key.0, key.stream_index)
            .await?;
        let value = Arc::new(frames);
        self.keyframes.insert(
            cache_key,
            CacheEntry {
                value: Arc::clone(&value),
                file_modified: modified,
            },
        );
        Ok(value)
    }

    /// Drop everything cached for a file.
    pub fn invalidate(&self, path: &Path) {
        self.probes.remove(path);
        self.keyframes.retain(|(p, _), _| p != path);
    }

    /// Number of cached probe results.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether the probe cache is empty.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

async fn stat(path: &Path) -> Result<(Option<SystemTime>, u64)> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::probe_failure(path.display(), e.to_string()))?;
    if !metadata.is_file() {
        return Err(Error::probe_failure(path.display(), "not a regular file"));
    }
    Ok((metadata.modified().ok(), metadata.len()))
}
