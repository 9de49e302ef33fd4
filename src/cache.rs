//! On-disk artifact cache keyed by content id.
//!
//! Lets a loop reuse a previously generated artifact (within the same
//! process or after a restart) instead of regenerating on every display.
//! Staleness is decided by the owning reference's refresh interval; see
//! [`crate::store::PluginReference::should_refresh`].

use crate::contract::Artifact;
use crate::error::Result;
use std::path::PathBuf;
use tracing::debug;

/// Per-content artifact store backing reuse-vs-regenerate decisions.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    /// Cache rooted at `dir`. The directory is created lazily on store.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the cache directory if missing.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn artifact_path(&self, content_id: &str) -> PathBuf {
        self.dir.join(format!("{content_id}.art"))
    }

    /// Load the cached artifact for a content id, or `None` when absent.
    pub fn load(&self, content_id: &str) -> Result<Option<Artifact>> {
        match std::fs::read(self.artifact_path(content_id)) {
            Ok(bytes) => Ok(Some(Artifact::new(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(content_id, "no cached artifact");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist an artifact under its content id, replacing any previous one.
    pub fn store(&self, content_id: &str, artifact: &Artifact) -> Result<()> {
        self.ensure_dir()?;
        std::fs::write(self.artifact_path(content_id), &artifact.bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        assert!(cache.load("weather").unwrap().is_none());
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        let artifact = Artifact::new(b"rendered".to_vec());
        cache.store("weather", &artifact).unwrap();
        let loaded = cache.load("weather").unwrap().unwrap();
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn store_replaces_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        cache.store("clock", &Artifact::new(b"one".to_vec())).unwrap();
        cache.store("clock", &Artifact::new(b"two".to_vec())).unwrap();
        assert_eq!(cache.load("clock").unwrap().unwrap().bytes, b"two");
    }

    #[test]
    fn entries_are_keyed_by_content_id() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path());
        cache.store("a", &Artifact::new(b"aa".to_vec())).unwrap();
        cache.store("b", &Artifact::new(b"bb".to_vec())).unwrap();
        assert_eq!(cache.load("a").unwrap().unwrap().bytes, b"aa");
        assert_eq!(cache.load("b").unwrap().unwrap().bytes, b"bb");
    }

    #[test]
    fn store_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(dir.path().join("nested").join("cache"));
        cache.store("a", &Artifact::new(b"x".to_vec())).unwrap();
        assert!(cache.load("a").unwrap().is_some());
    }
}
