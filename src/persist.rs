//! Durable persistence of the schedule document, with write batching.
//!
//! The full document (schedule + refresh record + tracking) is written as one
//! JSON file with atomic replace semantics. Routine bookkeeping is batched to
//! bound storage wear on flash media; structural edits and shutdown flush
//! immediately.

use crate::error::{EaselError, Result};
use crate::record::{RefreshRecord, RefreshTracking};
use crate::store::ScheduleStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Completed actions between batched durable writes.
pub const DEFAULT_WRITE_INTERVAL: u32 = 12;

const DOCUMENT_VERSION: u8 = 1;

fn default_version() -> u8 {
    DOCUMENT_VERSION
}

/// The full persisted state of the orchestration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    /// Schema version.
    #[serde(default = "default_version")]
    pub version: u8,
    /// Loops, rotation settings, override.
    pub schedule: ScheduleStore,
    /// Metadata of the last executed action.
    pub record: RefreshRecord,
    /// Auto-refresh and rotation tracking.
    pub tracking: RefreshTracking,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            schedule: ScheduleStore::default(),
            record: RefreshRecord::default(),
            tracking: RefreshTracking::default(),
        }
    }
}

/// Storage backend for the schedule document.
pub trait Persistence: Send + Sync {
    /// Load the document, or a default when none has been written yet.
    fn load(&self) -> Result<Document>;

    /// Durably save the document with atomic replace semantics.
    fn save(&self, document: &Document) -> Result<()>;
}

/// JSON file store with temp-file-then-rename atomicity.
///
/// When the atomic path fails (e.g. cross-device rename quirks), falls back
/// to a best-effort direct write rather than losing the update entirely.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    /// Store backed by the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn save_atomic(&self, json: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Persistence for JsonStore {
    fn load(&self) -> Result<Document> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no document on disk, starting fresh");
                return Ok(Document::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            EaselError::Config(format!(
                "cannot parse document '{}': {e}",
                self.path.display()
            ))
        })
    }

    fn save(&self, document: &Document) -> Result<()> {
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| EaselError::Config(format!("cannot serialize document: {e}")))?;
        if let Err(e) = self.save_atomic(&json) {
            warn!(error = %e, "atomic document write failed, falling back to direct write");
            std::fs::write(&self.path, json.as_bytes())?;
        }
        Ok(())
    }
}

/// Batches durable writes to bound storage wear.
///
/// Routine bookkeeping is flushed every [`DEFAULT_WRITE_INTERVAL`] completed
/// actions; it can be lost on crash and re-derived on boot. Structural edits
/// go through [`Self::flush`] immediately.
pub struct PersistenceBatcher {
    backend: Arc<dyn Persistence>,
    write_interval: u32,
    counter: u32,
}

impl PersistenceBatcher {
    /// Batcher over `backend` with the default write interval.
    pub fn new(backend: Arc<dyn Persistence>) -> Self {
        Self {
            backend,
            write_interval: DEFAULT_WRITE_INTERVAL,
            counter: 0,
        }
    }

    /// Override the write interval (mainly for tests).
    pub fn with_interval(mut self, every: u32) -> Self {
        self.write_interval = every.max(1);
        self
    }

    /// Record one completed action, flushing every `write_interval` actions.
    /// Returns `true` when a durable write happened.
    pub fn completed_action(&mut self, document: &Document) -> Result<bool> {
        self.counter += 1;
        if self.counter < self.write_interval {
            return Ok(false);
        }
        debug!(actions = self.counter, "writing document (batched)");
        self.backend.save(document)?;
        self.counter = 0;
        Ok(true)
    }

    /// Unconditional durable write; resets the batch counter.
    pub fn flush(&mut self, document: &Document) -> Result<()> {
        self.backend.save(document)?;
        self.counter = 0;
        Ok(())
    }

    /// Actions recorded since the last durable write.
    pub fn pending_actions(&self) -> u32 {
        self.counter
    }
}
