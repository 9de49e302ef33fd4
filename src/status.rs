//! Atomically published status snapshots for external pollers.
//!
//! The scheduler publishes a small JSON snapshot after each phase transition.
//! Pollers (the loops page, diagnostics) read the file directly; writes go
//! through a temp file and a rename so a reader never sees a torn snapshot.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// File name of the published snapshot inside the status directory.
const STATUS_FILE: &str = "refresh_status.json";

/// Phase of the scheduler as seen by external pollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for the next tick or signal.
    Idle,
    /// Deciding the next action.
    Evaluating,
    /// A producer is generating content.
    Generating,
    /// Hashing and comparing the generated artifact.
    Processing,
    /// Sending the artifact to the display sink.
    Displaying,
    /// The display was updated.
    Displayed,
    /// The last action failed.
    Error,
}

/// One published status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Current phase.
    pub stage: Stage,
    /// Human-readable detail line.
    pub detail: String,
    /// Content id being worked on, empty when idle.
    pub content_id: String,
    /// Display name of that content, empty when idle.
    pub content_name: String,
    /// Unix epoch seconds at publish time.
    pub timestamp: i64,
}

/// Publishes status snapshots with temp-then-rename atomicity.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    dir: PathBuf,
}

impl StatusReporter {
    /// Reporter rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the status directory and remove temp files orphaned by a crash.
    pub fn prepare(&self) -> crate::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        for entry in std::fs::read_dir(&self.dir)? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }

    /// Path of the visible snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    /// Publish a snapshot. Failures are logged and swallowed; status is
    /// advisory and must never take the scheduler down.
    pub fn publish(&self, stage: Stage, detail: &str, content_id: &str, content_name: &str) {
        let snapshot = StatusSnapshot {
            stage,
            detail: detail.to_owned(),
            content_id: content_id.to_owned(),
            content_name: content_name.to_owned(),
            timestamp: Utc::now().timestamp(),
        };
        if let Err(e) = self.write_atomic(&snapshot) {
            debug!(error = %e, "status publish failed");
        }
    }

    /// Read the current snapshot, or `None` when none has been published.
    pub fn read(&self) -> crate::Result<Option<StatusSnapshot>> {
        let bytes = match std::fs::read(self.snapshot_path()) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| crate::EaselError::Config(format!("cannot parse status snapshot: {e}")))
    }

    fn write_atomic(&self, snapshot: &StatusSnapshot) -> crate::Result<()> {
        let json = serde_json::to_string(snapshot)
            .map_err(|e| crate::EaselError::Config(format!("cannot serialize status: {e}")))?;
        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{STATUS_FILE}.{}.tmp", std::process::id()));
        std::fs::write(&tmp, json.as_bytes())?;
        std::fs::rename(&tmp, self.snapshot_path())?;
        Ok(())
    }
}
