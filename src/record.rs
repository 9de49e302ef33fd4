//! Refresh bookkeeping: what is on the display, when it got there, and why.

use crate::contract::ContentSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of action produced the current display contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// Explicit user-triggered refresh.
    Manual,
    /// In-place regeneration of the displayed content.
    Auto,
    /// Loop-driven rotation.
    Loop,
}

/// Metadata for the most recent executed action.
///
/// Replaced wholesale after every action; never partially mutated. A fresh
/// device has an all-empty record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshRecord {
    /// When the action completed.
    pub last_refresh_time: Option<DateTime<Utc>>,
    /// Hex SHA-256 of the displayed artifact, for change detection.
    pub artifact_hash: Option<String>,
    /// Kind of the action.
    pub refresh_kind: Option<RefreshKind>,
    /// Content id the action targeted.
    pub content_id: Option<String>,
    /// Owning loop, present only for loop-driven refreshes.
    pub loop_name: Option<String>,
}

/// Auto-refresh and rotation tracking that survives restarts.
///
/// Kept separate from [`RefreshRecord`]: the record describes the last
/// action, this describes the cadence state the scheduler steers by.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshTracking {
    /// Settings last used for the currently displayed content.
    pub content_settings: ContentSettings,
    /// Auto-refresh cadence of the displayed content, in seconds.
    pub cadence_seconds: Option<u64>,
    /// When the displayed content was last generated and shown.
    pub last_display_time: Option<DateTime<Utc>>,
    /// When the last loop rotation happened. Auto-refreshes do not touch
    /// this, so they cannot starve rotation.
    pub last_rotation_time: Option<DateTime<Utc>>,
}

impl RefreshTracking {
    /// True when the displayed content declares a cadence and it has elapsed.
    pub fn auto_refresh_due(&self, now: DateTime<Utc>) -> bool {
        let (Some(cadence), Some(last)) = (self.cadence_seconds, self.last_display_time) else {
            return false;
        };
        (now - last).num_seconds() >= cadence as i64
    }

    /// True when no rotation has ever happened or the interval has elapsed.
    pub fn rotation_due(&self, now: DateTime<Utc>, interval_seconds: u64) -> bool {
        match self.last_rotation_time {
            None => true,
            Some(last) => (now - last).num_seconds() >= interval_seconds as i64,
        }
    }
}

/// Extract an auto-refresh cadence from generator settings.
///
/// The `auto_refresh` key holds minutes, as a number or numeric string.
pub fn cadence_from_settings(settings: &ContentSettings) -> Option<u64> {
    let minutes = match settings.get("auto_refresh")? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (minutes > 0).then_some(minutes * 60)
}
