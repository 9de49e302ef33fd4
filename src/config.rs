//! Device configuration and the context handed to content producers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Static configuration for the orchestration core.
///
/// Loading/parsing of a config file is the host application's concern; this
/// struct only carries what the core needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// IANA timezone name, passed through to producers that render local times.
    pub timezone: String,
    /// Display resolution (width, height) in pixels.
    pub resolution: (u32, u32),
    /// Path of the persisted schedule document.
    pub document_path: PathBuf,
    /// Directory for cached artifacts.
    pub artifact_dir: PathBuf,
    /// Directory the status snapshot is published into.
    pub status_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let base = default_state_dir();
        Self {
            timezone: "UTC".to_owned(),
            resolution: (800, 480),
            document_path: base.join("schedule.json"),
            artifact_dir: base.join("artifacts"),
            status_dir: base.join("status"),
        }
    }
}

impl DeviceConfig {
    /// Snapshot of device facts passed to every producer call.
    pub fn context(&self) -> DeviceContext {
        DeviceContext {
            timezone: self.timezone.clone(),
            resolution: self.resolution,
        }
    }
}

/// Device facts a content producer may need while generating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceContext {
    /// IANA timezone name.
    pub timezone: String,
    /// Display resolution (width, height) in pixels.
    pub resolution: (u32, u32),
}

/// Default base directory for persisted state.
fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("easel")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_share_base_dir() {
        let config = DeviceConfig::default();
        let parent = config.document_path.parent().map(|p| p.to_path_buf());
        assert!(parent.is_some());
        let parent = parent.unwrap();
        assert!(config.artifact_dir.starts_with(&parent));
        assert!(config.status_dir.starts_with(&parent));
    }

    #[test]
    fn context_copies_device_facts() {
        let mut config = DeviceConfig::default();
        config.timezone = "Europe/Berlin".to_owned();
        config.resolution = (640, 400);
        let ctx = config.context();
        assert_eq!(ctx.timezone, "Europe/Berlin");
        assert_eq!(ctx.resolution, (640, 400));
    }

    #[test]
    fn config_serde_round_trip() {
        let config = DeviceConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.timezone, config.timezone);
        assert_eq!(restored.document_path, config.document_path);
    }
}
