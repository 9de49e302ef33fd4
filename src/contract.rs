//! Contracts for the external collaborators: content producers and the
//! display sink.
//!
//! The core never renders anything itself; it calls a [`ContentProducer`] to
//! obtain an [`Artifact`] and hands the result to a [`DisplaySink`].

use crate::config::DeviceContext;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Opaque settings map owned by a content generator.
///
/// The scheduler never interprets these beyond the generator-level flags it
/// is told about (auto-refresh cadence, randomized selection).
pub type ContentSettings = Map<String, Value>;

/// A generated artifact ready for the display sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Encoded artifact bytes (typically a rendered image).
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Wrap raw artifact bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Hex-encoded SHA-256 of the artifact bytes, used for change detection.
    pub fn sha256_hex(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Result of a generation call.
#[derive(Debug, Clone)]
pub enum Produced {
    /// A fresh artifact to process and (maybe) display.
    Artifact(Artifact),
    /// Nothing should change on the display right now (e.g. a grace period
    /// after signal loss). Treated as a successful no-op.
    Skip,
}

/// A content generator behind the single generation contract.
#[async_trait]
pub trait ContentProducer: Send + Sync {
    /// Generate an artifact for `content_id` with the given settings.
    async fn generate(
        &self,
        content_id: &str,
        settings: &ContentSettings,
        ctx: &DeviceContext,
    ) -> Result<Produced>;

    /// Human-readable name for status snapshots. Defaults to the id.
    fn display_name(&self, content_id: &str) -> String {
        content_id.to_owned()
    }
}

/// The physical display output.
#[async_trait]
pub trait DisplaySink: Send + Sync {
    /// Push an artifact to the display.
    async fn display(&self, artifact: &Artifact, display_settings: &ContentSettings) -> Result<()>;
}
