//! Refresh actions: the units of display work the scheduler executes.
//!
//! A closed set of variants rather than an open hierarchy; each carries only
//! the data it needs. Manual and auto refreshes always regenerate; loop
//! refreshes consult the artifact cache unless forced or randomized.

use crate::cache::ArtifactCache;
use crate::config::DeviceContext;
use crate::contract::{Artifact, ContentProducer, ContentSettings, Produced};
use crate::error::Result;
use crate::record::{RefreshKind, RefreshRecord};
use crate::store::PluginReference;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

/// A unit of display work: manual, auto, or loop-driven.
#[derive(Debug, Clone)]
pub enum RefreshAction {
    /// Explicit content id and settings; always regenerates.
    Manual {
        /// Content to generate.
        content_id: String,
        /// Settings to generate with.
        settings: ContentSettings,
    },
    /// Regenerate the displayed content in place with its last-used settings.
    Auto {
        /// Currently displayed content id.
        content_id: String,
        /// Settings last used for that content.
        settings: ContentSettings,
    },
    /// Loop-driven display of one content reference.
    Loop {
        /// Owning loop.
        loop_name: String,
        /// Reference to display; its interval drives cache staleness.
        reference: PluginReference,
        /// Bypass the cache unconditionally ("skip to next", "refresh now",
        /// pin switches).
        force: bool,
    },
}

/// What executing an action produced.
#[derive(Debug)]
pub struct ActionOutcome {
    /// Artifact to process, or `None` when the producer skipped.
    pub artifact: Option<Artifact>,
    /// True when the artifact was freshly generated rather than reused.
    pub regenerated: bool,
}

impl RefreshAction {
    /// Content id this action targets.
    pub fn content_id(&self) -> &str {
        match self {
            Self::Manual { content_id, .. } | Self::Auto { content_id, .. } => content_id,
            Self::Loop { reference, .. } => &reference.content_id,
        }
    }

    /// Owning loop name, for loop-driven actions.
    pub fn loop_name(&self) -> Option<&str> {
        match self {
            Self::Loop { loop_name, .. } => Some(loop_name),
            _ => None,
        }
    }

    /// Kind tag recorded in the refresh record.
    pub fn kind(&self) -> RefreshKind {
        match self {
            Self::Manual { .. } => RefreshKind::Manual,
            Self::Auto { .. } => RefreshKind::Auto,
            Self::Loop { .. } => RefreshKind::Loop,
        }
    }

    /// Settings passed to the producer (and display sink).
    pub fn settings(&self) -> &ContentSettings {
        match self {
            Self::Manual { settings, .. } | Self::Auto { settings, .. } => settings,
            Self::Loop { reference, .. } => &reference.content_settings,
        }
    }

    /// Refresh record fields describing a completed run of this action.
    pub fn describe(&self, now: DateTime<Utc>, artifact_hash: Option<String>) -> RefreshRecord {
        RefreshRecord {
            last_refresh_time: Some(now),
            artifact_hash,
            refresh_kind: Some(self.kind()),
            content_id: Some(self.content_id().to_owned()),
            loop_name: self.loop_name().map(str::to_owned),
        }
    }

    /// Run the action against the producer, consulting the cache for
    /// loop-driven work.
    pub async fn execute(
        &self,
        producer: &dyn ContentProducer,
        cache: &ArtifactCache,
        ctx: &DeviceContext,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome> {
        match self {
            Self::Manual { content_id, settings } | Self::Auto { content_id, settings } => {
                let produced = producer.generate(content_id, settings, ctx).await?;
                Ok(outcome(produced))
            }
            Self::Loop { reference, force, .. } => {
                let randomized = wants_random(&reference.content_settings);
                if *force || randomized || reference.should_refresh(now) {
                    let reason = if *force {
                        "forced"
                    } else if randomized {
                        "randomized"
                    } else {
                        "interval elapsed"
                    };
                    info!(content_id = %reference.content_id, reason, "regenerating content");
                    self.regenerate(producer, cache, ctx).await
                } else if let Some(artifact) = cache.load(&reference.content_id)? {
                    debug!(content_id = %reference.content_id, "content still fresh, reusing cached artifact");
                    Ok(ActionOutcome {
                        artifact: Some(artifact),
                        regenerated: false,
                    })
                } else {
                    // Reuse expected but the artifact is gone; degrade by
                    // regenerating once.
                    info!(content_id = %reference.content_id, "no cached artifact, regenerating");
                    self.regenerate(producer, cache, ctx).await
                }
            }
        }
    }

    async fn regenerate(
        &self,
        producer: &dyn ContentProducer,
        cache: &ArtifactCache,
        ctx: &DeviceContext,
    ) -> Result<ActionOutcome> {
        let produced = producer
            .generate(self.content_id(), self.settings(), ctx)
            .await?;
        if let Produced::Artifact(artifact) = &produced {
            cache.store(self.content_id(), artifact)?;
        }
        Ok(outcome(produced))
    }
}

fn outcome(produced: Produced) -> ActionOutcome {
    match produced {
        Produced::Artifact(artifact) => ActionOutcome {
            artifact: Some(artifact),
            regenerated: true,
        },
        Produced::Skip => ActionOutcome {
            artifact: None,
            regenerated: false,
        },
    }
}

/// Settings keys beginning with `randomize` set to true request a fresh
/// random selection on every display, which defeats caching.
fn wants_random(settings: &ContentSettings) -> bool {
    settings.iter().any(|(key, value)| {
        key.starts_with("randomize")
            && match value {
                Value::Bool(b) => *b,
                Value::String(s) => s == "true",
                _ => false,
            }
    })
}
