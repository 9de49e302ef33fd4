//! # easel
//!
//! Display orchestration core for slow, single-output devices (e-paper
//! frames, status panels). It owns the decision of what to render next and
//! when: time-windowed loops rotate content on a global cadence, manual
//! triggers and pins override the schedule, and artifacts are cached so a
//! rotation can reuse fresh content without regenerating it.
//!
//! The host application supplies the two edges: a [`ContentProducer`] that
//! renders artifacts and a [`DisplaySink`] that pushes them to hardware.
//! Everything between, scheduling, caching, batched persistence, status
//! snapshots, lives here.
//!
//! ```no_run
//! use easel::{DeviceConfig, JsonStore, Persistence, Scheduler};
//! use std::sync::Arc;
//! # use easel::{Artifact, ContentProducer, ContentSettings, DeviceContext,
//! #     DisplaySink, Produced, Result};
//! # struct MyProducer;
//! # #[async_trait::async_trait]
//! # impl ContentProducer for MyProducer {
//! #     async fn generate(&self, _: &str, _: &ContentSettings, _: &DeviceContext)
//! #         -> Result<Produced> { Ok(Produced::Skip) }
//! # }
//! # struct MySink;
//! # #[async_trait::async_trait]
//! # impl DisplaySink for MySink {
//! #     async fn display(&self, _: &Artifact, _: &ContentSettings) -> Result<()> { Ok(()) }
//! # }
//!
//! # async fn demo() -> Result<()> {
//! let config = DeviceConfig::default();
//! let backend = Arc::new(JsonStore::new(&config.document_path));
//! let document = backend.load()?;
//! let scheduler = Scheduler::new(
//!     document,
//!     &config,
//!     Arc::new(MyProducer),
//!     Arc::new(MySink),
//!     backend,
//! );
//! let handle = scheduler.handle();
//! let _task = scheduler.run();
//! handle.trigger_manual_blocking("clock", ContentSettings::new()).await?;
//! handle.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod contract;
pub mod error;
pub mod logging;
pub mod persist;
pub mod record;
pub mod scheduler;
pub mod status;
pub mod store;

pub use cache::ArtifactCache;
pub use config::{DeviceConfig, DeviceContext};
pub use contract::{Artifact, ContentProducer, ContentSettings, DisplaySink, Produced};
pub use error::{EaselError, Result};
pub use persist::{Document, JsonStore, Persistence, PersistenceBatcher};
pub use record::{RefreshKind, RefreshRecord, RefreshTracking};
pub use scheduler::{RefreshAction, Scheduler, SchedulerHandle};
pub use status::{Stage, StatusReporter, StatusSnapshot};
pub use store::{Loop, Pin, PluginReference, ScheduleStore};
