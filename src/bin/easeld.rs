//! Demo daemon wiring the orchestration core to stand-in producers.
//!
//! Renders plain-text artifacts and "displays" them by logging. Useful for
//! watching the scheduler rotate, and as a wiring reference for real hosts.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Local;
use easel::{
    Artifact, ContentProducer, ContentSettings, DeviceConfig, DeviceContext, DisplaySink,
    JsonStore, Persistence, Produced, Result, Scheduler,
};
use std::sync::Arc;
use tracing::info;

/// Renders a one-line text artifact per content id.
struct TextProducer;

#[async_trait]
impl ContentProducer for TextProducer {
    async fn generate(
        &self,
        content_id: &str,
        settings: &ContentSettings,
        ctx: &DeviceContext,
    ) -> Result<Produced> {
        let body = format!(
            "[{}] {} @ {}x{} settings={}",
            Local::now().format("%H:%M:%S"),
            content_id,
            ctx.resolution.0,
            ctx.resolution.1,
            serde_json::Value::Object(settings.clone()),
        );
        Ok(Produced::Artifact(Artifact::new(body.into_bytes())))
    }

    fn display_name(&self, content_id: &str) -> String {
        let mut chars = content_id.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// Display sink that logs instead of driving hardware.
struct LogSink;

#[async_trait]
impl DisplaySink for LogSink {
    async fn display(&self, artifact: &Artifact, _display_settings: &ContentSettings) -> Result<()> {
        info!(
            content = %String::from_utf8_lossy(&artifact.bytes),
            "display updated"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    easel::logging::init();

    let config = DeviceConfig::default();
    let backend = Arc::new(JsonStore::new(&config.document_path));
    let mut document = backend.load().context("loading schedule document")?;

    if document.schedule.loops.is_empty() {
        info!("empty schedule, seeding a demo loop");
        document.schedule.add_loop("demo", "00:00", "24:00")?;
        document.schedule.add_content("demo", "clock", 30)?;
        document.schedule.add_content("demo", "weather", 600)?;
        document.schedule.set_rotation_interval(15);
    }

    let scheduler = Scheduler::new(
        document,
        &config,
        Arc::new(TextProducer),
        Arc::new(LogSink),
        backend,
    );
    let handle = scheduler.handle();
    let task = scheduler.run();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    handle.shutdown();
    task.await.context("joining scheduler task")?;
    Ok(())
}
