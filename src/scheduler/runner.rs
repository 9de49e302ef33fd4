//! The scheduler task and its control handle.
//!
//! One background task owns all display work. Control surfaces (HTTP
//! blueprints, CLI) hold a cheap [`SchedulerHandle`]; requests and schedule
//! edits go through shared state guarded by a single mutex, and a [`Notify`]
//! wakes the task out of its idle sleep.
//!
//! Evaluation priority per wake: queued request, then pinned content, then
//! loop rotation, then in-place auto refresh.

use crate::cache::ArtifactCache;
use crate::config::{DeviceConfig, DeviceContext};
use crate::contract::{ContentProducer, ContentSettings, DisplaySink};
use crate::error::{EaselError, Result};
use crate::persist::{Document, Persistence, PersistenceBatcher};
use crate::record::{cadence_from_settings, RefreshKind, RefreshRecord, RefreshTracking};
use crate::scheduler::actions::RefreshAction;
use crate::status::{Stage, StatusReporter};
use crate::store::{Pin, ScheduleStore};
use chrono::{DateTime, Local, NaiveTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Grace period before the first evaluation, so a freshly booted host can
/// finish coming up before the display churns.
const STARTUP_DELAY: Duration = Duration::from_secs(2);

/// Idle poll floor when neither rotation nor auto refresh is armed.
const IDLE_POLL_SECS: u64 = 60;

/// A queued display request. At most one is held; a newer request replaces
/// an older one, and the older caller (if waiting) is told so.
struct PendingRequest {
    action: RefreshAction,
    done: Option<oneshot::Sender<Result<()>>>,
}

/// State shared between the scheduler task and its handles.
struct SharedState {
    store: ScheduleStore,
    pending: Option<PendingRequest>,
    flush_requested: bool,
    running: bool,
}

struct Shared {
    state: Mutex<SharedState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SharedState> {
        // A poisoned lock only means another thread panicked mid-update;
        // the schedule data is still the best state we have.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cheap cloneable control surface over the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    fn queue_request(
        &self,
        action: RefreshAction,
        done: Option<oneshot::Sender<Result<()>>>,
    ) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if !state.running {
                return Err(EaselError::Channel(
                    "scheduler is not running".to_owned(),
                ));
            }
            if let Some(previous) = state.pending.take() {
                warn!(
                    content_id = previous.action.content_id(),
                    "dropping queued request in favor of a newer one"
                );
                if let Some(previous_done) = previous.done {
                    let _ = previous_done.send(Err(EaselError::Channel(
                        "superseded by a newer request".to_owned(),
                    )));
                }
            }
            state.pending = Some(PendingRequest { action, done });
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Queue a manual display of `content_id` and wait for it to complete.
    ///
    /// Fails with a channel error when a newer request replaces this one
    /// before it runs, or when the scheduler shuts down first.
    pub async fn trigger_manual_blocking(
        &self,
        content_id: &str,
        settings: ContentSettings,
    ) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.queue_request(
            RefreshAction::Manual {
                content_id: content_id.to_owned(),
                settings,
            },
            Some(tx),
        )?;
        rx.await
            .map_err(|_| EaselError::Channel("scheduler dropped the request".to_owned()))?
    }

    /// Queue a manual display of `content_id` without waiting. Fails only
    /// when the scheduler is not running.
    pub fn trigger_manual_nonblocking(
        &self,
        content_id: &str,
        settings: ContentSettings,
    ) -> Result<()> {
        self.queue_request(
            RefreshAction::Manual {
                content_id: content_id.to_owned(),
                settings,
            },
            None,
        )
    }

    /// Wake the scheduler early, optionally forcing a durable flush on its
    /// next evaluation.
    pub fn signal_schedule_changed(&self, force_flush: bool) {
        if force_flush {
            self.shared.lock().flush_requested = true;
        }
        self.shared.wake.notify_one();
    }

    /// Advance the active loop's rotation immediately, bypassing the
    /// rotation interval and the artifact cache.
    pub fn skip_to_next(&self) -> Result<()> {
        let action = {
            let mut state = self.shared.lock();
            let name = state
                .store
                .resolve_active_loop(Local::now().time())
                .map(|l| l.name.clone())
                .ok_or_else(|| EaselError::Config("no loop is active right now".to_owned()))?;
            state.store.active_loop = Some(name.clone());
            let reference = state
                .store
                .get_loop_mut(&name)
                .and_then(|l| l.next_content_reference())
                .cloned()
                .ok_or_else(|| {
                    EaselError::Config(format!("loop '{name}' has no content to show"))
                })?;
            RefreshAction::Loop {
                loop_name: name,
                reference,
                force: true,
            }
        };
        self.queue_request(action, None)
    }

    /// Regenerate one loop-owned content right now, bypassing its cache.
    pub fn refresh_content_now(&self, loop_name: &str, content_id: &str) -> Result<()> {
        let reference = {
            let state = self.shared.lock();
            state
                .store
                .get_loop(loop_name)
                .ok_or_else(|| EaselError::Config(format!("loop '{loop_name}' not found")))?
                .get_content(content_id)
                .ok_or_else(|| {
                    EaselError::Config(format!(
                        "content '{content_id}' not in loop '{loop_name}'"
                    ))
                })?
                .clone()
        };
        self.queue_request(
            RefreshAction::Loop {
                loop_name: loop_name.to_owned(),
                reference,
                force: true,
            },
            None,
        )
    }

    /// Apply a structural edit to the schedule. The document is flushed to
    /// disk on the scheduler's next wake, skipping the write batch.
    pub fn edit_schedule<F, R>(&self, edit: F) -> Result<R>
    where
        F: FnOnce(&mut ScheduleStore) -> Result<R>,
    {
        let result = {
            let mut state = self.shared.lock();
            let result = edit(&mut state.store)?;
            state.flush_requested = true;
            result
        };
        self.shared.wake.notify_one();
        Ok(result)
    }

    /// Read access to the schedule.
    pub fn with_store<F, R>(&self, read: F) -> R
    where
        F: FnOnce(&ScheduleStore) -> R,
    {
        read(&self.shared.lock().store)
    }

    /// Create a loop.
    pub fn add_loop(&self, name: &str, start_time: &str, end_time: &str) -> Result<()> {
        self.edit_schedule(|store| store.add_loop(name, start_time, end_time))
    }

    /// Rename a loop and/or change its window.
    pub fn update_loop(
        &self,
        old_name: &str,
        new_name: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<()> {
        self.edit_schedule(|store| store.update_loop(old_name, new_name, start_time, end_time))
    }

    /// Delete a loop.
    pub fn delete_loop(&self, name: &str) -> Result<()> {
        self.edit_schedule(|store| store.delete_loop(name))
    }

    /// Append a content reference to a loop.
    pub fn add_content(
        &self,
        loop_name: &str,
        content_id: &str,
        refresh_interval_seconds: u64,
    ) -> Result<()> {
        self.edit_schedule(|store| store.add_content(loop_name, content_id, refresh_interval_seconds))
    }

    /// Remove a content reference from a loop.
    pub fn remove_content(&self, loop_name: &str, content_id: &str) -> Result<()> {
        self.edit_schedule(|store| store.remove_content(loop_name, content_id))
    }

    /// Reorder a loop's rotation.
    pub fn reorder_content(&self, loop_name: &str, content_ids: &[String]) -> Result<()> {
        self.edit_schedule(|store| store.reorder_content(loop_name, content_ids))
    }

    /// Set a loop's randomize flag. Returns the new value.
    pub fn set_randomize(&self, loop_name: &str, randomize: bool) -> Result<bool> {
        self.edit_schedule(|store| store.set_randomize(loop_name, randomize))
    }

    /// Overlay settings onto a loop-owned content reference.
    pub fn update_content_settings(
        &self,
        loop_name: &str,
        content_id: &str,
        settings: ContentSettings,
        refresh_interval_seconds: Option<u64>,
    ) -> Result<()> {
        self.edit_schedule(|store| {
            store.update_content_settings(loop_name, content_id, settings, refresh_interval_seconds)
        })
    }

    /// Set the global rotation cadence in seconds.
    pub fn set_rotation_interval(&self, seconds: u64) -> Result<()> {
        self.edit_schedule(|store| {
            store.set_rotation_interval(seconds);
            Ok(())
        })
    }

    /// Enable or disable loop rotation.
    pub fn set_rotation_enabled(&self, enabled: bool) -> Result<()> {
        self.edit_schedule(|store| {
            store.set_rotation_enabled(enabled);
            Ok(())
        })
    }

    /// Pin one content id onto the display until cleared.
    pub fn pin_content(&self, content_id: &str) -> Result<()> {
        self.edit_schedule(|store| {
            store.set_pin(Pin::Content {
                content_id: content_id.to_owned(),
            });
            Ok(())
        })
    }

    /// Pin resolution to one loop regardless of its window.
    pub fn pin_loop(&self, name: &str) -> Result<()> {
        self.edit_schedule(|store| {
            store.set_pin(Pin::Loop {
                name: name.to_owned(),
            });
            Ok(())
        })
    }

    /// Clear any pin; window resolution resumes on the next evaluation.
    pub fn clear_pin(&self) -> Result<()> {
        self.edit_schedule(|store| {
            store.clear_pin();
            Ok(())
        })
    }

    /// Ask the scheduler to stop after its current action and flush.
    pub fn shutdown(&self) {
        self.shared.lock().running = false;
        self.shared.wake.notify_one();
    }

    /// False once shutdown has been requested.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }
}

/// What one evaluation pass decided.
struct Evaluation {
    action: Option<RefreshAction>,
    done: Option<oneshot::Sender<Result<()>>>,
    flush: bool,
    running: bool,
}

/// The scheduler task state. Built once, then consumed by [`Self::run`].
pub struct Scheduler {
    shared: Arc<Shared>,
    producer: Arc<dyn ContentProducer>,
    sink: Arc<dyn DisplaySink>,
    cache: ArtifactCache,
    batcher: PersistenceBatcher,
    status: StatusReporter,
    ctx: DeviceContext,
    record: RefreshRecord,
    tracking: RefreshTracking,
}

impl Scheduler {
    /// Build a scheduler from a loaded document and device configuration.
    pub fn new(
        document: Document,
        config: &DeviceConfig,
        producer: Arc<dyn ContentProducer>,
        sink: Arc<dyn DisplaySink>,
        backend: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SharedState {
                    store: document.schedule,
                    pending: None,
                    flush_requested: false,
                    running: true,
                }),
                wake: Notify::new(),
            }),
            producer,
            sink,
            cache: ArtifactCache::new(&config.artifact_dir),
            batcher: PersistenceBatcher::new(backend),
            status: StatusReporter::new(&config.status_dir),
            ctx: config.context(),
            record: document.record,
            tracking: document.tracking,
        }
    }

    /// Override the batched write interval (mainly for tests).
    pub fn with_write_interval(mut self, every: u32) -> Self {
        self.batcher = self.batcher.with_interval(every);
        self
    }

    /// A control handle; valid before and while the task runs.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the scheduler task.
    pub fn run(self) -> JoinHandle<()> {
        tokio::spawn(self.run_loop())
    }

    async fn run_loop(mut self) {
        if let Err(e) = self.status.prepare() {
            warn!(error = %e, "cannot prepare status directory");
        }
        if let Err(e) = self.cache.ensure_dir() {
            warn!(error = %e, "cannot prepare artifact cache directory");
        }
        self.status.publish(Stage::Idle, "Starting up...", "", "");
        info!("scheduler started");

        let mut first = true;
        loop {
            let wait = if first {
                STARTUP_DELAY
            } else {
                let secs = self.next_sleep_seconds();
                self.status.publish(
                    Stage::Idle,
                    &format!("Next action in {}", format_countdown(secs)),
                    "",
                    "",
                );
                Duration::from_secs(secs)
            };
            first = false;

            tokio::select! {
                _ = self.shared.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }

            self.status.publish(Stage::Evaluating, "Evaluating schedule...", "", "");
            let evaluation = self.evaluate(Utc::now(), Local::now().time());
            if evaluation.flush {
                self.flush_now();
            }
            if !evaluation.running {
                if let Some(done) = evaluation.done {
                    let _ = done.send(Err(EaselError::Channel(
                        "scheduler shutting down".to_owned(),
                    )));
                }
                break;
            }
            if let Some(action) = evaluation.action {
                self.execute(action, evaluation.done).await;
            }
        }

        self.flush_now();
        self.status.publish(Stage::Idle, "Stopped", "", "");
        info!("scheduler stopped");
    }

    /// Decide the next action under one lock acquisition.
    fn evaluate(&mut self, now: DateTime<Utc>, local: NaiveTime) -> Evaluation {
        let mut state = self.shared.lock();
        let running = state.running;
        let flush = std::mem::take(&mut state.flush_requested);

        if let Some(pending) = state.pending.take() {
            return Evaluation {
                action: Some(pending.action),
                done: pending.done,
                flush,
                running,
            };
        }
        if !running {
            return Evaluation {
                action: None,
                done: None,
                flush,
                running,
            };
        }

        if let Some(Pin::Content { content_id }) = state.store.pin.clone() {
            if self.record.content_id.as_deref() != Some(content_id.as_str()) {
                return Evaluation {
                    action: Some(pin_action(&state.store, &content_id)),
                    done: None,
                    flush,
                    running,
                };
            }
            // Pinned content is already showing. Rotation stays held; an
            // in-place auto refresh may still apply below.
        } else if state.store.rotation_enabled
            && self
                .tracking
                .rotation_due(now, state.store.rotation_interval_seconds)
        {
            let resolved = state
                .store
                .resolve_active_loop(local)
                .map(|l| l.name.clone());
            let action = resolved.and_then(|name| {
                state.store.active_loop = Some(name.clone());
                let reference = state
                    .store
                    .get_loop_mut(&name)?
                    .next_content_reference()?
                    .clone();
                Some(RefreshAction::Loop {
                    loop_name: name,
                    reference,
                    force: false,
                })
            });
            if action.is_none() {
                debug!("rotation due but no loop is active");
            }
            // Rotation owns this tick even when nothing resolved.
            return Evaluation {
                action,
                done: None,
                flush,
                running,
            };
        }

        if self.tracking.auto_refresh_due(now) {
            if let Some(content_id) = self.record.content_id.clone() {
                return Evaluation {
                    action: Some(RefreshAction::Auto {
                        content_id,
                        settings: self.tracking.content_settings.clone(),
                    }),
                    done: None,
                    flush,
                    running,
                };
            }
        }

        Evaluation {
            action: None,
            done: None,
            flush,
            running,
        }
    }

    async fn execute(&mut self, action: RefreshAction, done: Option<oneshot::Sender<Result<()>>>) {
        let content_id = action.content_id().to_owned();
        let name = self.producer.display_name(&content_id);
        let now = Utc::now();

        self.status.publish(
            Stage::Generating,
            &format!("Generating {name}..."),
            &content_id,
            &name,
        );
        let outcome = match action.execute(&*self.producer, &self.cache, &self.ctx, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%content_id, error = %e, "content generation failed");
                self.status
                    .publish(Stage::Error, &format!("Error: {e}"), &content_id, &name);
                if let Some(done) = done {
                    let _ = done.send(Err(e));
                }
                return;
            }
        };

        let Some(artifact) = outcome.artifact else {
            debug!(%content_id, "producer skipped, display unchanged");
            self.status.publish(
                Stage::Idle,
                &format!("No update from {name}"),
                &content_id,
                &name,
            );
            if let Some(done) = done {
                let _ = done.send(Ok(()));
            }
            return;
        };

        self.status.publish(
            Stage::Processing,
            &format!("Processing {name}..."),
            &content_id,
            &name,
        );
        let hash = artifact.sha256_hex();
        if self.record.artifact_hash.as_deref() != Some(hash.as_str()) {
            self.status.publish(
                Stage::Displaying,
                &format!("Displaying {name}..."),
                &content_id,
                &name,
            );
            if let Err(e) = self.sink.display(&artifact, action.settings()).await {
                error!(%content_id, error = %e, "display update failed");
                self.status
                    .publish(Stage::Error, &format!("Error: {e}"), &content_id, &name);
                if let Some(done) = done {
                    let _ = done.send(Err(e));
                }
                return;
            }
            self.status
                .publish(Stage::Displayed, &format!("Displayed {name}"), &content_id, &name);
            info!(content = %name, "displayed");
        } else {
            debug!(%content_id, "artifact unchanged, skipping display update");
            self.status.publish(
                Stage::Idle,
                &format!("No change for {name}"),
                &content_id,
                &name,
            );
        }

        let rotation_interval = {
            let mut state = self.shared.lock();
            if outcome.regenerated {
                if let RefreshAction::Loop {
                    loop_name,
                    reference,
                    ..
                } = &action
                {
                    if let Some(stored) = state
                        .store
                        .get_loop_mut(loop_name)
                        .and_then(|l| l.get_content_mut(&reference.content_id))
                    {
                        stored.last_refresh_time = Some(now);
                    }
                }
            }
            state.store.rotation_interval_seconds
        };

        self.record = action.describe(now, Some(hash));
        self.tracking.content_settings = action.settings().clone();
        self.tracking.cadence_seconds = cadence_from_settings(action.settings()).or(match &action {
            // Without an explicit cadence, a loop reference whose interval is
            // shorter than the rotation interval refreshes in place.
            RefreshAction::Loop { reference, .. } => (reference.refresh_interval_seconds
                < rotation_interval)
                .then_some(reference.refresh_interval_seconds),
            _ => None,
        });
        self.tracking.last_display_time = Some(now);
        if action.kind() == RefreshKind::Loop {
            self.tracking.last_rotation_time = Some(now);
        }

        let document = self.build_document();
        if let Err(e) = self.batcher.completed_action(&document) {
            warn!(error = %e, "batched document write failed");
        }
        if let Some(done) = done {
            let _ = done.send(Ok(()));
        }
    }

    /// Seconds until the next scheduled wake, with a one second floor.
    ///
    /// Runs after an evaluation, so an interval that reads as already
    /// elapsed means that evaluation could not act on it (rotation held by
    /// a pin, no window open). Waiting a full interval in that case keeps
    /// the loop from waking every second while nothing can change.
    fn next_sleep_seconds(&self) -> u64 {
        let now = Utc::now();
        let state = self.shared.lock();
        let mut next: Option<i64> = None;
        let content_pinned = matches!(state.store.pin, Some(Pin::Content { .. }));
        if state.store.rotation_enabled && !content_pinned {
            let interval = state.store.rotation_interval_seconds as i64;
            let remaining = match self.tracking.last_rotation_time {
                None => interval,
                Some(last) => interval - (now - last).num_seconds(),
            };
            next = Some(if remaining <= 0 { interval } else { remaining });
        }
        if let (Some(cadence), Some(last)) =
            (self.tracking.cadence_seconds, self.tracking.last_display_time)
        {
            let cadence = cadence as i64;
            let remaining = cadence - (now - last).num_seconds();
            let remaining = if remaining <= 0 { cadence } else { remaining };
            next = Some(next.map_or(remaining, |n| n.min(remaining)));
        }
        next.unwrap_or(IDLE_POLL_SECS as i64).max(1) as u64
    }

    fn build_document(&self) -> Document {
        Document {
            schedule: self.shared.lock().store.clone(),
            record: self.record.clone(),
            tracking: self.tracking.clone(),
            ..Document::default()
        }
    }

    fn flush_now(&mut self) {
        let document = self.build_document();
        if let Err(e) = self.batcher.flush(&document) {
            warn!(error = %e, "document flush failed");
        }
    }
}

/// Action that realizes a content pin: prefer the owning loop's reference
/// (keeping its settings), fall back to a bare manual display.
fn pin_action(store: &ScheduleStore, content_id: &str) -> RefreshAction {
    for l in &store.loops {
        if let Some(reference) = l.get_content(content_id) {
            return RefreshAction::Loop {
                loop_name: l.name.clone(),
                reference: reference.clone(),
                force: true,
            };
        }
    }
    RefreshAction::Manual {
        content_id: content_id.to_owned(),
        settings: ContentSettings::new(),
    }
}

fn format_countdown(secs: u64) -> String {
    if secs >= 3600 {
        format!("{:.1}h", secs as f64 / 3600.0)
    } else if secs >= 60 {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Artifact, Produced};
    use crate::persist::JsonStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct EchoProducer;

    #[async_trait]
    impl ContentProducer for EchoProducer {
        async fn generate(
            &self,
            content_id: &str,
            _settings: &ContentSettings,
            _ctx: &DeviceContext,
        ) -> Result<Produced> {
            Ok(Produced::Artifact(Artifact::new(
                content_id.as_bytes().to_vec(),
            )))
        }
    }

    struct NullSink;

    #[async_trait]
    impl DisplaySink for NullSink {
        async fn display(
            &self,
            _artifact: &Artifact,
            _display_settings: &ContentSettings,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn test_scheduler(document: Document) -> (Scheduler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig {
            document_path: dir.path().join("schedule.json"),
            artifact_dir: dir.path().join("artifacts"),
            status_dir: dir.path().join("status"),
            ..DeviceConfig::default()
        };
        let backend = Arc::new(JsonStore::new(&config.document_path));
        let scheduler = Scheduler::new(
            document,
            &config,
            Arc::new(EchoProducer),
            Arc::new(NullSink),
            backend,
        );
        (scheduler, dir)
    }

    fn document_with_day_loop(ids: &[&str]) -> Document {
        let mut document = Document::default();
        document.schedule.add_loop("day", "00:00", "24:00").unwrap();
        for id in ids {
            document.schedule.add_content("day", id, 60).unwrap();
        }
        document
    }

    fn local(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn rotation_due_yields_loop_action_and_advances_cursor() {
        let (mut scheduler, _dir) = test_scheduler(document_with_day_loop(&["a", "b"]));
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        assert!(evaluation.running);
        match evaluation.action {
            Some(RefreshAction::Loop {
                loop_name,
                reference,
                force,
            }) => {
                assert_eq!(loop_name, "day");
                assert_eq!(reference.content_id, "a");
                assert!(!force);
            }
            other => panic!("expected loop action, got {other:?}"),
        }
        let handle = scheduler.handle();
        assert_eq!(
            handle.with_store(|s| s.active_loop.clone()).as_deref(),
            Some("day")
        );
        assert_eq!(
            handle.with_store(|s| s.get_loop("day").unwrap().current_index),
            Some(0)
        );
    }

    #[tokio::test]
    async fn rotation_not_due_yields_nothing() {
        let (mut scheduler, _dir) = test_scheduler(document_with_day_loop(&["a"]));
        scheduler.tracking.last_rotation_time = Some(Utc::now());
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        assert!(evaluation.action.is_none());
    }

    #[tokio::test]
    async fn disabled_rotation_never_becomes_due() {
        let mut document = document_with_day_loop(&["a"]);
        document.schedule.set_rotation_enabled(false);
        let (mut scheduler, _dir) = test_scheduler(document);
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        assert!(evaluation.action.is_none());
    }

    #[tokio::test]
    async fn queued_request_wins_over_due_rotation() {
        let (mut scheduler, _dir) = test_scheduler(document_with_day_loop(&["a"]));
        let handle = scheduler.handle();
        handle
            .trigger_manual_nonblocking("clock", ContentSettings::new())
            .unwrap();
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        match evaluation.action {
            Some(RefreshAction::Manual { content_id, .. }) => assert_eq!(content_id, "clock"),
            other => panic!("expected manual action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn newer_request_supersedes_waiting_one() {
        let (scheduler, _dir) = test_scheduler(Document::default());
        let handle = scheduler.handle();
        let (tx, rx) = oneshot::channel();
        handle
            .queue_request(
                RefreshAction::Manual {
                    content_id: "first".to_owned(),
                    settings: ContentSettings::new(),
                },
                Some(tx),
            )
            .unwrap();
        handle
            .trigger_manual_nonblocking("second", ContentSettings::new())
            .unwrap();

        match rx.await.unwrap() {
            Err(EaselError::Channel(msg)) => assert!(msg.contains("superseded")),
            other => panic!("expected channel error, got {other:?}"),
        }
        let pending = scheduler.shared.lock().pending.take().unwrap();
        assert_eq!(pending.action.content_id(), "second");
    }

    #[tokio::test]
    async fn pinned_content_switches_once_then_holds_rotation() {
        let mut document = document_with_day_loop(&["a", "b"]);
        document.schedule.set_pin(Pin::Content {
            content_id: "b".to_owned(),
        });
        let (mut scheduler, _dir) = test_scheduler(document);
        scheduler.record.content_id = Some("a".to_owned());

        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        match evaluation.action {
            Some(RefreshAction::Loop {
                loop_name,
                reference,
                force,
            }) => {
                assert_eq!(loop_name, "day");
                assert_eq!(reference.content_id, "b");
                assert!(force);
            }
            other => panic!("expected forced loop action, got {other:?}"),
        }

        // Once the pinned content is showing, a due rotation stays held.
        scheduler.record.content_id = Some("b".to_owned());
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        assert!(evaluation.action.is_none());
    }

    #[tokio::test]
    async fn pinned_content_outside_any_loop_is_displayed_manually() {
        let mut document = document_with_day_loop(&["a"]);
        document.schedule.set_pin(Pin::Content {
            content_id: "standalone".to_owned(),
        });
        let (mut scheduler, _dir) = test_scheduler(document);
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        match evaluation.action {
            Some(RefreshAction::Manual { content_id, .. }) => {
                assert_eq!(content_id, "standalone");
            }
            other => panic!("expected manual action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auto_refresh_regenerates_displayed_content_in_place() {
        let mut document = Document::default();
        document.schedule.set_rotation_enabled(false);
        let (mut scheduler, _dir) = test_scheduler(document);
        let now = Utc::now();
        scheduler.record.content_id = Some("weather".to_owned());
        scheduler.tracking.cadence_seconds = Some(60);
        scheduler.tracking.last_display_time = Some(now - ChronoDuration::seconds(61));
        scheduler
            .tracking
            .content_settings
            .insert("city".to_owned(), "Oslo".into());

        let evaluation = scheduler.evaluate(now, local(9, 0));
        match evaluation.action {
            Some(RefreshAction::Auto {
                content_id,
                settings,
            }) => {
                assert_eq!(content_id, "weather");
                assert_eq!(settings["city"], "Oslo");
            }
            other => panic!("expected auto action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rotation_due_but_unresolved_does_not_fall_through_to_auto_refresh() {
        // Loops exist but none is active at the evaluated time.
        let mut document = Document::default();
        document.schedule.add_loop("night", "22:00", "02:00").unwrap();
        document.schedule.add_content("night", "stars", 60).unwrap();
        let (mut scheduler, _dir) = test_scheduler(document);
        let now = Utc::now();
        scheduler.record.content_id = Some("stars".to_owned());
        scheduler.tracking.cadence_seconds = Some(60);
        scheduler.tracking.last_display_time = Some(now - ChronoDuration::seconds(61));

        let evaluation = scheduler.evaluate(now, local(12, 0));
        assert!(evaluation.action.is_none());
    }

    #[tokio::test]
    async fn structural_edit_requests_a_flush() {
        let (mut scheduler, _dir) = test_scheduler(Document::default());
        let handle = scheduler.handle();
        handle.add_loop("day", "00:00", "24:00").unwrap();
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        assert!(evaluation.flush);
        // The flag is consumed by the evaluation that saw it.
        scheduler.tracking.last_rotation_time = Some(Utc::now());
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        assert!(!evaluation.flush);
    }

    #[tokio::test]
    async fn skip_to_next_queues_a_forced_loop_action() {
        let (mut scheduler, _dir) = test_scheduler(document_with_day_loop(&["a", "b"]));
        let handle = scheduler.handle();
        handle.skip_to_next().unwrap();
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        match evaluation.action {
            Some(RefreshAction::Loop { reference, force, .. }) => {
                assert_eq!(reference.content_id, "a");
                assert!(force);
            }
            other => panic!("expected forced loop action, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_to_next_without_active_loop_fails() {
        let (scheduler, _dir) = test_scheduler(Document::default());
        assert!(matches!(
            scheduler.handle().skip_to_next(),
            Err(EaselError::Config(_))
        ));
    }

    #[tokio::test]
    async fn refresh_content_now_targets_the_stored_reference() {
        let (mut scheduler, _dir) = test_scheduler(document_with_day_loop(&["a", "b"]));
        let handle = scheduler.handle();
        handle.refresh_content_now("day", "b").unwrap();
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        match evaluation.action {
            Some(RefreshAction::Loop { reference, force, .. }) => {
                assert_eq!(reference.content_id, "b");
                assert!(force);
            }
            other => panic!("expected forced loop action, got {other:?}"),
        }
        assert!(matches!(
            handle.refresh_content_now("day", "missing"),
            Err(EaselError::Config(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_is_observed_by_evaluation() {
        let (mut scheduler, _dir) = test_scheduler(Document::default());
        let handle = scheduler.handle();
        assert!(handle.is_running());
        handle.shutdown();
        assert!(!handle.is_running());
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        assert!(!evaluation.running);
    }

    #[tokio::test]
    async fn requests_are_rejected_once_shut_down() {
        let (scheduler, _dir) = test_scheduler(Document::default());
        let handle = scheduler.handle();
        handle.shutdown();
        assert!(matches!(
            handle.trigger_manual_nonblocking("clock", ContentSettings::new()),
            Err(EaselError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn schedule_changed_signal_can_force_a_flush() {
        let (mut scheduler, _dir) = test_scheduler(Document::default());
        let handle = scheduler.handle();
        handle.signal_schedule_changed(false);
        scheduler.tracking.last_rotation_time = Some(Utc::now());
        assert!(!scheduler.evaluate(Utc::now(), local(9, 0)).flush);
        handle.signal_schedule_changed(true);
        assert!(scheduler.evaluate(Utc::now(), local(9, 0)).flush);
    }

    #[tokio::test]
    async fn execute_updates_record_tracking_and_stored_reference() {
        let (mut scheduler, _dir) = test_scheduler(document_with_day_loop(&["a"]));
        let evaluation = scheduler.evaluate(Utc::now(), local(9, 0));
        let action = evaluation.action.unwrap();
        scheduler.execute(action, None).await;

        assert_eq!(scheduler.record.content_id.as_deref(), Some("a"));
        assert_eq!(scheduler.record.refresh_kind, Some(RefreshKind::Loop));
        assert!(scheduler.record.artifact_hash.is_some());
        assert!(scheduler.tracking.last_display_time.is_some());
        assert!(scheduler.tracking.last_rotation_time.is_some());
        // Interval 60s < rotation 300s, so an implicit cadence is derived.
        assert_eq!(scheduler.tracking.cadence_seconds, Some(60));
        let refreshed = scheduler.handle().with_store(|s| {
            s.get_loop("day").unwrap().get_content("a").unwrap().last_refresh_time
        });
        assert!(refreshed.is_some());
    }

    #[tokio::test]
    async fn slow_loop_reference_derives_no_cadence() {
        let mut document = Document::default();
        document.schedule.add_loop("day", "00:00", "24:00").unwrap();
        document.schedule.add_content("day", "a", 86400).unwrap();
        let (mut scheduler, _dir) = test_scheduler(document);
        let action = scheduler.evaluate(Utc::now(), local(9, 0)).action.unwrap();
        scheduler.execute(action, None).await;
        assert_eq!(scheduler.tracking.cadence_seconds, None);
    }

    #[tokio::test]
    async fn sleep_ignores_rotation_while_content_is_pinned() {
        let mut document = document_with_day_loop(&["a", "b"]);
        document.schedule.set_pin(Pin::Content {
            content_id: "a".to_owned(),
        });
        let (mut scheduler, _dir) = test_scheduler(document);
        scheduler.record.content_id = Some("a".to_owned());
        scheduler.tracking.last_rotation_time = Some(Utc::now() - ChronoDuration::seconds(1000));
        // Rotation is long overdue but held by the pin; the loop must not
        // wake every second over it.
        assert!(scheduler.next_sleep_seconds() >= IDLE_POLL_SECS);
    }

    #[tokio::test]
    async fn overdue_but_unactionable_rotation_sleeps_a_full_interval() {
        // No loop can resolve, so the due rotation never fires.
        let (mut scheduler, _dir) = test_scheduler(Document::default());
        scheduler.tracking.last_rotation_time = Some(Utc::now() - ChronoDuration::seconds(1000));
        assert_eq!(
            scheduler.next_sleep_seconds(),
            crate::store::DEFAULT_ROTATION_INTERVAL_SECS
        );
        // Same when no rotation has ever happened.
        scheduler.tracking.last_rotation_time = None;
        assert_eq!(
            scheduler.next_sleep_seconds(),
            crate::store::DEFAULT_ROTATION_INTERVAL_SECS
        );
    }

    #[tokio::test]
    async fn sleep_tracks_the_shorter_auto_refresh_cadence() {
        let (mut scheduler, _dir) = test_scheduler(Document::default());
        let now = Utc::now();
        scheduler.tracking.last_rotation_time = Some(now);
        scheduler.tracking.cadence_seconds = Some(60);
        scheduler.tracking.last_display_time = Some(now - ChronoDuration::seconds(30));
        let secs = scheduler.next_sleep_seconds();
        assert!(secs <= 30, "expected the cadence remainder, got {secs}s");
    }

    #[test]
    fn countdown_formats_by_magnitude() {
        assert_eq!(format_countdown(42), "42s");
        assert_eq!(format_countdown(180), "3m");
        assert_eq!(format_countdown(5400), "1.5h");
    }
}
