//! Schedule data model: named time-windowed rotations of content references.
//!
//! A [`ScheduleStore`] holds an ordered list of [`Loop`]s. Each loop owns a
//! rotation of [`PluginReference`]s and a daily time window. The store
//! resolves which loop is active for a given wall-clock time, preferring the
//! narrowest window, and caches that resolution at minute granularity.

use crate::contract::ContentSettings;
use crate::error::{EaselError, Result};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Minutes in a day; `"24:00"` parses to this as an exclusive end-of-day.
const MINUTES_PER_DAY: u32 = 1440;

/// Default seconds between loop rotations.
pub const DEFAULT_ROTATION_INTERVAL_SECS: u64 = 300;

/// Parse an `"HH:MM"` wall-clock string into minutes since midnight.
///
/// `"24:00"` is accepted and maps to 1440 so it can serve as an exclusive
/// end-of-day boundary.
fn parse_hhmm(value: &str) -> Result<u32> {
    if value == "24:00" {
        return Ok(MINUTES_PER_DAY);
    }
    let invalid = || EaselError::Config(format!("invalid time '{value}', expected HH:MM"));
    let (h, m) = value.split_once(':').ok_or_else(invalid)?;
    let hours: u32 = h.parse().map_err(|_| invalid())?;
    let minutes: u32 = m.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

/// A reference to one content generator inside a loop's rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginReference {
    /// Content generator id.
    pub content_id: String,
    /// How often this content's data should be regenerated, in seconds.
    pub refresh_interval_seconds: u64,
    /// Opaque settings owned by the generator.
    #[serde(default)]
    pub content_settings: ContentSettings,
    /// When this content's artifact was last regenerated.
    #[serde(default)]
    pub last_refresh_time: Option<DateTime<Utc>>,
}

impl PluginReference {
    /// Create a reference with empty settings and no refresh history.
    pub fn new(content_id: impl Into<String>, refresh_interval_seconds: u64) -> Self {
        Self {
            content_id: content_id.into(),
            refresh_interval_seconds,
            content_settings: ContentSettings::new(),
            last_refresh_time: None,
        }
    }

    /// Staleness test: true when never refreshed or the interval has elapsed.
    ///
    /// Monotone: once true, it stays true until the reference is refreshed.
    pub fn should_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh_time {
            None => true,
            Some(last) => (now - last).num_seconds() >= self.refresh_interval_seconds as i64,
        }
    }
}

/// A named, time-windowed rotation of content references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    /// Unique name within the store.
    pub name: String,
    /// Window start, `"HH:MM"` 24h.
    pub start_time: String,
    /// Window end, `"HH:MM"` 24h, exclusive. May be earlier than the start to
    /// wrap past midnight; `"24:00"` marks end-of-day.
    pub end_time: String,
    /// Ordered rotation of content references.
    #[serde(default)]
    pub content_order: Vec<PluginReference>,
    /// Index of the currently displayed reference, if any.
    #[serde(default)]
    pub current_index: Option<usize>,
    /// When true, pick the next reference at random instead of in order.
    #[serde(default)]
    pub randomize: bool,
}

impl Loop {
    /// Create an empty loop, validating the window strings.
    pub fn new(
        name: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
    ) -> Result<Self> {
        let start_time = start_time.into();
        let end_time = end_time.into();
        parse_hhmm(&start_time)?;
        parse_hhmm(&end_time)?;
        Ok(Self {
            name: name.into(),
            start_time,
            end_time,
            content_order: Vec::new(),
            current_index: None,
            randomize: false,
        })
    }

    /// Whether the window contains the given minute of day.
    ///
    /// The end is exclusive; a start later than the end wraps past midnight.
    /// A window that fails to parse resolves as inactive.
    pub fn is_active(&self, minute_of_day: u32) -> bool {
        let (Ok(start), Ok(end)) = (parse_hhmm(&self.start_time), parse_hhmm(&self.end_time))
        else {
            warn!(name = %self.name, "loop has an unparsable time window, treating as inactive");
            return false;
        };
        if start <= end {
            start <= minute_of_day && minute_of_day < end
        } else {
            minute_of_day >= start || minute_of_day < end
        }
    }

    /// Window span in minutes. Narrower spans take resolution priority.
    pub fn span_minutes(&self) -> Option<u32> {
        let start = parse_hhmm(&self.start_time).ok()?;
        let end = parse_hhmm(&self.end_time).ok()?;
        if end >= start {
            Some(end - start)
        } else {
            Some(end + MINUTES_PER_DAY - start)
        }
    }

    /// `current_index` resolved defensively: out-of-range reads as absent.
    fn valid_index(&self) -> Option<usize> {
        self.current_index.filter(|i| *i < self.content_order.len())
    }

    fn next_index(&self) -> Option<usize> {
        let n = self.content_order.len();
        if n == 0 {
            return None;
        }
        let next = match (self.randomize, self.valid_index()) {
            (_, _) if n == 1 => 0,
            (false, None) => 0,
            (false, Some(cur)) => (cur + 1) % n,
            (true, None) => rand::thread_rng().gen_range(0..n),
            (true, Some(cur)) => {
                // Uniform over all indices except the current one.
                let mut pick = rand::thread_rng().gen_range(0..n - 1);
                if pick >= cur {
                    pick += 1;
                }
                pick
            }
        };
        Some(next)
    }

    /// Advance the rotation cursor and return the next reference.
    ///
    /// Sequential mode cycles in stable order; randomize mode never returns
    /// the same reference twice in a row (for more than one reference).
    pub fn next_content_reference(&mut self) -> Option<&PluginReference> {
        let next = self.next_index()?;
        self.current_index = Some(next);
        self.content_order.get(next)
    }

    /// Compute what [`Self::next_content_reference`] would return, without
    /// advancing the cursor. Randomize mode draws a fresh candidate.
    pub fn peek_next_content_reference(&self) -> Option<&PluginReference> {
        self.content_order.get(self.next_index()?)
    }

    /// Append a content reference. Each content id may appear once per loop.
    pub fn add_content(&mut self, content_id: &str, refresh_interval_seconds: u64) -> Result<()> {
        if self.content_order.iter().any(|r| r.content_id == content_id) {
            return Err(EaselError::Config(format!(
                "content '{content_id}' already in loop '{}'",
                self.name
            )));
        }
        self.content_order
            .push(PluginReference::new(content_id, refresh_interval_seconds));
        Ok(())
    }

    /// Remove a content reference by id. The rotation cursor follows the
    /// currently displayed reference when it survives the edit.
    pub fn remove_content(&mut self, content_id: &str) -> Result<()> {
        let displayed = self.displayed_content_id();
        let before = self.content_order.len();
        self.content_order.retain(|r| r.content_id != content_id);
        if self.content_order.len() == before {
            return Err(EaselError::Config(format!(
                "content '{content_id}' not in loop '{}'",
                self.name
            )));
        }
        self.repoint_cursor(displayed);
        Ok(())
    }

    /// Reorder the rotation to match `content_ids`. Ids not present in the
    /// loop are ignored; references not named are dropped (callers send the
    /// full list). The rotation cursor follows the currently displayed
    /// reference to its new position.
    pub fn reorder_content(&mut self, content_ids: &[String]) {
        let displayed = self.displayed_content_id();
        let mut remaining: Vec<PluginReference> = std::mem::take(&mut self.content_order);
        for id in content_ids {
            if let Some(pos) = remaining.iter().position(|r| &r.content_id == id) {
                self.content_order.push(remaining.remove(pos));
            }
        }
        self.repoint_cursor(displayed);
    }

    fn displayed_content_id(&self) -> Option<String> {
        self.valid_index()
            .map(|i| self.content_order[i].content_id.clone())
    }

    fn repoint_cursor(&mut self, displayed: Option<String>) {
        self.current_index = displayed
            .and_then(|id| self.content_order.iter().position(|r| r.content_id == id));
    }

    /// Find a content reference by id.
    pub fn get_content(&self, content_id: &str) -> Option<&PluginReference> {
        self.content_order.iter().find(|r| r.content_id == content_id)
    }

    /// Find a content reference by id, mutably.
    pub fn get_content_mut(&mut self, content_id: &str) -> Option<&mut PluginReference> {
        self.content_order
            .iter_mut()
            .find(|r| r.content_id == content_id)
    }
}

/// Manual override of time-window resolution. The two kinds are mutually
/// exclusive; clearing resumes normal resolution on the next evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pin {
    /// Force one content id onto the display until cleared.
    Content {
        /// Pinned content id.
        content_id: String,
    },
    /// Force resolution to one loop regardless of its time window.
    Loop {
        /// Pinned loop name.
        name: String,
    },
}

/// Ordered collection of loops plus the global rotation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleStore {
    /// Loops in user-defined order; order breaks resolution ties.
    pub loops: Vec<Loop>,
    /// Global cadence between rotations, in seconds.
    pub rotation_interval_seconds: u64,
    /// Informational: name of the loop most recently resolved as active.
    pub active_loop: Option<String>,
    /// When false, rotation never becomes due (auto-refresh still runs).
    pub rotation_enabled: bool,
    /// Active override, if any.
    pub pin: Option<Pin>,
    /// Resolution cache: (minute of day, resolved loop name).
    #[serde(skip)]
    resolution_cache: Option<(u32, Option<String>)>,
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self {
            loops: Vec::new(),
            rotation_interval_seconds: DEFAULT_ROTATION_INTERVAL_SECS,
            active_loop: None,
            rotation_enabled: true,
            pin: None,
            resolution_cache: None,
        }
    }
}

impl ScheduleStore {
    /// All loop names, in order.
    pub fn loop_names(&self) -> Vec<&str> {
        self.loops.iter().map(|l| l.name.as_str()).collect()
    }

    /// Find a loop by name.
    pub fn get_loop(&self, name: &str) -> Option<&Loop> {
        self.loops.iter().find(|l| l.name == name)
    }

    /// Find a loop by name, mutably.
    pub fn get_loop_mut(&mut self, name: &str) -> Option<&mut Loop> {
        self.loops.iter_mut().find(|l| l.name == name)
    }

    /// Create and append a new loop. Names are unique within the store.
    pub fn add_loop(&mut self, name: &str, start_time: &str, end_time: &str) -> Result<()> {
        if self.get_loop(name).is_some() {
            return Err(EaselError::Config(format!("loop '{name}' already exists")));
        }
        self.loops.push(Loop::new(name, start_time, end_time)?);
        self.invalidate_resolution_cache();
        Ok(())
    }

    /// Rename a loop and/or change its window.
    pub fn update_loop(
        &mut self,
        old_name: &str,
        new_name: &str,
        start_time: &str,
        end_time: &str,
    ) -> Result<()> {
        if old_name != new_name && self.get_loop(new_name).is_some() {
            return Err(EaselError::Config(format!(
                "loop '{new_name}' already exists"
            )));
        }
        parse_hhmm(start_time)?;
        parse_hhmm(end_time)?;
        let renamed = old_name != new_name;
        let loop_ = self
            .get_loop_mut(old_name)
            .ok_or_else(|| EaselError::Config(format!("loop '{old_name}' not found")))?;
        loop_.name = new_name.to_owned();
        loop_.start_time = start_time.to_owned();
        loop_.end_time = end_time.to_owned();
        if renamed && self.active_loop.as_deref() == Some(old_name) {
            self.active_loop = Some(new_name.to_owned());
        }
        self.invalidate_resolution_cache();
        Ok(())
    }

    /// Delete a loop and everything it owns.
    pub fn delete_loop(&mut self, name: &str) -> Result<()> {
        let before = self.loops.len();
        self.loops.retain(|l| l.name != name);
        if self.loops.len() == before {
            return Err(EaselError::Config(format!("loop '{name}' not found")));
        }
        if self.active_loop.as_deref() == Some(name) {
            self.active_loop = None;
        }
        self.invalidate_resolution_cache();
        Ok(())
    }

    /// Append a content reference to a loop.
    pub fn add_content(
        &mut self,
        loop_name: &str,
        content_id: &str,
        refresh_interval_seconds: u64,
    ) -> Result<()> {
        self.require_loop_mut(loop_name)?
            .add_content(content_id, refresh_interval_seconds)?;
        self.invalidate_resolution_cache();
        Ok(())
    }

    /// Remove a content reference from a loop.
    pub fn remove_content(&mut self, loop_name: &str, content_id: &str) -> Result<()> {
        self.require_loop_mut(loop_name)?.remove_content(content_id)?;
        self.invalidate_resolution_cache();
        Ok(())
    }

    /// Reorder a loop's rotation.
    pub fn reorder_content(&mut self, loop_name: &str, content_ids: &[String]) -> Result<()> {
        self.require_loop_mut(loop_name)?.reorder_content(content_ids);
        self.invalidate_resolution_cache();
        Ok(())
    }

    /// Toggle or set a loop's randomize flag. Returns the new value.
    pub fn set_randomize(&mut self, loop_name: &str, randomize: bool) -> Result<bool> {
        let loop_ = self.require_loop_mut(loop_name)?;
        loop_.randomize = randomize;
        Ok(loop_.randomize)
    }

    /// Overlay settings onto a content reference, optionally changing its
    /// refresh interval. Incoming keys replace existing ones; keys the caller
    /// did not send are kept.
    pub fn update_content_settings(
        &mut self,
        loop_name: &str,
        content_id: &str,
        settings: ContentSettings,
        refresh_interval_seconds: Option<u64>,
    ) -> Result<()> {
        let loop_ = self.require_loop_mut(loop_name)?;
        let loop_display = loop_.name.clone();
        let reference = loop_.get_content_mut(content_id).ok_or_else(|| {
            EaselError::Config(format!(
                "content '{content_id}' not in loop '{loop_display}'"
            ))
        })?;
        for (key, value) in settings {
            reference.content_settings.insert(key, value);
        }
        if let Some(interval) = refresh_interval_seconds {
            reference.refresh_interval_seconds = interval;
        }
        Ok(())
    }

    /// Set the global rotation cadence.
    pub fn set_rotation_interval(&mut self, seconds: u64) {
        self.rotation_interval_seconds = seconds.max(1);
    }

    /// Enable or disable rotation globally.
    pub fn set_rotation_enabled(&mut self, enabled: bool) {
        self.rotation_enabled = enabled;
    }

    /// Install an override, replacing any existing one.
    pub fn set_pin(&mut self, pin: Pin) {
        self.pin = Some(pin);
    }

    /// Clear the override; normal resolution resumes on the next evaluation.
    pub fn clear_pin(&mut self) {
        self.pin = None;
    }

    /// Resolve the loop active at the given wall-clock time.
    ///
    /// Among loops whose window contains `now` and whose rotation is
    /// non-empty, the narrowest window wins; ties go to list order. A
    /// pin-loop override short-circuits window resolution entirely. The
    /// result is cached per minute and invalidated by structural edits.
    pub fn resolve_active_loop(&mut self, now: NaiveTime) -> Option<&Loop> {
        let name = self.resolve_active_loop_name(now)?;
        self.get_loop(&name)
    }

    fn resolve_active_loop_name(&mut self, now: NaiveTime) -> Option<String> {
        if let Some(Pin::Loop { name }) = self.pin.clone() {
            match self.get_loop(&name) {
                Some(l) if !l.content_order.is_empty() => return Some(l.name.clone()),
                Some(_) => {
                    warn!(name = %name, "pinned loop has no content, falling back to window resolution");
                }
                None => {
                    warn!(name = %name, "pinned loop no longer exists, falling back to window resolution");
                }
            }
        }

        let minute = now.hour() * 60 + now.minute();
        if let Some((cached_minute, cached)) = &self.resolution_cache {
            if *cached_minute == minute {
                return cached.clone();
            }
        }

        let mut best: Option<(&Loop, u32)> = None;
        for candidate in &self.loops {
            if candidate.content_order.is_empty() || !candidate.is_active(minute) {
                continue;
            }
            let Some(span) = candidate.span_minutes() else {
                continue;
            };
            match best {
                // First loop wins on equal spans.
                Some((_, current)) if span >= current => {}
                _ => best = Some((candidate, span)),
            }
        }
        let resolved = best.map(|(l, _)| l.name.clone());
        debug!(minute, resolved = ?resolved, "resolved active loop");
        self.resolution_cache = Some((minute, resolved.clone()));
        resolved
    }

    fn invalidate_resolution_cache(&mut self) {
        self.resolution_cache = None;
    }

    fn require_loop_mut(&mut self, name: &str) -> Result<&mut Loop> {
        self.loops
            .iter_mut()
            .find(|l| l.name == name)
            .ok_or_else(|| EaselError::Config(format!("loop '{name}' not found")))
    }
}
