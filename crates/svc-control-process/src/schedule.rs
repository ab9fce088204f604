//! Cron-style schedule rules and the due-event scheduler.
//!
//! Rules use 5-field cron syntax (minute, hour, day-of-month, month,
//! day-of-week) with `*`, `*/n`, `n1-n2`, and `n1,n2` forms. A rule fires at
//! most once per matching minute.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, Timelike};
use svc_control_core::{SettingsStore, traits::Enableable};
use thiserror::Error;

use crate::registry::ProcessRegistry;

/// Settings category under which schedule bindings persist.
pub const SETTINGS_CATEGORY: &str = "ScheduledProcesses";

/// Schedule rule parse failure.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid schedule rule '{0}'")]
    InvalidRule(String),
}

fn parse_field(field: &str, min: u8, max: u8, rule: &str) -> Result<BTreeSet<u8>, ScheduleError> {
    let invalid = || ScheduleError::InvalidRule(rule.to_string());
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        if part == "*" {
            values.extend(min..=max);
        } else if let Some(step) = part.strip_prefix("*/") {
            let step: u8 = step.parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(invalid());
            }
            values.extend((min..=max).step_by(step as usize));
        } else if let Some((a, b)) = part.split_once('-') {
            let a: u8 = a.parse().map_err(|_| invalid())?;
            let b: u8 = b.parse().map_err(|_| invalid())?;
            if a > b || a < min || b > max {
                return Err(invalid());
            }
            values.extend(a..=b);
        } else {
            let n: u8 = part.parse().map_err(|_| invalid())?;
            if n < min || n > max {
                return Err(invalid());
            }
            values.insert(n);
        }
    }

    if values.is_empty() {
        return Err(invalid());
    }
    Ok(values)
}

/// A parsed 5-field cron rule.
#[derive(Debug, Clone)]
pub struct CronRule {
    text: String,
    minutes: BTreeSet<u8>,
    hours: BTreeSet<u8>,
    days_of_month: BTreeSet<u8>,
    months: BTreeSet<u8>,
    days_of_week: BTreeSet<u8>,
}

impl CronRule {
    /// Parse a rule string.
    ///
    /// # Errors
    /// Returns [`ScheduleError::InvalidRule`] for anything but five valid
    /// fields.
    pub fn parse(text: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidRule(text.to_string()));
        }
        Ok(Self {
            text: fields.join(" "),
            minutes: parse_field(fields[0], 0, 59, text)?,
            hours: parse_field(fields[1], 0, 23, text)?,
            days_of_month: parse_field(fields[2], 1, 31, text)?,
            months: parse_field(fields[3], 1, 12, text)?,
            days_of_week: parse_field(fields[4], 0, 6, text)?,
        })
    }

    /// The normalized rule text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether every field matches the given instant.
    #[must_use]
    pub fn is_due(&self, t: &DateTime<Local>) -> bool {
        self.minutes.contains(&(t.minute() as u8))
            && self.hours.contains(&(t.hour() as u8))
            && self.days_of_month.contains(&(t.day() as u8))
            && self.months.contains(&(t.month() as u8))
            && self
                .days_of_week
                .contains(&(t.weekday().num_days_from_sunday() as u8))
    }
}

/// The association between a named process and its due rule.
#[derive(Debug, Clone)]
pub struct ScheduleBinding {
    pub name: String,
    pub rule: CronRule,
    pub last_due: Option<DateTime<Local>>,
}

/// Schedule bindings, at most one per process name.
pub struct ScheduleSet {
    bindings: Mutex<HashMap<String, ScheduleBinding>>,
}

impl ScheduleSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Bind a rule to a process name. Returns false when a binding already
    /// exists and `update_if_exists` is not set.
    ///
    /// # Errors
    /// Returns [`ScheduleError::InvalidRule`] when the rule does not parse.
    pub fn schedule(
        &self,
        name: &str,
        rule: &str,
        update_if_exists: bool,
    ) -> Result<bool, ScheduleError> {
        let rule = CronRule::parse(rule)?;
        let key = name.to_lowercase();
        let mut bindings = self.bindings.lock().unwrap();
        if bindings.contains_key(&key) && !update_if_exists {
            return Ok(false);
        }
        bindings.insert(
            key,
            ScheduleBinding {
                name: name.to_string(),
                rule,
                last_due: None,
            },
        );
        Ok(true)
    }

    /// Remove any binding for the name. Returns false when none existed.
    pub fn unschedule(&self, name: &str) -> bool {
        self.bindings
            .lock()
            .unwrap()
            .remove(&name.to_lowercase())
            .is_some()
    }

    /// Look up one binding.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ScheduleBinding> {
        self.bindings
            .lock()
            .unwrap()
            .get(&name.to_lowercase())
            .cloned()
    }

    /// Name-ordered snapshot of all bindings.
    #[must_use]
    pub fn list(&self) -> Vec<ScheduleBinding> {
        let mut bindings: Vec<ScheduleBinding> =
            self.bindings.lock().unwrap().values().cloned().collect();
        bindings.sort_by(|a, b| a.name.cmp(&b.name));
        bindings
    }

    /// Names of processes whose rules are due at `now`. Each binding fires at
    /// most once per matching minute.
    pub fn due_at(&self, now: DateTime<Local>) -> Vec<String> {
        let minute_key = |t: &DateTime<Local>| (t.date_naive(), t.hour(), t.minute());
        let mut due = Vec::new();
        let mut bindings = self.bindings.lock().unwrap();
        for binding in bindings.values_mut() {
            if binding
                .last_due
                .as_ref()
                .is_some_and(|t| minute_key(t) == minute_key(&now))
            {
                continue;
            }
            if binding.rule.is_due(&now) {
                binding.last_due = Some(now);
                due.push(binding.name.clone());
            }
        }
        due
    }

    /// Write all bindings to the settings store, removing stale entries.
    pub fn save_to(&self, store: &dyn SettingsStore) {
        let bindings = self.list();
        for (name, _) in store.entries(SETTINGS_CATEGORY) {
            if !bindings
                .iter()
                .any(|b| b.name.eq_ignore_ascii_case(&name))
            {
                store.remove(SETTINGS_CATEGORY, &name);
            }
        }
        for binding in bindings {
            store.set(SETTINGS_CATEGORY, &binding.name, binding.rule.text());
        }
    }

    /// Read persisted `(name, rule)` pairs. The caller applies them, since
    /// scheduling requires the process to already exist.
    #[must_use]
    pub fn load_from(store: &dyn SettingsStore) -> Vec<(String, String)> {
        store.entries(SETTINGS_CATEGORY)
    }
}

impl Default for ScheduleSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer-driven task that starts processes when their rules come due.
///
/// A due event for an unknown or removed process is silently ignored.
pub struct Scheduler {
    set: Arc<ScheduleSet>,
    registry: Arc<ProcessRegistry>,
    enabled: AtomicBool,
}

impl Scheduler {
    #[must_use]
    pub fn new(set: Arc<ScheduleSet>, registry: Arc<ProcessRegistry>) -> Arc<Self> {
        Arc::new(Self {
            set,
            registry,
            enabled: AtomicBool::new(true),
        })
    }

    /// Tick loop; runs until the task is aborted.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if !self.is_enabled() {
                continue;
            }
            self.tick(Local::now());
        }
    }

    /// Evaluate due rules once. Split out of the loop for direct testing.
    pub fn tick(&self, now: DateTime<Local>) {
        for name in self.set.due_at(now) {
            match self.registry.start(&name, None) {
                Ok(()) => tracing::info!(process = name, "schedule due, process started"),
                Err(e) => tracing::debug!(process = name, "schedule due but not started: {e}"),
            }
        }
    }
}

impl Enableable for Scheduler {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
