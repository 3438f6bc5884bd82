//! When to run a maintenance pass
//!
//! The controller keeps one schedule entry per Shoot: the last object it
//! saw and the instant of its next trigger. Watch events for a Shoot only
//! lead to a pass when they are due, or when the update would have enqueued
//! the Shoot on its own (maintain-now annotation, changed window). Every
//! other event is answered with the pending trigger, so at most one trigger
//! per Shoot is ever outstanding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use tracing::warn;

use canopy_common::crd::Shoot;

use super::window::MaintenanceWindow;

/// Shortest requeue handed to the controller runtime
const MIN_REQUEUE: Duration = Duration::from_secs(1);

/// The window a Shoot is scheduled by.
///
/// A malformed window falls back to the default one so the Shoot keeps a
/// daily trigger until its owner fixes it.
pub fn effective_window(shoot: &Shoot) -> MaintenanceWindow {
    MaintenanceWindow::for_shoot(shoot).unwrap_or_else(|e| {
        warn!(shoot = %shoot.key(), error = %e, "Invalid maintenance window, using default");
        MaintenanceWindow::default()
    })
}

/// Whether a Shoot must be maintained at `now`.
///
/// True for an explicit maintain-now request regardless of time, and
/// otherwise exactly when `now` lies inside the Shoot's window.
pub fn should_maintain_now(shoot: &Shoot, now: DateTime<Utc>) -> bool {
    shoot.has_maintain_now_annotation() || effective_window(shoot).contains(now)
}

/// Whether an update from `old` to `new` warrants a maintenance pass
pub fn should_enqueue_on_update(old: &Shoot, new: &Shoot) -> bool {
    new.has_maintain_now_annotation() || old.maintenance_time_window() != new.maintenance_time_window()
}

/// Time left until `next`, clamped to the controller's minimum requeue
pub fn requeue_after(next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO).max(MIN_REQUEUE)
}

/// Outcome of observing a Shoot event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Run a pass now
    Due,
    /// Nothing to do before the given instant
    Wait(DateTime<Utc>),
}

#[derive(Clone, Debug)]
struct ScheduleEntry {
    observed: Arc<Shoot>,
    next_run: DateTime<Utc>,
}

/// Per-Shoot trigger table shared by all reconcile calls
#[derive(Default)]
pub struct MaintenanceSchedule {
    entries: Mutex<HashMap<String, ScheduleEntry>>,
}

impl MaintenanceSchedule {
    /// Create an empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the event carrying `shoot` triggers a pass at `now`
    pub fn observe(&self, shoot: &Arc<Shoot>, now: DateTime<Utc>) -> Trigger {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&shoot.key()) else {
            return Trigger::Due;
        };
        if now >= entry.next_run {
            return Trigger::Due;
        }
        if entry.observed.metadata.resource_version != shoot.metadata.resource_version {
            if should_enqueue_on_update(&entry.observed, shoot) {
                return Trigger::Due;
            }
            entry.observed = shoot.clone();
        }
        Trigger::Wait(entry.next_run)
    }

    /// Record the next trigger for `shoot`, replacing any earlier one
    pub fn schedule(&self, shoot: Arc<Shoot>, next_run: DateTime<Utc>) {
        self.entries.lock().insert(
            shoot.key(),
            ScheduleEntry {
                observed: shoot,
                next_run,
            },
        );
    }

    /// Drop the entry of a Shoot that is gone
    pub fn forget(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Pending trigger of a Shoot
    pub fn next_run(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().get(key).map(|e| e.next_run)
    }
}
