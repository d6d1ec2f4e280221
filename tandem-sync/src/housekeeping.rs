//! Periodic server chores, driven by the injected clock.
//!
//! The server ticks the [`Scheduler`] on a short real-time interval and
//! runs whatever is due. Tests advance a `ManualClock` instead of waiting.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HousekeepingTask {
    /// Drop connections idle longer than the inactivity timeout.
    SweepInactive,
    /// Write a backup of the whole collection.
    DailyBackup,
}

impl HousekeepingTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SweepInactive => "sweep_inactive",
            Self::DailyBackup => "daily_backup",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    task: HousekeepingTask,
    every: Duration,
    next_due: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    entries: Vec<Entry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `every`, first at `now + every`.
    pub fn every(mut self, task: HousekeepingTask, every: Duration, now: DateTime<Utc>) -> Self {
        self.entries.retain(|e| e.task != task);
        self.entries.push(Entry {
            task,
            every,
            next_due: now + every,
        });
        self
    }

    /// Tasks whose time has come, in registration order. Each due task is
    /// reported once even if several periods were missed.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<HousekeepingTask> {
        let mut due = Vec::new();
        for entry in &mut self.entries {
            if entry.next_due > now {
                continue;
            }
            due.push(entry.task);
            if entry.every <= Duration::zero() {
                entry.next_due = now + Duration::seconds(1);
                continue;
            }
            entry.next_due = next_after(entry.next_due, entry.every, now);
        }
        due
    }

    pub fn next_due(&self, task: HousekeepingTask) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .find(|e| e.task == task)
            .map(|e| e.next_due)
    }
}

/// First `due + k * every` (k >= 1) strictly after `now`, in one step.
fn next_after(due: DateTime<Utc>, every: Duration, now: DateTime<Utc>) -> DateTime<Utc> {
    let period = every.num_milliseconds().max(1);
    let missed = (now - due).num_milliseconds() / period + 1;
    period
        .checked_mul(missed)
        .and_then(|ms| due.checked_add_signed(Duration::milliseconds(ms)))
        .unwrap_or(now + every)
}
