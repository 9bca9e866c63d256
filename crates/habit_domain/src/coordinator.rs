use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::error::{HabitError, NotificationError, Result};
use crate::habit::{Habit, HabitDraft, HabitId, HabitLog, HabitType};
use crate::notifications::{NotificationScheduler, ReminderTarget, ScheduleState};
use crate::recurrence::RecurrencePolicy;
use crate::store::HabitStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionWarning {
    /// The habit is saved but its reminder could not be updated.
    Reminder(NotificationError),
    /// The habit is saved but the completion was not logged.
    LogNotWritten(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionOutcome {
    pub habit: Habit,
    /// True when the habit moved to its next period.
    pub completed: bool,
    pub reminder: ScheduleState,
    pub warnings: Vec<CompletionWarning>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CatchUpReport {
    pub advanced: Vec<HabitId>,
    pub unchanged: usize,
    pub failed: Vec<(HabitId, String)>,
    pub warnings: Vec<(HabitId, CompletionWarning)>,
}

/// Runs every habit mutation under that habit's lock: re-read, compute,
/// persist, then touch reminders. Failures after the commit become warnings.
pub struct CompletionCoordinator {
    store: Arc<dyn HabitStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<NotificationScheduler>,
    policy: RecurrencePolicy,
    locks: Mutex<HashMap<HabitId, Arc<Mutex<()>>>>,
}

impl CompletionCoordinator {
    pub fn new(
        store: Arc<dyn HabitStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<NotificationScheduler>,
        policy: RecurrencePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            scheduler,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RecurrencePolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    #[instrument(skip(self, draft), fields(name = %draft.name))]
    pub fn create_habit(&self, draft: HabitDraft) -> Result<CompletionOutcome> {
        draft.validate()?;
        let now = self.clock.now();
        let next_due = self.policy.anchor(draft.reminder_time, now)?;
        let habit = self.store.create(draft, next_due)?;
        let lock = self.lock_for(habit.id);
        let _guard = lock.lock();

        let mut warnings = Vec::new();
        let reminder = match self.scheduler.schedule_habit(&habit) {
            Ok(state) => state,
            Err(err) => {
                warn!(habit = %habit.id, %err, "created habit without reminder");
                warnings.push(CompletionWarning::Reminder(err));
                ScheduleState::Unscheduled
            }
        };
        info!(habit = %habit.id, %next_due, "habit created");
        Ok(CompletionOutcome {
            habit,
            completed: false,
            reminder,
            warnings,
        })
    }

    /// Marks a binary habit done and moves it to its next due instant.
    #[instrument(skip(self))]
    pub fn complete_binary(&self, id: HabitId) -> Result<CompletionOutcome> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let habit = self.load(id)?;
        if !habit.is_binary() {
            return Err(HabitError::InvalidOperation {
                id,
                reason: "measurable habits complete through progress".to_string(),
            });
        }
        let now = self.clock.now();
        self.complete_locked(habit, now)
    }

    /// Adds `delta` to a measurable habit's progress, clamped to `[0, target]`.
    /// Reaching the target with a positive delta completes the habit exactly as
    /// [`complete_binary`](Self::complete_binary) would.
    #[instrument(skip(self))]
    pub fn increment_progress(&self, id: HabitId, delta: i64) -> Result<CompletionOutcome> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let mut habit = self.load(id)?;
        let now = self.clock.now();
        let HabitType::Measurable(measure) = &mut habit.habit_type else {
            return Err(HabitError::InvalidOperation {
                id,
                reason: "binary habits have no progress".to_string(),
            });
        };
        let progress = measure.clamped(delta);
        if delta > 0 && progress == measure.target() {
            return self.complete_locked(habit, now);
        }

        let changed = progress != measure.progress();
        measure.set_progress(progress);
        if changed {
            self.store.upsert(&habit)?;
        }
        let mut warnings = Vec::new();
        let reminder = self.rearm(&habit, &mut warnings);
        Ok(CompletionOutcome {
            habit,
            completed: false,
            reminder,
            warnings,
        })
    }

    /// Removes the habit and cancels its reminder.
    #[instrument(skip(self))]
    pub fn delete_habit(&self, id: HabitId) -> Result<CompletionOutcome> {
        let lock = self.lock_for(id);
        let guard = lock.lock();

        let habit = self.load(id)?;
        self.store.delete(&habit)?;
        let mut warnings = Vec::new();
        if let Err(err) = self.scheduler.cancel_habit(id) {
            warn!(habit = %id, %err, "deleted habit but its reminder is still armed");
            warnings.push(CompletionWarning::Reminder(err));
        }
        drop(guard);
        self.locks.lock().remove(&id);
        info!(habit = %id, "habit deleted");

        let reminder = self.scheduler.state(ReminderTarget::Habit(id));
        Ok(CompletionOutcome {
            habit,
            completed: false,
            reminder,
            warnings,
        })
    }

    /// Pauses or resumes a habit. Resuming pulls a stale due instant forward
    /// before the reminder is armed again.
    #[instrument(skip(self))]
    pub fn set_active(&self, id: HabitId, active: bool) -> Result<CompletionOutcome> {
        let lock = self.lock_for(id);
        let _guard = lock.lock();

        let mut habit = self.load(id)?;
        if habit.active != active {
            habit.active = active;
            if active {
                let now = self.clock.now();
                let next_due =
                    self.policy
                        .catch_up_to_future(&habit.frequency, habit.next_due, now)?;
                if next_due != habit.next_due {
                    habit.next_due = next_due;
                    reset_progress(&mut habit);
                }
            }
            self.store.upsert(&habit)?;
        }
        let mut warnings = Vec::new();
        let reminder = self.rearm(&habit, &mut warnings);
        Ok(CompletionOutcome {
            habit,
            completed: false,
            reminder,
            warnings,
        })
    }

    /// Pulls every due instant that drifted into the past forward to its first
    /// future occurrence. Habits already in the future are not touched.
    #[instrument(skip(self))]
    pub fn catch_up_all(&self) -> Result<CatchUpReport> {
        let now = self.clock.now();
        let mut report = CatchUpReport::default();

        for listed in self.store.list()? {
            let id = listed.id;
            let lock = self.lock_for(id);
            let _guard = lock.lock();

            let Some(mut habit) = self.store.get(id)? else {
                continue;
            };
            let next_due = match self
                .policy
                .catch_up_to_future(&habit.frequency, habit.next_due, now)
            {
                Ok(next_due) => next_due,
                Err(err) => {
                    warn!(habit = %id, %err, "catch-up failed");
                    report.failed.push((id, err.to_string()));
                    continue;
                }
            };
            if next_due == habit.next_due {
                report.unchanged += 1;
                continue;
            }

            habit.next_due = next_due;
            reset_progress(&mut habit);
            if let Err(err) = self.store.upsert(&habit) {
                warn!(habit = %id, %err, "catch-up not persisted");
                report.failed.push((id, err.to_string()));
                continue;
            }
            let mut warnings = Vec::new();
            self.rearm(&habit, &mut warnings);
            report
                .warnings
                .extend(warnings.into_iter().map(|warning| (id, warning)));
            report.advanced.push(id);
        }

        info!(
            advanced = report.advanced.len(),
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "catch-up pass finished"
        );
        Ok(report)
    }

    fn complete_locked(&self, mut habit: Habit, now: DateTime<Utc>) -> Result<CompletionOutcome> {
        let next_due = self
            .policy
            .advance(&habit.frequency, habit.next_due, now)?;
        let value = habit.measure().map(|measure| measure.target());
        habit.next_due = next_due;
        reset_progress(&mut habit);

        self.store.upsert(&habit)?;

        let mut warnings = Vec::new();
        let reminder = self.rearm(&habit, &mut warnings);
        let log = HabitLog {
            habit_id: habit.id,
            timestamp: now,
            value,
        };
        if let Err(err) = self.store.append_log(log) {
            warn!(habit = %habit.id, %err, "completion saved but not logged");
            warnings.push(CompletionWarning::LogNotWritten(err.to_string()));
        }
        info!(habit = %habit.id, %next_due, "habit completed");

        Ok(CompletionOutcome {
            habit,
            completed: true,
            reminder,
            warnings,
        })
    }

    fn rearm(&self, habit: &Habit, warnings: &mut Vec<CompletionWarning>) -> ScheduleState {
        match self.scheduler.reschedule_habit(habit) {
            Ok(state) => state,
            Err(err) => {
                warn!(habit = %habit.id, %err, "reminder not updated");
                warnings.push(CompletionWarning::Reminder(err));
                self.scheduler.state(ReminderTarget::Habit(habit.id))
            }
        }
    }

    fn load(&self, id: HabitId) -> Result<Habit> {
        self.store.get(id)?.ok_or(HabitError::NotFound(id))
    }

    fn lock_for(&self, id: HabitId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }
}

fn reset_progress(habit: &mut Habit) {
    if let HabitType::Measurable(measure) = &mut habit.habit_type {
        measure.set_progress(0);
    }
}
