use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::NotificationError;
use crate::habit::{Habit, HabitId, HabitType, TodoId, TodoReminder};

pub const TODO_REQUEST_BASE: u32 = 1_000_000;
pub const HABIT_REQUEST_BASE: u32 = 2_000_000;
pub const REQUEST_RANGE_SPAN: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RequestId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderTarget {
    Habit(HabitId),
    Todo(TodoId),
}

impl ReminderTarget {
    pub fn request_id(&self) -> Result<RequestId, NotificationError> {
        let (kind, base, id) = match self {
            ReminderTarget::Habit(id) => ("habit", HABIT_REQUEST_BASE, id.0),
            ReminderTarget::Todo(id) => ("todo", TODO_REQUEST_BASE, id.0),
        };
        if id >= u64::from(REQUEST_RANGE_SPAN) {
            return Err(NotificationError::IdOutOfRange { kind, id });
        }
        Ok(RequestId(base + id as u32))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationChannel {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const TODO_CHANNEL: NotificationChannel = NotificationChannel {
    id: "todo_reminder_channel",
    name: "Todo Reminders",
    description: "Notifications for scheduled todos",
};

pub const HABIT_CHANNEL: NotificationChannel = NotificationChannel {
    id: "habit_reminder_channel",
    name: "Habit Reminders",
    description: "Notifications for scheduled habits",
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlarmRequest {
    pub request_id: RequestId,
    pub fire_at: DateTime<Utc>,
    pub payload: NotificationPayload,
}

/// Platform-specific alarm adapters implement this trait. Firing is best
/// effort and may be delayed by the platform.
pub trait AlarmSink: Send + Sync {
    fn register_channels(&self, _channels: &[NotificationChannel]) -> Result<(), NotificationError> {
        Ok(())
    }

    /// Arms or replaces the alarm for `request.request_id`.
    fn arm(&self, request: &AlarmRequest) -> Result<(), NotificationError>;

    /// Disarms the alarm and dismisses any posted notification. Must accept
    /// ids that are not armed.
    fn disarm(&self, request_id: RequestId) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmHandle {
    pub request_id: RequestId,
    pub fire_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleState {
    Unscheduled,
    Scheduled(AlarmHandle),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub armed: usize,
    pub skipped: usize,
    pub failed: Vec<(HabitId, NotificationError)>,
}

/// Arms and cancels reminders through an [`AlarmSink`]. Every habit and todo
/// maps to one deterministic [`RequestId`], so arming again supersedes the
/// previous alarm.
pub struct NotificationScheduler {
    sink: Arc<dyn AlarmSink>,
    alarms: RwLock<HashMap<RequestId, AlarmHandle>>,
}

impl NotificationScheduler {
    pub fn new(sink: Arc<dyn AlarmSink>) -> Self {
        Self {
            sink,
            alarms: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_channels(&self) -> Result<(), NotificationError> {
        self.sink.register_channels(&[TODO_CHANNEL, HABIT_CHANNEL])
    }

    pub fn state(&self, target: ReminderTarget) -> ScheduleState {
        let Ok(request_id) = target.request_id() else {
            return ScheduleState::Unscheduled;
        };
        match self.alarms.read().get(&request_id) {
            Some(handle) => ScheduleState::Scheduled(handle.clone()),
            None => ScheduleState::Unscheduled,
        }
    }

    /// Arms the habit's reminder at its due instant. Inactive habits are left
    /// unscheduled.
    pub fn schedule_habit(&self, habit: &Habit) -> Result<ScheduleState, NotificationError> {
        if !habit.active {
            self.cancel_habit(habit.id)?;
            return Ok(ScheduleState::Unscheduled);
        }
        self.arm_habit(habit)
    }

    /// Cancelling a habit without a pending reminder is a no-op.
    pub fn cancel_habit(&self, id: HabitId) -> Result<(), NotificationError> {
        self.cancel(ReminderTarget::Habit(id))
    }

    /// Exactly one cancel, then one arm when the habit is active.
    pub fn reschedule_habit(&self, habit: &Habit) -> Result<ScheduleState, NotificationError> {
        self.cancel_habit(habit.id)?;
        if !habit.active {
            return Ok(ScheduleState::Unscheduled);
        }
        self.arm_habit(habit)
    }

    pub fn schedule_todo(&self, todo: &TodoReminder) -> Result<ScheduleState, NotificationError> {
        let payload = NotificationPayload {
            title: todo.title.clone(),
            body: todo
                .description
                .clone()
                .unwrap_or_else(|| "You have a scheduled todo.".to_string()),
            channel: TODO_CHANNEL.id.to_string(),
        };
        self.arm(ReminderTarget::Todo(todo.id), todo.due, payload)
    }

    pub fn cancel_todo(&self, id: TodoId) -> Result<(), NotificationError> {
        self.cancel(ReminderTarget::Todo(id))
    }

    /// Re-arms every active habit, e.g. after the platform dropped alarms
    /// across a reboot. Failures are collected, not fatal.
    pub fn refresh_habits(&self, habits: &[Habit]) -> RefreshReport {
        let mut report = RefreshReport::default();
        for habit in habits {
            if !habit.active {
                report.skipped += 1;
                continue;
            }
            match self.schedule_habit(habit) {
                Ok(_) => report.armed += 1,
                Err(err) => {
                    tracing::warn!(habit = %habit.id, %err, "unable to re-arm reminder");
                    report.failed.push((habit.id, err));
                }
            }
        }
        report
    }

    fn arm_habit(&self, habit: &Habit) -> Result<ScheduleState, NotificationError> {
        self.arm(
            ReminderTarget::Habit(habit.id),
            habit.next_due,
            habit_payload(habit),
        )
    }

    fn arm(
        &self,
        target: ReminderTarget,
        fire_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<ScheduleState, NotificationError> {
        let request_id = target.request_id()?;
        let request = AlarmRequest {
            request_id,
            fire_at,
            payload,
        };
        self.sink.arm(&request)?;
        let handle = AlarmHandle {
            request_id,
            fire_at,
        };
        self.alarms.write().insert(request_id, handle.clone());
        tracing::debug!(?target, request = request_id.0, %fire_at, "reminder armed");
        Ok(ScheduleState::Scheduled(handle))
    }

    fn cancel(&self, target: ReminderTarget) -> Result<(), NotificationError> {
        let request_id = target.request_id()?;
        // Alarms armed by an earlier process are unknown to the local table, so
        // the platform is always asked to disarm.
        self.sink.disarm(request_id)?;
        if self.alarms.write().remove(&request_id).is_some() {
            tracing::debug!(?target, request = request_id.0, "reminder cancelled");
        }
        Ok(())
    }
}

fn habit_payload(habit: &Habit) -> NotificationPayload {
    let body = match (&habit.description, &habit.habit_type) {
        (Some(description), _) => description.clone(),
        (None, HabitType::Measurable(measure)) => format!(
            "{} / {} {}",
            measure.progress(),
            measure.target(),
            measure.unit()
        ),
        (None, HabitType::Binary) => format!("Time for {}", habit.name),
    };
    NotificationPayload {
        title: habit.name.clone(),
        body,
        channel: HABIT_CHANNEL.id.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmEvent {
    ChannelsRegistered(Vec<&'static str>),
    Armed(AlarmRequest),
    Disarmed(RequestId),
}

/// In-process sink that keeps armed alarms in memory. Backs headless runs and
/// tests; can be told to refuse arming to mimic a missing alarm permission.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AlarmEvent>>,
    armed: Mutex<HashMap<RequestId, AlarmRequest>>,
    refuse_arming: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_arming(&self, refuse: bool) {
        *self.refuse_arming.lock() = refuse;
    }

    pub fn events(&self) -> Vec<AlarmEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn armed(&self) -> Vec<AlarmRequest> {
        let mut armed: Vec<AlarmRequest> = self.armed.lock().values().cloned().collect();
        armed.sort_by_key(|request| request.request_id);
        armed
    }

    pub fn armed_for(&self, request_id: RequestId) -> Option<AlarmRequest> {
        self.armed.lock().get(&request_id).cloned()
    }
}

impl AlarmSink for RecordingSink {
    fn register_channels(&self, channels: &[NotificationChannel]) -> Result<(), NotificationError> {
        let ids = channels.iter().map(|channel| channel.id).collect();
        self.events.lock().push(AlarmEvent::ChannelsRegistered(ids));
        Ok(())
    }

    fn arm(&self, request: &AlarmRequest) -> Result<(), NotificationError> {
        if *self.refuse_arming.lock() {
            return Err(NotificationError::Refused(
                "exact alarm permission not granted".to_string(),
            ));
        }
        self.armed.lock().insert(request.request_id, request.clone());
        self.events.lock().push(AlarmEvent::Armed(request.clone()));
        Ok(())
    }

    fn disarm(&self, request_id: RequestId) -> Result<(), NotificationError> {
        self.armed.lock().remove(&request_id);
        self.events.lock().push(AlarmEvent::Disarmed(request_id));
        Ok(())
    }
}
