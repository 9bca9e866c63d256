use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::agenda::{self, AgendaEntry, CompletedEntry};
use crate::clock::{Clock, SystemClock};
use crate::coordinator::{CatchUpReport, CompletionCoordinator, CompletionOutcome};
use crate::error::{HabitError, NotificationError, Result};
use crate::habit::{Habit, HabitDraft, HabitId, TodoId, TodoReminder};
use crate::notifications::{
    AlarmSink, NotificationScheduler, RefreshReport, ReminderTarget, ScheduleState,
};
use crate::recurrence::RecurrencePolicy;
use crate::store::HabitStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// Set when the platform refused to register notification channels.
    pub channels: Option<NotificationError>,
    pub catch_up: CatchUpReport,
    pub refresh: RefreshReport,
}

pub struct HabitService {
    store: Arc<dyn HabitStore>,
    scheduler: Arc<NotificationScheduler>,
    coordinator: CompletionCoordinator,
    started: Mutex<bool>,
}

pub struct HabitServiceBuilder {
    store: Option<Arc<dyn HabitStore>>,
    sink: Option<Arc<dyn AlarmSink>>,
    clock: Option<Arc<dyn Clock>>,
    policy: RecurrencePolicy,
}

impl Default for HabitServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HabitServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            sink: None,
            clock: None,
            policy: RecurrencePolicy::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn HabitStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_alarm_sink(mut self, sink: Arc<dyn AlarmSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Defaults to the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_policy(mut self, policy: RecurrencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> anyhow::Result<HabitService> {
        let store = self
            .store
            .ok_or_else(|| anyhow!("no habit store configured"))?;
        let sink = self
            .sink
            .ok_or_else(|| anyhow!("no alarm sink configured"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let scheduler = Arc::new(NotificationScheduler::new(sink));
        let coordinator =
            CompletionCoordinator::new(store.clone(), clock, scheduler.clone(), self.policy);
        Ok(HabitService {
            store,
            scheduler,
            coordinator,
            started: Mutex::new(false),
        })
    }
}

impl HabitService {
    pub fn builder() -> HabitServiceBuilder {
        HabitServiceBuilder::new()
    }

    /// Process start-up: registers notification channels, pulls stale due
    /// instants forward, then re-arms every active reminder. Runs once per
    /// service; later calls return `Ok(None)`. A failed run may be retried.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<Option<StartupReport>> {
        let mut started = self.started.lock();
        if *started {
            return Ok(None);
        }

        let channels = match self.scheduler.register_channels() {
            Ok(()) => None,
            Err(err) => {
                warn!(%err, "notification channels not registered");
                Some(err)
            }
        };
        let catch_up = self.coordinator.catch_up_all()?;
        let habits = self.store.list()?;
        let refresh = self.scheduler.refresh_habits(&habits);
        *started = true;

        info!(
            habits = habits.len(),
            advanced = catch_up.advanced.len(),
            armed = refresh.armed,
            failed = refresh.failed.len(),
            "habit service started"
        );
        Ok(Some(StartupReport {
            channels,
            catch_up,
            refresh,
        }))
    }

    pub fn coordinator(&self) -> &CompletionCoordinator {
        &self.coordinator
    }

    pub fn policy(&self) -> &RecurrencePolicy {
        self.coordinator.policy()
    }

    pub fn habits(&self) -> Result<Vec<Habit>> {
        Ok(self.store.list()?)
    }

    pub fn habit(&self, id: HabitId) -> Result<Habit> {
        self.store.get(id)?.ok_or(HabitError::NotFound(id))
    }

    pub fn reminder(&self, id: HabitId) -> ScheduleState {
        self.scheduler.state(ReminderTarget::Habit(id))
    }

    pub fn create_habit(&self, draft: HabitDraft) -> Result<CompletionOutcome> {
        self.coordinator.create_habit(draft)
    }

    pub fn complete_binary(&self, id: HabitId) -> Result<CompletionOutcome> {
        self.coordinator.complete_binary(id)
    }

    pub fn increment_progress(&self, id: HabitId, delta: i64) -> Result<CompletionOutcome> {
        self.coordinator.increment_progress(id, delta)
    }

    pub fn delete_habit(&self, id: HabitId) -> Result<CompletionOutcome> {
        self.coordinator.delete_habit(id)
    }

    pub fn set_active(&self, id: HabitId, active: bool) -> Result<CompletionOutcome> {
        self.coordinator.set_active(id, active)
    }

    pub fn catch_up(&self) -> Result<CatchUpReport> {
        self.coordinator.catch_up_all()
    }

    pub fn due_habits(&self) -> Result<Vec<AgendaEntry>> {
        let habits = self.store.list()?;
        Ok(agenda::due_within_period(&habits, self.coordinator.now()))
    }

    pub fn due_today(&self) -> Result<Vec<AgendaEntry>> {
        let habits = self.store.list()?;
        agenda::due_today(&habits, self.policy(), self.coordinator.now())
    }

    pub fn upcoming(&self, limit: usize) -> Result<Vec<AgendaEntry>> {
        let habits = self.store.list()?;
        Ok(agenda::upcoming(&habits, self.coordinator.now(), limit))
    }

    pub fn completed_today(&self) -> Result<Vec<CompletedEntry>> {
        let window = self.policy().day_window(self.coordinator.now())?;
        let habits = self.store.list()?;
        let logs = self.store.logs_between(window.clone())?;
        Ok(agenda::completed_within(&habits, &logs, &window))
    }

    pub fn schedule_todo(
        &self,
        todo: &TodoReminder,
    ) -> std::result::Result<ScheduleState, NotificationError> {
        self.scheduler.schedule_todo(todo)
    }

    pub fn cancel_todo(&self, id: TodoId) -> std::result::Result<(), NotificationError> {
        self.scheduler.cancel_todo(id)
    }
}
