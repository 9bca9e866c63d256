use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use clap::Subcommand;
use habit_domain::agenda::{AgendaEntry, AgendaGroup};
use habit_domain::coordinator::{CompletionOutcome, CompletionWarning};
use habit_domain::error::NotificationError;
use habit_domain::habit::{Frequency, HabitDraft, HabitId, LifeDomain};
use habit_domain::notifications::{AlarmRequest, AlarmSink, NotificationChannel, RequestId};
use habit_domain::recurrence::RecurrencePolicy;
use habit_domain::store::JsonFileStore;
use habit_domain::HabitService;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub store_path: PathBuf,
    /// Fixed offset override; `None` follows the system time zone.
    pub utc_offset_minutes: Option<i32>,
    pub default_reminder: Option<NaiveTime>,
    pub agenda_preview: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Builds a config from `lookup`, falling back to the default for every
    /// missing or malformed value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(path) = lookup("HABIT_STORE_PATH") {
            let path = path.trim();
            if path.is_empty() {
                warn!("ignoring empty HABIT_STORE_PATH");
            } else {
                config.store_path = PathBuf::from(path);
            }
        }
        if let Some(raw) = lookup("HABIT_UTC_OFFSET_MINUTES") {
            match raw
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|minutes| RecurrencePolicy::from_offset_minutes(*minutes).is_ok())
            {
                Some(minutes) => config.utc_offset_minutes = Some(minutes),
                None => warn!(value = %raw, "ignoring invalid HABIT_UTC_OFFSET_MINUTES"),
            }
        }
        if let Some(raw) = lookup("HABIT_DEFAULT_REMINDER") {
            match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
                Ok(time) => config.default_reminder = Some(time),
                Err(err) => warn!(value = %raw, %err, "ignoring invalid HABIT_DEFAULT_REMINDER"),
            }
        }
        if let Some(raw) = lookup("HABIT_AGENDA_PREVIEW") {
            match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => config.agenda_preview = value,
                _ => warn!(value = %raw, "ignoring invalid HABIT_AGENDA_PREVIEW"),
            }
        }
        config
    }

    pub fn policy(&self) -> Result<RecurrencePolicy> {
        match self.utc_offset_minutes {
            Some(minutes) => {
                RecurrencePolicy::from_offset_minutes(minutes).context("invalid utc offset")
            }
            None => Ok(RecurrencePolicy::local()),
        }
    }

    pub fn open_service(&self) -> Result<HabitService> {
        let store = JsonFileStore::open(&self.store_path).with_context(|| {
            format!("failed to open habit store at {}", self.store_path.display())
        })?;
        info!(path = %self.store_path.display(), "opened habit store");
        HabitService::builder()
            .with_store(Arc::new(store))
            .with_alarm_sink(Arc::new(TracingAlarmSink))
            .with_policy(self.policy()?)
            .build()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let store_path = std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".habits").join("habits.json"))
            .unwrap_or_else(|| PathBuf::from("habits.json"));
        Self {
            store_path,
            utc_offset_minutes: None,
            default_reminder: None,
            agenda_preview: 5,
        }
    }
}

/// Desktop stand-in for platform alarms: reminders are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlarmSink;

impl AlarmSink for TracingAlarmSink {
    fn register_channels(
        &self,
        channels: &[NotificationChannel],
    ) -> std::result::Result<(), NotificationError> {
        for channel in channels {
            debug!(channel = channel.id, name = channel.name, "notification channel ready");
        }
        Ok(())
    }

    fn arm(&self, request: &AlarmRequest) -> std::result::Result<(), NotificationError> {
        info!(
            request = request.request_id.0,
            fire_at = %request.fire_at,
            title = %request.payload.title,
            channel = %request.payload.channel,
            "reminder armed"
        );
        Ok(())
    }

    fn disarm(&self, request_id: RequestId) -> std::result::Result<(), NotificationError> {
        debug!(request = request_id.0, "reminder disarmed");
        Ok(())
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show what is due, what was done today and what comes next
    Agenda,
    /// Create a habit
    Add {
        /// Habit name
        name: String,
        /// daily, weekly, Nd (every N days) or Nw (every N weeks)
        #[arg(long, default_value = "daily")]
        every: String,
        #[arg(long)]
        description: Option<String>,
        /// Track a quantity per period instead of a single check-off
        #[arg(long)]
        target: Option<u32>,
        /// Unit of the target
        #[arg(long, default_value = "times")]
        unit: String,
        /// Life domain (intellect, vitality, spirit, charisma, flow, order)
        #[arg(long)]
        domain: Option<String>,
        /// Reminder time as HH:MM
        #[arg(long)]
        at: Option<String>,
    },
    /// Mark a binary habit done
    Complete { id: u64 },
    /// Add to (or subtract from) a measurable habit's progress
    Progress {
        id: u64,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Delete a habit and its history
    Delete { id: u64 },
    /// Stop reminders for a habit
    Pause { id: u64 },
    /// Resume a paused habit
    Resume { id: u64 },
    /// Move overdue habits to their next occurrence
    CatchUp,
}

pub fn run(config: AppConfig, command: Command) -> Result<()> {
    let service = config.open_service()?;
    service.start().context("failed to start habit service")?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    execute(&service, &config, command, &mut out)
}

pub fn execute(
    service: &HabitService,
    config: &AppConfig,
    command: Command,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Agenda => print_agenda(service, config.agenda_preview, out)?,
        Command::Add {
            name,
            every,
            description,
            target,
            unit,
            domain,
            at,
        } => {
            let frequency: Frequency = every
                .parse()
                .with_context(|| format!("invalid frequency {every:?}"))?;
            let mut draft = HabitDraft::new(name, frequency);
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(target) = target {
                draft = draft.measurable(target, unit)?;
            }
            if let Some(domain) = domain {
                draft = draft.in_domain(domain.parse::<LifeDomain>()?);
            }
            let reminder = match at {
                Some(raw) => Some(
                    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
                        .with_context(|| format!("invalid reminder time {raw:?}"))?,
                ),
                None => config.default_reminder,
            };
            if let Some(time) = reminder {
                draft = draft.at_time(time);
            }
            let outcome = service.create_habit(draft)?;
            print_outcome(service, "Created", &outcome, out)?;
        }
        Command::Complete { id } => {
            let outcome = service.complete_binary(HabitId(id))?;
            print_outcome(service, "Completed", &outcome, out)?;
        }
        Command::Progress { id, delta } => {
            let outcome = service.increment_progress(HabitId(id), delta)?;
            let verb = if outcome.completed { "Completed" } else { "Updated" };
            print_outcome(service, verb, &outcome, out)?;
        }
        Command::Delete { id } => {
            let outcome = service.delete_habit(HabitId(id))?;
            writeln!(out, "Deleted {} {}", outcome.habit.id, outcome.habit.name)?;
            print_warnings(&outcome, out)?;
        }
        Command::Pause { id } => {
            let outcome = service.set_active(HabitId(id), false)?;
            print_outcome(service, "Paused", &outcome, out)?;
        }
        Command::Resume { id } => {
            let outcome = service.set_active(HabitId(id), true)?;
            print_outcome(service, "Resumed", &outcome, out)?;
        }
        Command::CatchUp => {
            let report = service.catch_up()?;
            writeln!(
                out,
                "{} advanced, {} already current",
                report.advanced.len(),
                report.unchanged
            )?;
            for (id, reason) in &report.failed {
                writeln!(out, "  {id}: {reason}")?;
            }
        }
    }
    Ok(())
}

fn print_agenda(service: &HabitService, preview: usize, out: &mut impl Write) -> Result<()> {
    let due = service.due_habits()?;
    for (group, heading) in [
        (AgendaGroup::Today, "Today"),
        (AgendaGroup::ThisWeek, "This week"),
    ] {
        let entries: Vec<_> = due.iter().filter(|entry| entry.group == group).collect();
        if entries.is_empty() {
            continue;
        }
        writeln!(out, "{heading}")?;
        for entry in entries {
            writeln!(out, "  {}", describe_entry(service, entry))?;
        }
    }

    let completed = service.completed_today()?;
    if !completed.is_empty() {
        writeln!(out, "Completed today")?;
        for entry in &completed {
            writeln!(
                out,
                "  {} {} at {}",
                entry.habit.id,
                entry.habit.name,
                local_time(service, entry.last_logged, "%H:%M")
            )?;
        }
    }

    let upcoming = service.upcoming(preview)?;
    if !upcoming.is_empty() {
        writeln!(out, "Next up")?;
        for entry in &upcoming {
            writeln!(out, "  {}", describe_entry(service, entry))?;
        }
    }

    if due.is_empty() && completed.is_empty() && upcoming.is_empty() {
        writeln!(out, "No habits yet.")?;
    }
    Ok(())
}

fn describe_entry(service: &HabitService, entry: &AgendaEntry) -> String {
    let habit = &entry.habit;
    let mut line = format!(
        "{} {} ({}) due {}",
        habit.id,
        habit.name,
        habit.frequency,
        local_time(service, habit.next_due, "%a %Y-%m-%d %H:%M")
    );
    if let Some(measure) = habit.measure() {
        line.push_str(&format!(
            " [{}/{} {}]",
            measure.progress(),
            measure.target(),
            measure.unit()
        ));
    }
    if entry.overdue {
        line.push_str(" overdue");
    }
    line
}

fn print_outcome(
    service: &HabitService,
    verb: &str,
    outcome: &CompletionOutcome,
    out: &mut impl Write,
) -> Result<()> {
    let habit = &outcome.habit;
    write!(out, "{verb} {} {}", habit.id, habit.name)?;
    if let Some(measure) = habit.measure() {
        write!(
            out,
            " [{}/{} {}]",
            measure.progress(),
            measure.target(),
            measure.unit()
        )?;
    }
    if habit.active {
        writeln!(
            out,
            ", next due {}",
            local_time(service, habit.next_due, "%a %Y-%m-%d %H:%M")
        )?;
    } else {
        writeln!(out, ", paused")?;
    }
    print_warnings(outcome, out)
}

fn print_warnings(outcome: &CompletionOutcome, out: &mut impl Write) -> Result<()> {
    for warning in &outcome.warnings {
        match warning {
            CompletionWarning::Reminder(err) => writeln!(out, "  warning: reminder: {err}")?,
            CompletionWarning::LogNotWritten(err) => {
                writeln!(out, "  warning: history not saved: {err}")?
            }
        }
    }
    Ok(())
}

fn local_time(service: &HabitService, instant: DateTime<Utc>, format: &str) -> String {
    instant
        .with_timezone(service.policy().zone())
        .format(format)
        .to_string()
}
